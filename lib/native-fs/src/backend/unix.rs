//! The POSIX backend.
//!
//! Thin binding over `std::fs` plus the libc calls std does not surface
//! (`access(2)`, `getpwuid_r`/`getgrgid_r`, `mkdir(2)` with an explicit
//! mode). One `stat` answers every attribute group including the
//! permission classes, so the engine's separate permission pass never
//! runs here. Trash follows the freedesktop.org layout under
//! `$XDG_DATA_HOME/Trash`.

use std::ffi::CString;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use filetime::FileTime;

use crate::meta::MetaField;
use crate::permissions::Permissions;

use super::{
    AccessMode, FileId, NativeBackend, NativeError, NativeErrorKind, NativeSecurity, OwnerClass,
    StatRecord, TrashDisposition, TrashSink, WhichTime,
};

#[derive(Debug, Default, Clone)]
pub struct UnixBackend;

impl UnixBackend {
    pub fn new() -> Self {
        UnixBackend
    }
}

fn cstr(path: &str) -> Result<CString, NativeError> {
    CString::new(path).map_err(|_| NativeError::new(NativeErrorKind::Io, libc::EINVAL))
}

fn nanos_of(secs: i64, nsec: i64) -> u64 {
    if secs < 0 {
        return 0;
    }
    (secs as u64).saturating_mul(1_000_000_000) + nsec.max(0) as u64
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn record_from(path: &str, meta: &fs::Metadata) -> StatRecord {
    let file_type = meta.file_type();
    let mode = meta.mode();
    let birth = meta
        .created()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_nanos() as u64);

    StatRecord {
        // A junction is a Windows notion; stat still answers the
        // question, the answer is simply "no".
        answers: MetaField::POSIX_STAT_FIELDS | MetaField::JUNCTION_TYPE,
        file: file_type.is_file(),
        directory: file_type.is_dir(),
        symlink: file_type.is_symlink(),
        junction: false,
        hidden: file_name_of(path).starts_with('.'),
        read_only: mode & 0o200 == 0,
        mode,
        size: meta.len(),
        birth,
        changed: nanos_of(meta.ctime(), meta.ctime_nsec()),
        modified: nanos_of(meta.mtime(), meta.mtime_nsec()),
        accessed: nanos_of(meta.atime(), meta.atime_nsec()),
    }
}

impl NativeBackend for UnixBackend {
    fn stat(&self, path: &str, follow: bool) -> Result<StatRecord, NativeError> {
        let meta = if follow {
            fs::metadata(path)
        } else {
            fs::symlink_metadata(path)
        }
        .map_err(NativeError::from)?;
        Ok(record_from(path, &meta))
    }

    fn find_entry(&self, path: &str) -> Result<StatRecord, NativeError> {
        // POSIX has no cheaper per-name enumeration record; the plain
        // lstat doubles as one.
        self.stat(path, false)
    }

    fn read_dir(&self, path: &str) -> Result<Vec<(String, StatRecord)>, NativeError> {
        let mut out = Vec::new();
        for dir_entry in fs::read_dir(path).map_err(NativeError::from)? {
            let dir_entry = dir_entry.map_err(NativeError::from)?;
            let child = dir_entry.path().to_string_lossy().into_owned();
            let meta = dir_entry.metadata().map_err(NativeError::from)?;
            out.push((child.clone(), record_from(&child, &meta)));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn access_probe(&self, path: &str, mode: AccessMode) -> bool {
        let Ok(c_path) = cstr(path) else {
            return false;
        };
        let how = match mode {
            AccessMode::Exists => libc::F_OK,
            AccessMode::Read => libc::R_OK,
            AccessMode::Write => libc::W_OK,
            AccessMode::Execute => libc::X_OK,
        };
        unsafe { libc::access(c_path.as_ptr(), how) == 0 }
    }

    fn read_link_target(&self, path: &str) -> Result<String, NativeError> {
        fs::read_link(path)
            .map(|target| target.to_string_lossy().into_owned())
            .map_err(NativeError::from)
    }

    fn read_reparse_data(&self, _path: &str) -> Result<Vec<u8>, NativeError> {
        Err(NativeError::new(NativeErrorKind::Unsupported, 0))
    }

    fn read_shell_link(&self, _path: &str) -> Result<String, NativeError> {
        Err(NativeError::new(NativeErrorKind::Unsupported, 0))
    }

    fn volume_path_name(&self, _volume_path: &str) -> Result<String, NativeError> {
        Err(NativeError::new(NativeErrorKind::Unsupported, 0))
    }

    fn supports_acl(&self) -> bool {
        false
    }

    fn query_permissions(
        &self,
        path: &str,
        classes: MetaField,
    ) -> Result<(Permissions, MetaField), NativeError> {
        let meta = fs::metadata(path).map_err(NativeError::from)?;
        Ok((Permissions::from_mode(meta.mode()), classes))
    }

    fn apply_security(&self, path: &str, security: &NativeSecurity) -> Result<(), NativeError> {
        let NativeSecurity::Mode(mode) = security else {
            return Err(NativeError::new(NativeErrorKind::Unsupported, 0));
        };
        let c_path = cstr(path)?;
        if unsafe { libc::chmod(c_path.as_ptr(), *mode as libc::mode_t) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn create_dir(
        &self,
        path: &str,
        security: Option<&NativeSecurity>,
    ) -> Result<(), NativeError> {
        match security {
            Some(NativeSecurity::Mode(mode)) => {
                let c_path = cstr(path)?;
                if unsafe { libc::mkdir(c_path.as_ptr(), *mode as libc::mode_t) } != 0 {
                    return Err(io::Error::last_os_error().into());
                }
                Ok(())
            }
            _ => fs::create_dir(path).map_err(NativeError::from),
        }
    }

    fn remove_dir(&self, path: &str) -> Result<(), NativeError> {
        fs::remove_dir(path).map_err(NativeError::from)
    }

    fn remove_file(&self, path: &str) -> Result<(), NativeError> {
        fs::remove_file(path).map_err(NativeError::from)
    }

    fn copy_file(&self, from: &str, to: &str) -> Result<(), NativeError> {
        if fs::symlink_metadata(to).is_ok() {
            return Err(NativeError::new(NativeErrorKind::AlreadyExists, libc::EEXIST));
        }
        fs::copy(from, to).map(|_| ()).map_err(NativeError::from)
    }

    fn rename(&self, from: &str, to: &str, overwrite: bool) -> Result<(), NativeError> {
        if overwrite {
            return fs::rename(from, to).map_err(NativeError::from);
        }
        let meta = fs::symlink_metadata(from).map_err(NativeError::from)?;
        if meta.is_dir() {
            // rename(2) clobbers; a directory cannot be hardlinked, so
            // the existence check is the best non-overwrite guard.
            if fs::symlink_metadata(to).is_ok() {
                return Err(NativeError::new(NativeErrorKind::AlreadyExists, libc::EEXIST));
            }
            return fs::rename(from, to).map_err(NativeError::from);
        }
        let from_c = cstr(from)?;
        let to_c = cstr(to)?;
        if unsafe { libc::link(from_c.as_ptr(), to_c.as_ptr()) } == 0 {
            return fs::remove_file(from).map_err(NativeError::from);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            // Filesystems without hard links, or a cross-device target:
            // fall back to a checked rename.
            Some(code) if code == libc::EPERM || code == libc::EXDEV => {
                if fs::symlink_metadata(to).is_ok() {
                    return Err(NativeError::new(
                        NativeErrorKind::AlreadyExists,
                        libc::EEXIST,
                    ));
                }
                fs::rename(from, to).map_err(NativeError::from)
            }
            _ => Err(err.into()),
        }
    }

    fn set_file_time(
        &self,
        path: &str,
        nanos: u64,
        which: WhichTime,
    ) -> Result<(), NativeError> {
        let time = FileTime::from_unix_time(
            (nanos / 1_000_000_000) as i64,
            (nanos % 1_000_000_000) as u32,
        );
        match which {
            WhichTime::Access => filetime::set_file_atime(path, time),
            WhichTime::Modification => filetime::set_file_mtime(path, time),
            WhichTime::Birth => {
                return Err(NativeError::new(NativeErrorKind::Unsupported, 0));
            }
        }
        .map_err(NativeError::from)
    }

    fn owner_name(&self, path: &str, class: OwnerClass) -> Result<String, NativeError> {
        let meta = fs::symlink_metadata(path).map_err(NativeError::from)?;
        match class {
            OwnerClass::User => user_name(meta.uid()),
            OwnerClass::Group => group_name(meta.gid()),
        }
    }

    fn file_id(&self, path: &str) -> Result<FileId, NativeError> {
        let meta = fs::symlink_metadata(path).map_err(NativeError::from)?;
        Ok(FileId {
            volume: meta.dev(),
            index: meta.ino(),
        })
    }

    fn canonicalize(&self, path: &str) -> Result<String, NativeError> {
        dunce::canonicalize(path)
            .map(|resolved| resolved.to_string_lossy().into_owned())
            .map_err(NativeError::from)
    }

    fn trash(&self, path: &str, sink: TrashSink<'_>) -> Result<String, NativeError> {
        fs::symlink_metadata(path).map_err(NativeError::from)?;
        // Moving into the trash directory never destroys data, so the
        // disposition offered to the sink is always a recycle.
        if !sink(path, TrashDisposition::Recycle) {
            return Err(NativeError::new(NativeErrorKind::Vetoed, 0));
        }

        let trash_root = trash_root()?;
        let files_dir = trash_root.join("files");
        let info_dir = trash_root.join("info");
        fs::create_dir_all(&files_dir).map_err(NativeError::from)?;
        fs::create_dir_all(&info_dir).map_err(NativeError::from)?;

        let name = file_name_of(path);
        let (destination, info_file) = claim_trash_slot(&files_dir, &info_dir, name, path)?;
        if let Err(err) = fs::rename(path, &destination) {
            let _ = fs::remove_file(&info_file);
            return Err(err.into());
        }
        Ok(destination.to_string_lossy().into_owned())
    }
}

fn trash_root() -> Result<PathBuf, NativeError> {
    if let Some(data_home) = std::env::var_os("XDG_DATA_HOME") {
        let data_home = PathBuf::from(data_home);
        if data_home.is_absolute() {
            return Ok(data_home.join("Trash"));
        }
    }
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => {
            Ok(PathBuf::from(home).join(".local/share/Trash"))
        }
        _ => Err(NativeError::new(NativeErrorKind::Unsupported, 0)),
    }
}

/// Claims a unique name in the trash by exclusively creating the
/// `.trashinfo` sidecar, per the freedesktop.org algorithm.
fn claim_trash_slot(
    files_dir: &Path,
    info_dir: &Path,
    name: &str,
    original: &str,
) -> Result<(PathBuf, PathBuf), NativeError> {
    let deleted_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();

    for attempt in 0..1000 {
        let candidate = if attempt == 0 {
            name.to_string()
        } else {
            format!("{name}.{attempt}")
        };
        let info_file = info_dir.join(format!("{candidate}.trashinfo"));
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&info_file)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        };
        let body = format!("[Trash Info]\nPath={original}\nDeletionDate={deleted_at}\n");
        file.write_all(body.as_bytes()).map_err(NativeError::from)?;
        return Ok((files_dir.join(candidate), info_file));
    }
    Err(NativeError::new(NativeErrorKind::Io, libc::EEXIST))
}

fn user_name(uid: u32) -> Result<String, NativeError> {
    let mut buffer = name_buffer(libc::_SC_GETPW_R_SIZE_MAX);
    // Two-phase lookup: one retry with a larger buffer, then give up.
    for _ in 0..2 {
        let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut passwd,
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buffer.resize(buffer.len() * 4, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return Err(NativeError::new(NativeErrorKind::NotFound, rc));
        }
        let name = unsafe { std::ffi::CStr::from_ptr(passwd.pw_name) };
        return Ok(name.to_string_lossy().into_owned());
    }
    Err(NativeError::new(NativeErrorKind::Io, libc::ERANGE))
}

fn group_name(gid: u32) -> Result<String, NativeError> {
    let mut buffer = name_buffer(libc::_SC_GETGR_R_SIZE_MAX);
    for _ in 0..2 {
        let mut group: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = std::ptr::null_mut();
        let rc = unsafe {
            libc::getgrgid_r(
                gid,
                &mut group,
                buffer.as_mut_ptr(),
                buffer.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE {
            buffer.resize(buffer.len() * 4, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return Err(NativeError::new(NativeErrorKind::NotFound, rc));
        }
        let name = unsafe { std::ffi::CStr::from_ptr(group.gr_name) };
        return Ok(name.to_string_lossy().into_owned());
    }
    Err(NativeError::new(NativeErrorKind::Io, libc::ERANGE))
}

fn name_buffer(hint: libc::c_int) -> Vec<libc::c_char> {
    let size = match unsafe { libc::sysconf(hint) } {
        -1 => 1024,
        size => size as usize,
    };
    vec![0; size.max(64)]
}

#[cfg(test)]
mod test_unix {
    use crate::backend::NativeBackend;
    use crate::meta::MetaField;
    use crate::permissions::{PermClass, Permissions};

    use super::*;

    #[test]
    fn stat_answers_the_full_posix_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("f.txt");
        fs::write(&file, b"hello").expect("write");

        let backend = UnixBackend::new();
        let record = backend
            .stat(&file.to_string_lossy(), false)
            .expect("stats");
        assert!(record.answers.contains(MetaField::POSIX_STAT_FIELDS));
        assert!(record.file);
        assert!(!record.directory);
        assert_eq!(record.size, 5);
        assert!(record.modified > 0);
    }

    #[test]
    fn dotfiles_are_hidden() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join(".config");
        fs::write(&file, b"x").expect("write");

        let backend = UnixBackend::new();
        let record = backend.stat(&file.to_string_lossy(), false).expect("stats");
        assert!(record.hidden);
    }

    #[test]
    fn chmod_round_trips_through_query_permissions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("modes");
        fs::write(&file, b"x").expect("write");
        let path = file.to_string_lossy().into_owned();

        let backend = UnixBackend::new();
        backend
            .apply_security(&path, &NativeSecurity::Mode(0o640))
            .expect("chmod");
        let (perms, _) = backend
            .query_permissions(&path, MetaField::PERMISSIONS)
            .expect("query");
        assert_eq!(perms.granted(PermClass::Owner), (true, true, false));
        assert_eq!(perms.granted(PermClass::Group), (true, false, false));
        assert_eq!(perms.granted(PermClass::Other), (false, false, false));
        assert_eq!(perms, Permissions::from_mode(0o640));
    }

    #[test]
    fn rename_without_overwrite_refuses_existing_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"a").expect("write");
        fs::write(&b, b"b").expect("write");

        let backend = UnixBackend::new();
        let err = backend
            .rename(&a.to_string_lossy(), &b.to_string_lossy(), false)
            .unwrap_err();
        assert_eq!(err.kind(), NativeErrorKind::AlreadyExists);

        backend
            .rename(&a.to_string_lossy(), &b.to_string_lossy(), true)
            .expect("overwrite wins");
        assert_eq!(fs::read(&b).expect("read"), b"a");
    }

    #[test]
    fn symlink_records_classify_correctly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("t");
        let link = dir.path().join("l");
        fs::write(&target, b"x").expect("write");
        std::os::unix::fs::symlink(&target, &link).expect("symlink");

        let backend = UnixBackend::new();
        let lstat = backend.stat(&link.to_string_lossy(), false).expect("lstat");
        assert!(lstat.symlink && !lstat.file);

        let followed = backend.stat(&link.to_string_lossy(), true).expect("stat");
        assert!(followed.file && !followed.symlink);

        let read = backend
            .read_link_target(&link.to_string_lossy())
            .expect("readlink");
        assert_eq!(read, target.to_string_lossy());
    }

    #[test]
    fn owner_lookup_resolves_the_current_user() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("mine");
        fs::write(&file, b"x").expect("write");

        let backend = UnixBackend::new();
        let owner = backend
            .owner_name(&file.to_string_lossy(), OwnerClass::User)
            .expect("owner resolves");
        assert!(!owner.is_empty());
    }

    #[test]
    fn file_ids_are_stable_and_distinct() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"a").expect("write");
        fs::write(&b, b"b").expect("write");

        let backend = UnixBackend::new();
        let id_a = backend.file_id(&a.to_string_lossy()).expect("id");
        let id_a2 = backend.file_id(&a.to_string_lossy()).expect("id");
        let id_b = backend.file_id(&b.to_string_lossy()).expect("id");
        assert_eq!(id_a, id_a2);
        assert_ne!(id_a, id_b);
    }
}
