//! The engine façade.
//!
//! One coherent API over the entry/metadata/translator/resolver pieces,
//! talking to a swappable [`NativeBackend`]. Operations are synchronous;
//! retries never go beyond the documented fallback chain: native
//! filesystem calls are assumed to fail deterministically given the same
//! conditions.

use tracing::{debug, trace};

use crate::backend::{
    AccessMode, FileId, HostBackend, NativeBackend, NativeError, NativeErrorKind, OwnerClass,
    StatRecord, TrashDisposition, WhichTime,
};
use crate::entry::{clean_path, FileSystemEntry};
use crate::meta::{MetaField, Metadata};
use crate::permissions::{PermClass, Permissions};
use crate::resolver;
use crate::{FsError, Result};

/// Suffixes the no-ACL permission heuristic treats as executable.
const EXECUTABLE_SUFFIXES: [&str; 5] = ["exe", "com", "bat", "pif", "cmd"];

/// Engine behavior toggles.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    acl_lookup: bool,
    resolve_shortcuts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            acl_lookup: true,
            resolve_shortcuts: true,
        }
    }
}

impl EngineConfig {
    pub const fn acl_lookup(&self) -> bool {
        self.acl_lookup
    }

    pub const fn resolve_shortcuts(&self) -> bool {
        self.resolve_shortcuts
    }

    /// Disables security-descriptor permission queries; permissions are
    /// then derived from attributes and probes alone.
    pub fn with_acl_lookup(mut self, acl_lookup: bool) -> Self {
        self.acl_lookup = acl_lookup;
        self
    }

    /// Disables transparent `.lnk` shortcut redirection.
    pub fn with_resolve_shortcuts(mut self, resolve_shortcuts: bool) -> Self {
        self.resolve_shortcuts = resolve_shortcuts;
        self
    }
}

/// The metadata fill state machine. Fallbacks run in a fixed, auditable
/// order; which one is attempted depends on the failing call's error
/// classification.
enum FillState {
    NotQueried,
    NativeCallAttempted(NativeError),
    FallbackAttempted,
    Satisfied,
    Failed,
}

/// The engine over the host platform's backend.
pub type HostEngine = FileSystemEngine<HostBackend>;

pub struct FileSystemEngine<B = HostBackend> {
    backend: B,
    config: EngineConfig,
}

impl FileSystemEngine<HostBackend> {
    /// An engine bound to this platform's native backend.
    pub fn host() -> Self {
        FileSystemEngine::new(HostBackend::default())
    }
}

impl<B: NativeBackend> FileSystemEngine<B> {
    pub fn new(backend: B) -> Self {
        FileSystemEngine {
            backend,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(backend: B, config: EngineConfig) -> Self {
        FileSystemEngine { backend, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Fills the requested attribute groups, issuing the minimal native
    /// calls. Returns true iff every requested group is now known and the
    /// entry exists (existence is implicitly requested by everything).
    ///
    /// Groups already known are never re-queried; pass a fresh or
    /// explicitly cleared [`Metadata`] to force a re-read.
    pub fn fill_metadata(
        &self,
        entry: &FileSystemEntry,
        meta: &mut Metadata,
        wanted: MetaField,
    ) -> bool {
        if entry.is_empty() {
            return false;
        }
        let mut wanted = wanted & MetaField::ALL;
        if wanted.is_empty() {
            return true;
        }
        wanted |= MetaField::EXISTS_ATTRIBUTE;
        if meta.missing(wanted).is_empty() {
            return meta.has_flags(wanted);
        }

        // Shell shortcuts are queried through their targets; directories
        // literally named `*.lnk` are exempt.
        let queried = self
            .shortcut_target(entry)
            .unwrap_or_else(|| entry.clone());
        let path = queried.file_path();

        let mut state = FillState::NotQueried;
        loop {
            state = match state {
                FillState::NotQueried => match self.backend.stat(path, false) {
                    Ok(record) => self.fill_primary(path, meta, &record),
                    Err(err) => {
                        trace!(path, %err, "native stat failed");
                        FillState::NativeCallAttempted(err)
                    }
                },
                FillState::NativeCallAttempted(err) => match err.kind() {
                    // A disconnected network drive rejects everything at
                    // logon; the path shape is the only evidence left.
                    NativeErrorKind::LogonFailure | NativeErrorKind::BadNetPath => {
                        if queried.is_drive_root() || path.starts_with("//") {
                            debug!(path, "disconnected network fallback");
                            meta.fill_from(&root_record());
                            FillState::Satisfied
                        } else {
                            FillState::FallbackAttempted
                        }
                    }
                    // Opening the entry is forbidden, but its parent may
                    // still enumerate it.
                    NativeErrorKind::AccessDenied | NativeErrorKind::SharingViolation => {
                        match self.backend.find_entry(path) {
                            Ok(record) => {
                                debug!(path, "directory enumeration fallback");
                                meta.fill_from(&record);
                                FillState::Satisfied
                            }
                            Err(err) => {
                                trace!(path, %err, "enumeration fallback failed");
                                FillState::FallbackAttempted
                            }
                        }
                    }
                    NativeErrorKind::NotFound | NativeErrorKind::PathNotFound => {
                        FillState::FallbackAttempted
                    }
                    _ => FillState::Failed,
                },
                // Drive and share roots often refuse direct queries that
                // a bare probe still answers.
                FillState::FallbackAttempted => {
                    if (queried.is_drive_root() || queried.is_unc_share_root())
                        && self.backend.access_probe(path, AccessMode::Exists)
                    {
                        debug!(path, "root existence heuristic");
                        meta.fill_from(&root_record());
                        FillState::Satisfied
                    } else {
                        FillState::Failed
                    }
                }
                FillState::Satisfied => break,
                FillState::Failed => {
                    meta.mark_absent(wanted);
                    break;
                }
            };
        }

        let missing_permissions = meta.missing(wanted) & MetaField::PERMISSIONS;
        if !missing_permissions.is_empty() && meta.has_flags(MetaField::EXISTS_ATTRIBUTE) {
            self.fill_permissions(&queried, meta, missing_permissions);
        }
        meta.has_flags(wanted)
    }

    /// Handles a successful primary record: symlinks describe themselves
    /// through the link-type bits but everything else through their
    /// target, so they trigger the one follow-up call.
    fn fill_primary(
        &self,
        path: &str,
        meta: &mut Metadata,
        record: &StatRecord,
    ) -> FillState {
        if !record.symlink {
            meta.fill_from(record);
            return FillState::Satisfied;
        }

        let mut link_view = record.clone();
        link_view.answers &= MetaField::LINK_TYPE
            | MetaField::JUNCTION_TYPE
            | MetaField::HIDDEN_ATTRIBUTE;
        meta.fill_from(&link_view);

        match self.backend.stat(path, true) {
            Ok(target) => {
                let mut target_view = target;
                target_view.answers -= MetaField::LINK_TYPE | MetaField::JUNCTION_TYPE;
                meta.fill_from(&target_view);
                FillState::Satisfied
            }
            Err(err)
                if matches!(
                    err.kind(),
                    NativeErrorKind::NotFound | NativeErrorKind::PathNotFound
                ) =>
            {
                trace!(path, "dangling link");
                FillState::Failed
            }
            Err(err) => FillState::NativeCallAttempted(err),
        }
    }

    /// Permission classes the stat pass could not answer: the security
    /// descriptor where the backend has one, the attribute heuristic
    /// otherwise.
    fn fill_permissions(
        &self,
        entry: &FileSystemEntry,
        meta: &mut Metadata,
        which: MetaField,
    ) {
        if self.config.acl_lookup && self.backend.supports_acl() {
            match self.backend.query_permissions(entry.file_path(), which) {
                Ok((perms, answered)) => {
                    meta.fill_permissions(perms, answered & which);
                    let rest = which - answered;
                    if !rest.is_empty() {
                        self.heuristic_permissions(entry, meta, rest);
                    }
                    return;
                }
                Err(err) => {
                    debug!(path = entry.file_path(), %err, "acl query failed, using heuristic");
                }
            }
        }
        self.heuristic_permissions(entry, meta, which);
    }

    /// The no-ACL permission model: readable by everyone; writable unless
    /// the read-only attribute is set; executable for a fixed suffix set
    /// and for directories; the user class refined by access probes.
    fn heuristic_permissions(
        &self,
        entry: &FileSystemEntry,
        meta: &mut Metadata,
        which: MetaField,
    ) {
        let read_only =
            meta.known().contains(MetaField::READONLY_ATTRIBUTE) && meta.is_read_only();
        let directory = meta.known().contains(MetaField::FILE_TYPE) && meta.is_directory();
        let executable = directory
            || EXECUTABLE_SUFFIXES
                .iter()
                .any(|suffix| entry.suffix().eq_ignore_ascii_case(suffix));

        let mut perms = Permissions::ALL_READ;
        if !read_only {
            perms |= Permissions::ALL_WRITE;
        }
        if executable {
            perms |= Permissions::ALL_EXEC;
        }

        if which.contains(MetaField::USER_PERMISSIONS) {
            let path = entry.file_path();
            let read = self.backend.access_probe(path, AccessMode::Read);
            let write = self.backend.access_probe(path, AccessMode::Write);
            perms = (perms - Permissions::USER_MASK)
                | Permissions::class(PermClass::User, read, write, executable);
        }
        meta.fill_permissions(perms, which);
    }

    fn shortcut_target(&self, entry: &FileSystemEntry) -> Option<FileSystemEntry> {
        if !self.config.resolve_shortcuts || !entry.suffix().eq_ignore_ascii_case("lnk") {
            return None;
        }
        if let Ok(record) = self.backend.stat(entry.file_path(), false) {
            if record.directory {
                return None;
            }
        }
        match self.backend.read_shell_link(entry.file_path()) {
            Ok(target) => {
                let target = clean_path(&target.replace('\\', "/"));
                Some(FileSystemEntry::new(target))
            }
            Err(err) => {
                trace!(path = entry.file_path(), %err, "shortcut redirection unavailable");
                None
            }
        }
    }

    pub(crate) fn fill_link_type(&self, entry: &FileSystemEntry, meta: &mut Metadata) {
        self.fill_metadata(
            entry,
            meta,
            MetaField::LINK_TYPE | MetaField::JUNCTION_TYPE | MetaField::FILE_TYPE,
        );
    }

    pub fn exists(&self, entry: &FileSystemEntry) -> bool {
        let mut meta = Metadata::new();
        self.fill_metadata(entry, &mut meta, MetaField::EXISTS_ATTRIBUTE)
    }

    /// Resolves a symlink, junction or shortcut to its target; the empty
    /// entry means "not a resolvable link right now".
    pub fn read_link(&self, entry: &FileSystemEntry, meta: &mut Metadata) -> FileSystemEntry {
        resolver::resolve(self, entry, meta)
    }

    /// Creates a directory, optionally with explicit permissions and
    /// optionally with any missing parents. The native permission object
    /// is built once and reused for every directory created. Parent
    /// creation never recurses into bare drive or UNC share roots.
    pub fn create_directory(
        &self,
        entry: &FileSystemEntry,
        create_parents: bool,
        permissions: Option<Permissions>,
    ) -> Result<()> {
        if entry.is_empty() {
            return Err(FsError::InvalidInput);
        }
        let path = clean_path(entry.file_path());
        let security = permissions.map(|perms| self.backend.prepare_security(perms, true));

        match self.backend.create_dir(&path, security.as_ref()) {
            Ok(()) => return Ok(()),
            Err(err) if !create_parents => return Err(err.into()),
            Err(err) => match err.kind() {
                NativeErrorKind::AlreadyExists => {
                    return match self.backend.stat(&path, true) {
                        Ok(record) if record.directory => Ok(()),
                        _ => Err(FsError::AlreadyExists),
                    };
                }
                NativeErrorKind::NotFound
                | NativeErrorKind::PathNotFound
                | NativeErrorKind::NotADirectory => {}
                _ => return Err(err.into()),
            },
        }

        for ancestor in ancestors(&path) {
            if FileSystemEntry::new(ancestor.as_str()).is_root() {
                continue;
            }
            match self.backend.create_dir(&ancestor, security.as_ref()) {
                Ok(()) => trace!(path = ancestor.as_str(), "created parent"),
                Err(err) if err.kind() == NativeErrorKind::AlreadyExists => {
                    match self.backend.stat(&ancestor, true) {
                        Ok(record) if record.directory => {}
                        // Something that is not a directory sits where a
                        // parent has to go.
                        _ => return Err(FsError::NotADirectory),
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        // One retry for the leaf now that the parents exist.
        self.backend
            .create_dir(&path, security.as_ref())
            .map_err(Into::into)
    }

    /// Removes a directory. With `remove_empty_parents`, walks from the
    /// leaf toward the root removing each parent that is confirmed empty,
    /// stopping at the first one that is not (still a success) and never
    /// crossing a drive or share boundary.
    pub fn remove_directory(
        &self,
        entry: &FileSystemEntry,
        remove_empty_parents: bool,
    ) -> Result<()> {
        if entry.is_empty() {
            return Err(FsError::InvalidInput);
        }
        let path = clean_path(entry.file_path());
        self.backend.remove_dir(&path).map_err(FsError::from)?;
        if !remove_empty_parents {
            return Ok(());
        }

        let mut current = FileSystemEntry::new(path);
        loop {
            let parent = current.path().to_string();
            if parent == "." || parent == current.file_path() {
                break;
            }
            let parent = FileSystemEntry::new(parent);
            if parent.is_root() {
                break;
            }
            match self.backend.read_dir(parent.file_path()) {
                Ok(entries) if entries.is_empty() => {
                    if let Err(err) = self.backend.remove_dir(parent.file_path()) {
                        trace!(path = parent.file_path(), %err, "parent sweep stopped");
                        break;
                    }
                }
                _ => break,
            }
            current = parent;
        }
        Ok(())
    }

    pub fn copy_file(&self, source: &FileSystemEntry, target: &FileSystemEntry) -> Result<()> {
        self.backend
            .copy_file(source.file_path(), target.file_path())
            .map_err(Into::into)
    }

    /// Renames without clobbering: fails if the target exists.
    pub fn rename_file(&self, source: &FileSystemEntry, target: &FileSystemEntry) -> Result<()> {
        self.backend
            .rename(source.file_path(), target.file_path(), false)
            .map_err(Into::into)
    }

    pub fn rename_overwrite_file(
        &self,
        source: &FileSystemEntry,
        target: &FileSystemEntry,
    ) -> Result<()> {
        self.backend
            .rename(source.file_path(), target.file_path(), true)
            .map_err(Into::into)
    }

    pub fn remove_file(&self, entry: &FileSystemEntry) -> Result<()> {
        self.backend
            .remove_file(entry.file_path())
            .map_err(Into::into)
    }

    /// Moves the entry to the platform trash. The default decision sink
    /// insists on recycling: if the platform would hard-delete instead,
    /// the operation aborts with [`FsError::TrashVetoed`] and nothing is
    /// touched.
    pub fn move_to_trash(&self, source: &FileSystemEntry) -> Result<FileSystemEntry> {
        self.move_to_trash_with(source, |_, disposition| {
            disposition == TrashDisposition::Recycle
        })
    }

    /// Like [`move_to_trash`](Self::move_to_trash) with a caller-supplied
    /// decision sink, invoked synchronously at the pre-delete decision
    /// point; returning false aborts.
    pub fn move_to_trash_with(
        &self,
        source: &FileSystemEntry,
        mut sink: impl FnMut(&str, TrashDisposition) -> bool,
    ) -> Result<FileSystemEntry> {
        let location = self.backend.trash(source.file_path(), &mut sink)?;
        Ok(FileSystemEntry::new(location))
    }

    /// The owning user or group name; `None` when the platform cannot
    /// resolve one.
    pub fn owner(&self, entry: &FileSystemEntry, class: OwnerClass) -> Option<String> {
        match self.backend.owner_name(entry.file_path(), class) {
            Ok(name) if !name.is_empty() => Some(name),
            Ok(_) => None,
            Err(err) => {
                trace!(path = entry.file_path(), %err, "owner lookup failed");
                None
            }
        }
    }

    /// Stable identity (volume + index) of the entry.
    pub fn id(&self, entry: &FileSystemEntry) -> Result<FileId> {
        self.backend.file_id(entry.file_path()).map_err(Into::into)
    }

    /// Fully resolved, link-free form of an existing path.
    pub fn canonical_name(&self, entry: &FileSystemEntry) -> Result<FileSystemEntry> {
        if entry.is_empty() {
            return Err(FsError::InvalidInput);
        }
        let resolved = self.backend.canonicalize(entry.file_path())?;
        Ok(FileSystemEntry::from_native(resolved))
    }

    /// Lexically absolute form of the path, rebased against the current
    /// directory when relative. Does not touch the filesystem beyond the
    /// working-directory read.
    pub fn absolute_name(&self, entry: &FileSystemEntry) -> FileSystemEntry {
        if entry.is_absolute() {
            return FileSystemEntry::new(clean_path(entry.file_path()));
        }
        let cwd = Self::current_path();
        if entry.is_empty() {
            return cwd;
        }
        FileSystemEntry::new(clean_path(&format!(
            "{}/{}",
            cwd.file_path(),
            entry.file_path()
        )))
    }

    /// Applies portable permissions; the metadata value, when given, is
    /// updated to the new state without another native query.
    pub fn set_permissions(
        &self,
        entry: &FileSystemEntry,
        permissions: Permissions,
        meta: Option<&mut Metadata>,
    ) -> Result<()> {
        let mut probe = Metadata::new();
        let directory =
            self.fill_metadata(entry, &mut probe, MetaField::FILE_TYPE) && probe.is_directory();
        let security = self.backend.prepare_security(permissions, directory);
        self.backend
            .apply_security(entry.file_path(), &security)
            .map_err(FsError::from)?;
        if let Some(meta) = meta {
            meta.clear_flags(MetaField::PERMISSIONS);
            meta.fill_permissions(permissions, MetaField::PERMISSIONS);
        }
        Ok(())
    }

    /// Writes one timestamp, nanoseconds since the UNIX epoch.
    pub fn set_file_time(
        &self,
        entry: &FileSystemEntry,
        nanos: u64,
        which: WhichTime,
    ) -> Result<()> {
        self.backend
            .set_file_time(entry.file_path(), nanos, which)
            .map_err(Into::into)
    }

    /// The process working directory as a portable entry.
    pub fn current_path() -> FileSystemEntry {
        match std::env::current_dir() {
            Ok(path) => FileSystemEntry::from_native(path.to_string_lossy().as_ref()),
            Err(_) => FileSystemEntry::new("/"),
        }
    }

    /// The user's home directory as a portable entry; empty when the
    /// environment does not name one.
    pub fn home_path() -> FileSystemEntry {
        let home = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_default();
        FileSystemEntry::from_native(home)
    }
}

/// A synthetic "this is an existing directory" record for the root
/// fallbacks, which have no stat data to offer.
fn root_record() -> StatRecord {
    StatRecord {
        answers: MetaField::WIN_ATTRIBUTE_FIELDS,
        directory: true,
        ..StatRecord::default()
    }
}

/// Proper ancestors of a clean path, shortest first; the walk stops at
/// the first root-like component (`/`, `X:/`, `//server/share`).
fn ancestors(path: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = FileSystemEntry::new(path);
    loop {
        let parent = current.path().to_string();
        if parent == "." || parent == current.file_path() {
            break;
        }
        let parent = FileSystemEntry::new(parent);
        let at_root = parent.is_root();
        chain.push(parent.file_path().to_string());
        if at_root {
            break;
        }
        current = parent;
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod test_engine {
    use crate::backend::mem::{MemBackend, MemOp};
    use crate::backend::{
        NativeBackend, NativeErrorKind, OwnerClass, TrashDisposition, WhichTime,
    };
    use crate::meta::{MetaField, Metadata};
    use crate::permissions::{PermClass, Permissions};
    use crate::{FileSystemEntry, FsError};

    use super::{ancestors, EngineConfig, FileSystemEngine};

    macro_rules! entry {
        ($path:expr) => {
            FileSystemEntry::new($path)
        };
    }

    fn engine(fs: MemBackend) -> FileSystemEngine<MemBackend> {
        FileSystemEngine::new(fs)
    }

    #[test]
    fn fill_is_idempotent_and_skips_native_calls() {
        let fs = MemBackend::new();
        fs.add_file("/data/report.txt", 512);
        fs.set_times("/data/report.txt", [1, 2, 3, 4]);
        let engine = engine(fs.clone());

        let wanted = MetaField::FILE_TYPE | MetaField::SIZE | MetaField::TIMES;
        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(&entry!("/data/report.txt"), &mut meta, wanted));
        let first_flags = meta.entry_flags();
        let calls_after_first = fs.stat_calls();

        assert!(engine.fill_metadata(&entry!("/data/report.txt"), &mut meta, wanted));
        assert_eq!(meta.entry_flags(), first_flags, "same answers both times");
        assert_eq!(
            fs.stat_calls(),
            calls_after_first,
            "second fill issues no native call"
        );
        assert_eq!(meta.size(), 512);
        assert_eq!(meta.modification_time(), 3);
    }

    #[test]
    fn access_denied_takes_the_enumeration_fallback() {
        let fs = MemBackend::new();
        fs.add_file("/guarded", 9);
        fs.fail_with("/guarded", MemOp::Stat, NativeErrorKind::AccessDenied);
        let engine = engine(fs.clone());

        let mut meta = Metadata::new();
        assert!(
            engine.fill_metadata(
                &entry!("/guarded"),
                &mut meta,
                MetaField::FILE_TYPE | MetaField::SIZE
            ),
            "enumeration fallback answers"
        );
        assert_eq!(fs.find_calls(), 1, "find fallback was used");
        assert!(meta.is_file());
        assert_eq!(meta.size(), 9);
    }

    #[test]
    fn generic_errors_skip_the_fallback_chain() {
        let fs = MemBackend::new();
        fs.add_file("/broken", 1);
        fs.fail_with("/broken", MemOp::Stat, NativeErrorKind::Io);
        let engine = engine(fs.clone());

        let mut meta = Metadata::new();
        assert!(!engine.fill_metadata(&entry!("/broken"), &mut meta, MetaField::FILE_TYPE));
        assert_eq!(
            fs.find_calls(),
            0,
            "generic failure goes straight to failed"
        );
        assert!(!meta.exists());
    }

    #[test]
    fn disconnected_drive_root_is_presumed_to_exist() {
        {
            let fs = MemBackend::new();
            fs.fail_with("X:/", MemOp::Stat, NativeErrorKind::LogonFailure);
            let engine = engine(fs);

            let mut meta = Metadata::new();
            assert!(engine.fill_metadata(&entry!("X:/"), &mut meta, MetaField::FILE_TYPE));
            assert!(meta.is_directory());
        }

        // The same error on a non-root path is not trusted.
        {
            let fs = MemBackend::new();
            fs.add_file("/x", 1);
            fs.fail_with("/x", MemOp::Stat, NativeErrorKind::LogonFailure);
            let engine = engine(fs);
            let mut meta = Metadata::new();
            assert!(!engine.fill_metadata(&entry!("/x"), &mut meta, MetaField::FILE_TYPE));
        }
    }

    #[test]
    fn share_roots_fall_back_to_a_bare_probe() {
        let fs = MemBackend::new();
        fs.add_dir("//server/share");
        fs.fail_with("//server/share", MemOp::Stat, NativeErrorKind::NotFound);
        let engine = engine(fs);

        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(
            &entry!("//server/share"),
            &mut meta,
            MetaField::FILE_TYPE
        ));
        assert!(meta.is_directory());
    }

    #[test]
    fn dangling_symlink_keeps_its_link_bit() {
        let fs = MemBackend::new();
        fs.add_symlink("/dangling", "/nowhere");
        let engine = engine(fs);

        let mut meta = Metadata::new();
        let wanted = MetaField::FILE_TYPE | MetaField::LINK_TYPE | MetaField::SIZE;
        assert!(
            !engine.fill_metadata(&entry!("/dangling"), &mut meta, wanted),
            "dangling link does not exist"
        );
        assert!(meta.is_link(), "but its link-ness is known");
        assert!(!meta.exists());
    }

    #[test]
    fn symlink_metadata_describes_the_target() {
        let fs = MemBackend::new();
        fs.add_file("/real", 1234);
        fs.add_symlink("/alias", "/real");
        let engine = engine(fs);

        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(
            &entry!("/alias"),
            &mut meta,
            MetaField::FILE_TYPE | MetaField::LINK_TYPE | MetaField::SIZE
        ));
        assert!(meta.is_link());
        assert!(meta.is_file(), "type comes from the target");
        assert_eq!(meta.size(), 1234, "size comes from the target");
    }

    #[test]
    fn shortcut_queries_redirect_to_the_target() {
        let fs = MemBackend::new();
        fs.add_file("/real.txt", 77);
        fs.add_shortcut("/doc.lnk", "/real.txt");
        let engine = engine(fs);

        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(
            &entry!("/doc.lnk"),
            &mut meta,
            MetaField::FILE_TYPE | MetaField::SIZE
        ));
        assert_eq!(meta.size(), 77);

        // With redirection off the shortcut is just a small file.
        let fs = MemBackend::new();
        fs.add_file("/real.txt", 77);
        fs.add_shortcut("/doc.lnk", "/real.txt");
        let engine = FileSystemEngine::with_config(
            fs,
            EngineConfig::default().with_resolve_shortcuts(false),
        );
        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(
            &entry!("/doc.lnk"),
            &mut meta,
            MetaField::FILE_TYPE | MetaField::SIZE
        ));
        assert_eq!(meta.size(), 0);
    }

    #[test]
    fn heuristic_permissions_follow_attributes_and_suffix() {
        let fs = MemBackend::new();
        fs.windows_semantics();
        fs.add_file("/tools/run.exe", 10);
        fs.add_file("/notes.txt", 10);
        fs.set_read_only("/notes.txt", true);
        let engine = engine(fs);

        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(
            &entry!("/tools/run.exe"),
            &mut meta,
            MetaField::PERMISSIONS
        ));
        let perms = meta.permissions();
        assert_eq!(perms.granted(PermClass::Owner), (true, true, true));
        assert_eq!(perms.granted(PermClass::Other), (true, true, true));

        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(&entry!("/notes.txt"), &mut meta, MetaField::PERMISSIONS));
        let perms = meta.permissions();
        assert_eq!(
            perms.granted(PermClass::Owner),
            (true, false, false),
            "read-only attribute blocks writes"
        );
        assert_eq!(
            perms.granted(PermClass::User),
            (true, false, false),
            "user probe agrees"
        );
    }

    #[test]
    fn acl_lookup_answers_permission_classes() {
        let fs = MemBackend::new();
        fs.windows_semantics();
        fs.enable_acl(true);
        fs.add_file("/secured", 5);
        fs.set_acl_permissions(
            "/secured",
            Permissions::OWNER_READ | Permissions::USER_READ | Permissions::GROUP_READ,
        );
        let engine = engine(fs);

        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(&entry!("/secured"), &mut meta, MetaField::PERMISSIONS));
        let perms = meta.permissions();
        assert_eq!(perms.granted(PermClass::Owner), (true, false, false));
        assert_eq!(perms.granted(PermClass::Other), (false, false, false));
    }

    #[test]
    fn create_directory_with_parents() {
        let fs = MemBackend::new();
        let engine = engine(fs.clone());

        engine
            .create_directory(&entry!("/x/y/z"), true, None)
            .expect("creates the whole chain");
        assert!(fs.contains("/x"));
        assert!(fs.contains("/x/y"));
        assert!(fs.contains("/x/y/z"));
    }

    #[test]
    fn create_directory_without_parents_fails_on_missing_chain() {
        let fs = MemBackend::new();
        let engine = engine(fs);
        let err = engine
            .create_directory(&entry!("/x/y/z"), false, None)
            .unwrap_err();
        assert_eq!(err, FsError::EntryNotFound);
    }

    #[test]
    fn create_directory_stops_at_a_file_in_the_way() {
        let fs = MemBackend::new();
        fs.add_file("/x/y", 1);
        let engine = engine(fs.clone());

        let err = engine
            .create_directory(&entry!("/x/y/z"), true, None)
            .unwrap_err();
        assert_eq!(err, FsError::NotADirectory);
        assert!(!fs.contains("/x/y/z"), "nothing was created");
    }

    #[test]
    fn create_directory_is_idempotent_with_parents() {
        {
            let fs = MemBackend::new();
            fs.add_dir("/x/y");
            let engine = engine(fs);
            engine
                .create_directory(&entry!("/x/y"), true, None)
                .expect("existing directory is fine with create_parents");
        }

        {
            let fs = MemBackend::new();
            fs.add_dir("/x/y");
            let engine = engine(fs);
            let err = engine
                .create_directory(&entry!("/x/y"), false, None)
                .unwrap_err();
            assert_eq!(err, FsError::AlreadyExists);
        }
    }

    #[test]
    fn create_directory_applies_permissions_to_every_level() {
        let fs = MemBackend::new();
        let engine = engine(fs.clone());
        engine
            .create_directory(&entry!("/a/b"), true, Some(Permissions::from_mode(0o700)))
            .expect("creates");
        let record = fs.stat("/a", false).expect("parent");
        assert_eq!(record.mode & 0o777, 0o700);
        let record = fs.stat("/a/b", false).expect("leaf");
        assert_eq!(record.mode & 0o777, 0o700);
    }

    #[test]
    fn remove_directory_sweeps_empty_parents_and_stops() {
        let fs = MemBackend::new();
        fs.add_dir("/keep/empty/leaf");
        fs.add_file("/keep/resident.txt", 1);
        let engine = engine(fs.clone());

        engine
            .remove_directory(&entry!("/keep/empty/leaf"), true)
            .expect("partial success");
        assert!(!fs.contains("/keep/empty/leaf"));
        assert!(!fs.contains("/keep/empty"), "empty parent swept");
        assert!(fs.contains("/keep"), "non-empty parent survives");
        assert!(fs.contains("/keep/resident.txt"));
    }

    #[test]
    fn remove_directory_requires_the_leaf_to_go() {
        let fs = MemBackend::new();
        fs.add_file("/dir/file", 1);
        let engine = engine(fs);
        let err = engine
            .remove_directory(&entry!("/dir"), true)
            .unwrap_err();
        assert_eq!(err, FsError::DirectoryNotEmpty);
    }

    #[test]
    fn rename_refuses_to_clobber_without_overwrite() {
        let fs = MemBackend::new();
        fs.add_file("/a", 1);
        fs.add_file("/b", 2);
        let engine = engine(fs.clone());

        let err = engine.rename_file(&entry!("/a"), &entry!("/b")).unwrap_err();
        assert_eq!(err, FsError::AlreadyExists);

        engine
            .rename_overwrite_file(&entry!("/a"), &entry!("/b"))
            .expect("overwrite variant succeeds");
        assert!(!fs.contains("/a"));
    }

    #[test]
    fn trash_veto_blocks_hard_deletes() {
        let fs = MemBackend::new();
        fs.add_file("/precious", 1);
        fs.set_trash_disposition(TrashDisposition::Delete);
        let engine = engine(fs.clone());

        let err = engine.move_to_trash(&entry!("/precious")).unwrap_err();
        assert_eq!(err, FsError::TrashVetoed);
        assert!(fs.contains("/precious"));

        fs.set_trash_disposition(TrashDisposition::Recycle);
        let location = engine.move_to_trash(&entry!("/precious")).expect("recycled");
        assert!(!location.is_empty());
        assert!(!fs.contains("/precious"));
    }

    #[test]
    fn owner_and_id_queries() {
        let fs = MemBackend::new();
        fs.add_file("/owned", 1);
        fs.set_owner_names("/owned", "alice", "staff");
        let engine = engine(fs);

        assert_eq!(
            engine.owner(&entry!("/owned"), OwnerClass::User).as_deref(),
            Some("alice")
        );
        assert_eq!(
            engine.owner(&entry!("/owned"), OwnerClass::Group).as_deref(),
            Some("staff")
        );
        assert!(engine.owner(&entry!("/absent"), OwnerClass::User).is_none());

        let id = engine.id(&entry!("/owned")).expect("id");
        let same = engine.id(&entry!("/owned")).expect("id again");
        assert_eq!(id, same, "identity is stable");
    }

    #[test]
    fn canonical_name_resolves_links_and_dots() {
        let fs = MemBackend::new();
        fs.add_file("/real/file", 1);
        fs.add_symlink("/alias", "/real/file");
        let engine = engine(fs);

        let canonical = engine
            .canonical_name(&entry!("/alias"))
            .expect("canonicalizes");
        assert_eq!(canonical.file_path(), "/real/file");

        let canonical = engine
            .canonical_name(&entry!("/real/../real/file"))
            .expect("canonicalizes");
        assert_eq!(canonical.file_path(), "/real/file");

        assert!(engine.canonical_name(&entry!("/missing")).is_err());
    }

    #[test]
    fn set_permissions_updates_backend_and_metadata() {
        let fs = MemBackend::new();
        fs.add_file("/f", 1);
        let engine = engine(fs.clone());

        let mut meta = Metadata::new();
        engine
            .fill_metadata(&entry!("/f"), &mut meta, MetaField::PERMISSIONS)
            .then_some(())
            .expect("initial fill");

        let new_perms = Permissions::from_mode(0o600);
        engine
            .set_permissions(&entry!("/f"), new_perms, Some(&mut meta))
            .expect("applies");
        assert_eq!(meta.permissions().to_mode(), 0o600);
        let record = fs.stat("/f", false).expect("stat");
        assert_eq!(record.mode & 0o777, 0o600);
    }

    #[test]
    fn set_file_time_round_trips() {
        let fs = MemBackend::new();
        fs.add_file("/stamped", 1);
        let engine = engine(fs);

        engine
            .set_file_time(&entry!("/stamped"), 9_999, WhichTime::Modification)
            .expect("sets");
        let mut meta = Metadata::new();
        assert!(engine.fill_metadata(&entry!("/stamped"), &mut meta, MetaField::TIMES));
        assert_eq!(meta.modification_time(), 9_999);
    }

    #[test]
    fn absolute_name_cleans_and_keeps_absolutes() {
        let fs = MemBackend::new();
        let engine = engine(fs);
        let absolute = engine.absolute_name(&entry!("/a/b/../c"));
        assert_eq!(absolute.file_path(), "/a/c");

        let relative = engine.absolute_name(&entry!("sub/dir"));
        assert!(relative.is_absolute());
        assert!(relative.file_path().ends_with("sub/dir"));
    }

    #[test]
    fn ancestor_chains() {
        assert_eq!(ancestors("/x/y/z"), vec!["/", "/x", "/x/y"]);
        assert_eq!(ancestors("C:/a/b"), vec!["C:/", "C:/a"]);
        assert_eq!(
            ancestors("//server/share/a"),
            vec!["//server/share"],
            "walking stops at the share root"
        );
        assert!(ancestors("/").is_empty());
    }
}
