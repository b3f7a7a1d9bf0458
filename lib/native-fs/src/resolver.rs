//! Link target resolution.
//!
//! Produces the target of a symbolic link, junction or shell shortcut.
//! Every native failure along the chain yields the empty entry: "could not
//! resolve right now". Callers distinguish it from "not a link" because
//! the classification step already filtered that case.

use tracing::trace;

use crate::backend::{NativeBackend, NativeErrorKind};
use crate::engine::FileSystemEngine;
use crate::entry::{clean_path, FileSystemEntry};
use crate::meta::{MetaField, Metadata};
use crate::reparse;

pub(crate) fn resolve<B: NativeBackend>(
    engine: &FileSystemEngine<B>,
    entry: &FileSystemEntry,
    meta: &mut Metadata,
) -> FileSystemEntry {
    // Shell shortcuts first: their link-ness lives in the file contents,
    // not in filesystem metadata, and the metadata query path redirects
    // `.lnk` names to their targets which would misclassify them here.
    if engine.config().resolve_shortcuts() && is_shortcut_name(entry) {
        return resolve_shortcut(engine, entry);
    }

    let link_fields = MetaField::LINK_TYPE | MetaField::JUNCTION_TYPE;
    if !meta.missing(link_fields).is_empty() {
        engine.fill_link_type(entry, meta);
    }
    if !meta.known().contains(link_fields) {
        // The classification itself failed; nothing to resolve.
        return FileSystemEntry::empty();
    }
    if !meta.is_link() && !meta.is_junction() {
        return FileSystemEntry::empty();
    }

    let (raw_target, relative) = match read_target(engine.backend(), entry) {
        Some(found) => found,
        None => return FileSystemEntry::empty(),
    };

    let mut target = raw_target.replace('\\', "/");
    if let Some(resolved) = resolve_volume_guid(engine.backend(), &target) {
        target = resolved;
    }

    finish(engine, entry, target, relative)
}

fn is_shortcut_name(entry: &FileSystemEntry) -> bool {
    entry.suffix().eq_ignore_ascii_case("lnk")
}

fn resolve_shortcut<B: NativeBackend>(
    engine: &FileSystemEngine<B>,
    entry: &FileSystemEntry,
) -> FileSystemEntry {
    // Directories literally named `*.lnk` are exempt.
    if let Ok(record) = engine.backend().stat(entry.file_path(), false) {
        if record.directory {
            return FileSystemEntry::empty();
        }
    }
    match engine.backend().read_shell_link(entry.file_path()) {
        Ok(target) => {
            let target = target.replace('\\', "/");
            finish(engine, entry, target, false)
        }
        Err(err) => {
            trace!(path = entry.file_path(), %err, "shortcut target unavailable");
            FileSystemEntry::empty()
        }
    }
}

/// The raw target string plus whether it is relative to the link's
/// containing directory.
fn read_target<B: NativeBackend>(
    backend: &B,
    entry: &FileSystemEntry,
) -> Option<(String, bool)> {
    match backend.read_link_target(entry.file_path()) {
        Ok(target) => {
            let relative = FileSystemEntry::new(target.replace('\\', "/")).is_relative();
            return Some((target, relative));
        }
        Err(err) if err.kind() != NativeErrorKind::Unsupported => {
            trace!(path = entry.file_path(), %err, "link target unavailable");
            return None;
        }
        Err(_) => {}
    }

    let buffer = match backend.read_reparse_data(entry.file_path()) {
        Ok(buffer) => buffer,
        Err(err) => {
            trace!(path = entry.file_path(), %err, "reparse data unavailable");
            return None;
        }
    };
    match reparse::parse(&buffer) {
        Some(point) => {
            let relative = point.is_relative();
            Some((point.target().to_string(), relative))
        }
        None => {
            // Unknown tag or malformed buffer: the entry still exists,
            // its target just cannot be parsed.
            trace!(path = entry.file_path(), "unparseable reparse buffer");
            None
        }
    }
}

/// Maps a `Volume{GUID}/...` target to its mount point; `None` leaves the
/// GUID path as-is (the documented fallback when the volume lookup fails).
fn resolve_volume_guid<B: NativeBackend>(backend: &B, target: &str) -> Option<String> {
    let rest = target.strip_prefix("Volume{")?;
    let close = rest.find('}')?;
    let volume = &target[..("Volume{".len() + close + 1)];
    let remainder = target[volume.len()..].trim_start_matches('/');
    match backend.volume_path_name(volume) {
        Ok(mount) => {
            let mount = mount.replace('\\', "/");
            let mount = mount.trim_end_matches('/');
            Some(if remainder.is_empty() {
                format!("{mount}/")
            } else {
                format!("{mount}/{remainder}")
            })
        }
        Err(err) => {
            trace!(volume, %err, "volume name unresolved, keeping the GUID path");
            None
        }
    }
}

/// Rebases relative targets against the absolute path of the link's
/// containing directory (not the link itself) and normalizes.
fn finish<B: NativeBackend>(
    engine: &FileSystemEngine<B>,
    entry: &FileSystemEntry,
    target: String,
    relative: bool,
) -> FileSystemEntry {
    if target.is_empty() {
        return FileSystemEntry::empty();
    }
    if !relative && FileSystemEntry::new(target.as_str()).is_absolute() {
        return FileSystemEntry::new(clean_path(&target));
    }
    let absolute_link = engine.absolute_name(entry);
    let base = absolute_link.path();
    FileSystemEntry::new(clean_path(&format!("{base}/{target}")))
}

#[cfg(test)]
mod test_resolver {
    use crate::backend::mem::{MemBackend, MemOp};
    use crate::backend::NativeErrorKind;
    use crate::engine::FileSystemEngine;
    use crate::meta::Metadata;
    use crate::reparse::ReparsePoint;
    use crate::FileSystemEntry;

    fn engine(fs: MemBackend) -> FileSystemEngine<MemBackend> {
        FileSystemEngine::new(fs)
    }

    #[test]
    fn relative_target_rebases_against_the_containing_directory() {
        let fs = MemBackend::new();
        fs.add_dir("/a/b");
        fs.add_dir("/a/c");
        fs.add_symlink("/a/b/link", "../c");

        let engine = engine(fs);
        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/a/b/link"), &mut meta);
        assert_eq!(target.file_path(), "/a/c");
    }

    #[test]
    fn not_a_link_resolves_to_empty() {
        let fs = MemBackend::new();
        fs.add_file("/plain", 1);

        let engine = engine(fs);
        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/plain"), &mut meta);
        assert!(target.is_empty());
    }

    #[test]
    fn reparse_buffers_serve_windows_style_links() {
        let fs = MemBackend::new();
        fs.windows_semantics();
        fs.add_dir("/mnt/data");
        fs.add_junction("/junction", "/mnt/data");

        let engine = engine(fs);
        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/junction"), &mut meta);
        assert_eq!(target.file_path(), "/mnt/data");
    }

    #[test]
    fn unknown_reparse_tag_degrades_to_empty() {
        let fs = MemBackend::new();
        fs.windows_semantics();
        fs.add_symlink("/weird", "/target");
        let mut raw = ReparsePoint::Symlink {
            target: r"\??\C:\t".to_string(),
            print_name: String::new(),
            relative: false,
        }
        .to_buffer();
        raw[0..4].copy_from_slice(&0xA000_0777u32.to_le_bytes());
        fs.set_reparse_raw("/weird", raw);

        let engine = engine(fs);
        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/weird"), &mut meta);
        assert!(target.is_empty(), "unknown tag is a silent degrade");
    }

    #[test]
    fn volume_guid_targets_map_to_mount_points() {
        let fs = MemBackend::new();
        fs.windows_semantics();
        fs.add_symlink("/vol", "ignored");
        let raw = ReparsePoint::Symlink {
            target: r"\??\Volume{deadbeef}\sub\file".to_string(),
            print_name: String::new(),
            relative: false,
        }
        .to_buffer();
        fs.set_reparse_raw("/vol", raw);
        fs.set_volume("Volume{deadbeef}", "C:/");

        let engine = engine(fs);
        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/vol"), &mut meta);
        assert_eq!(target.file_path(), "C:/sub/file");
    }

    #[test]
    fn unresolvable_volume_keeps_the_guid_path() {
        let fs = MemBackend::new();
        fs.windows_semantics();
        fs.add_symlink("/vol", r"Volume{feed}/x");

        let engine = engine(fs);
        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/vol"), &mut meta);
        // No mapping registered: the GUID path comes through unresolved,
        // rebased (it parses as relative) but intact.
        assert!(
            target.file_path().contains("Volume{feed}/x"),
            "got {target:?}"
        );
    }

    #[test]
    fn shortcut_files_resolve_and_directories_named_lnk_do_not() {
        let fs = MemBackend::new();
        fs.add_shortcut("/sc.lnk", r"C:\real\doc.txt");
        fs.add_dir("/dir.lnk");

        let engine = engine(fs);
        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/sc.lnk"), &mut meta);
        assert_eq!(target.file_path(), "C:/real/doc.txt");

        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/dir.lnk"), &mut meta);
        assert!(target.is_empty(), "directory exemption holds");
    }

    #[test]
    fn native_failure_yields_empty_not_error() {
        let fs = MemBackend::new();
        fs.windows_semantics();
        fs.add_symlink("/link", "/t");
        fs.fail_with("/link", MemOp::Reparse, NativeErrorKind::AccessDenied);

        let engine = engine(fs);
        let mut meta = Metadata::new();
        let target = engine.read_link(&FileSystemEntry::new("/link"), &mut meta);
        assert!(target.is_empty());
    }
}
