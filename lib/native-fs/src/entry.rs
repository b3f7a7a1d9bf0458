//! The immutable path value.
//!
//! A `FileSystemEntry` stores one portable (forward-slash) path string and
//! derives everything else from it on demand: the native-separator form is
//! computed once and cached in the value, the classification predicates
//! are cheap scans. Copies are cheap and the value is safe to share
//! read-only across threads.

use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::OnceCell;

/// Paths at or beyond this length get the extended-length prefix in their
/// Windows-native form.
const WIN_LONG_PATH: usize = 260;

#[derive(Default)]
pub struct FileSystemEntry {
    file_path: String,
    native_path: OnceCell<String>,
}

impl FileSystemEntry {
    /// Builds an entry from a portable (forward-slash) path.
    pub fn new(path: impl Into<String>) -> Self {
        FileSystemEntry {
            file_path: path.into(),
            native_path: OnceCell::new(),
        }
    }

    /// Builds an entry from a native path: separators are normalized and
    /// any `\\?\` extended-length prefix is stripped.
    pub fn from_native(path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        let path = path
            .strip_prefix(r"\\?\UNC\")
            .map(|rest| format!(r"\\{rest}"))
            .unwrap_or_else(|| {
                path.strip_prefix(r"\\?\")
                    .unwrap_or(path)
                    .to_string()
            });
        FileSystemEntry::new(path.replace('\\', "/"))
    }

    pub fn empty() -> Self {
        FileSystemEntry::new("")
    }

    /// The portable form, exactly as constructed.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// The OS-native separator form, derived deterministically from the
    /// portable form, computed once and cached.
    pub fn native_path(&self) -> &str {
        self.native_path.get_or_init(|| {
            if cfg!(windows) {
                to_windows_native(&self.file_path)
            } else {
                self.file_path.clone()
            }
        })
    }

    /// Everything after the last separator; the whole path when there is
    /// no separator.
    pub fn file_name(&self) -> &str {
        match self.file_path.rfind('/') {
            Some(idx) => &self.file_path[idx + 1..],
            None => &self.file_path,
        }
    }

    /// The containing directory: `"/"` for entries directly under the
    /// root, the drive root for entries directly under one, `"."` when
    /// the path has no directory part.
    pub fn path(&self) -> &str {
        match self.file_path.rfind('/') {
            Some(0) => "/",
            Some(2) if has_drive_prefix(&self.file_path) => &self.file_path[..3],
            Some(idx) => &self.file_path[..idx],
            None => ".",
        }
    }

    /// The part of the file name after its last dot, lower-cased by the
    /// caller when needed; empty when there is no dot.
    pub fn suffix(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx + 1 < name.len() => &name[idx + 1..],
            _ => "",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file_path.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.file_path.starts_with('/') || has_drive_prefix(&self.file_path)
    }

    pub fn is_relative(&self) -> bool {
        !self.is_absolute()
    }

    /// True when the path is already in lexically normal form: cleaning it
    /// would change nothing.
    pub fn is_clean(&self) -> bool {
        !self.file_path.is_empty() && clean_path(&self.file_path) == self.file_path
    }

    /// `X:/` and nothing more.
    pub fn is_drive_root(&self) -> bool {
        let b = self.file_path.as_bytes();
        b.len() == 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && b[2] == b'/'
    }

    /// `//server/share` with exactly the two leading components.
    pub fn is_unc_share_root(&self) -> bool {
        let Some(rest) = self.file_path.strip_prefix("//") else {
            return false;
        };
        let mut parts = rest.split('/');
        matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(server), Some(share), None) if !server.is_empty() && !share.is_empty()
        )
    }

    /// A path below which nothing can be removed or created by walking up:
    /// `/`, a drive root, or a UNC share root.
    pub fn is_root(&self) -> bool {
        self.file_path == "/" || self.is_drive_root() || self.is_unc_share_root()
    }
}

impl Clone for FileSystemEntry {
    fn clone(&self) -> Self {
        FileSystemEntry {
            file_path: self.file_path.clone(),
            native_path: self.native_path.clone(),
        }
    }
}

impl PartialEq for FileSystemEntry {
    fn eq(&self, other: &Self) -> bool {
        self.file_path == other.file_path
    }
}

impl Eq for FileSystemEntry {}

impl Hash for FileSystemEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.file_path.hash(state);
    }
}

impl fmt::Debug for FileSystemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileSystemEntry")
            .field(&self.file_path)
            .finish()
    }
}

impl fmt::Display for FileSystemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_path)
    }
}

impl From<&str> for FileSystemEntry {
    fn from(path: &str) -> Self {
        FileSystemEntry::new(path)
    }
}

impl From<String> for FileSystemEntry {
    fn from(path: String) -> Self {
        FileSystemEntry::new(path)
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let b = path.as_bytes();
    b.len() >= 3 && b[0].is_ascii_alphabetic() && b[1] == b':' && b[2] == b'/'
}

/// The Windows-native rendition of a portable path: backslash separators,
/// with the extended-length prefix for paths long enough to need it.
pub(crate) fn to_windows_native(path: &str) -> String {
    let native = path.replace('/', "\\");
    if native.len() < WIN_LONG_PATH {
        return native;
    }
    if let Some(rest) = native.strip_prefix(r"\\") {
        return format!(r"\\?\UNC\{rest}");
    }
    if native.as_bytes().first().is_some_and(|b| b.is_ascii_alphabetic())
        && native.as_bytes().get(1) == Some(&b':')
    {
        return format!(r"\\?\{native}");
    }
    native
}

/// Lexically normalizes a portable path: collapses doubled separators and
/// `.` segments, folds `..` into its parent where one exists, drops any
/// trailing separator. `..` never escapes an absolute root; leading `..`
/// segments of relative paths are preserved. Drive (`X:/`) and UNC (`//`)
/// prefixes are kept intact.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let (prefix, rest) = if let Some(rest) = path.strip_prefix("//") {
        ("//", rest)
    } else if let Some(rest) = path.strip_prefix('/') {
        ("/", rest)
    } else if has_drive_prefix(path) {
        (&path[..3], &path[3..])
    } else {
        ("", path)
    };
    let absolute = !prefix.is_empty();

    let mut parts: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return if absolute {
            prefix.to_string()
        } else {
            ".".to_string()
        };
    }
    let mut out = String::with_capacity(path.len());
    out.push_str(prefix);
    out.push_str(&parts.join("/"));
    out
}

#[cfg(test)]
mod test_entry {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn clean_path_table() {
        for (input, expected) in [
            ("/a/b/c", "/a/b/c"),
            ("/a//b///c", "/a/b/c"),
            ("/a/./b", "/a/b"),
            ("/a/b/..", "/a"),
            ("/a/b/../..", "/"),
            ("/a/b/../../..", "/"),
            ("/..", "/"),
            ("a/../b", "b"),
            ("../a", "../a"),
            ("../../a", "../../a"),
            ("a/..", "."),
            ("./", "."),
            ("/a/b/", "/a/b"),
            ("C:/x/../y", "C:/y"),
            ("C:/..", "C:/"),
            ("//server/share/../x", "//server/x"),
            ("//server/share/a/./b", "//server/share/a/b"),
        ] {
            assert_eq!(clean_path(input), expected, "clean_path({input:?})");
        }
    }

    #[test]
    fn classification() {
        let abs = FileSystemEntry::new("/a/b");
        assert!(abs.is_absolute() && !abs.is_relative());

        let rel = FileSystemEntry::new("a/b");
        assert!(rel.is_relative() && !rel.is_absolute());

        let drive = FileSystemEntry::new("C:/");
        assert!(drive.is_absolute());
        assert!(drive.is_drive_root());
        assert!(drive.is_root());
        assert!(!FileSystemEntry::new("C:/x").is_drive_root());

        let unc = FileSystemEntry::new("//server/share");
        assert!(unc.is_unc_share_root());
        assert!(unc.is_root());
        assert!(!FileSystemEntry::new("//server/share/sub").is_unc_share_root());
        assert!(!FileSystemEntry::new("//server").is_unc_share_root());

        assert!(FileSystemEntry::new("/a/b").is_clean());
        assert!(!FileSystemEntry::new("/a/../b").is_clean());
        assert!(!FileSystemEntry::new("/a/b/").is_clean());
        assert!(FileSystemEntry::new("../a").is_clean());

        assert!(FileSystemEntry::empty().is_empty());
    }

    #[test]
    fn name_accessors() {
        let entry = FileSystemEntry::new("/a/b/archive.tar.gz");
        assert_eq!(entry.file_name(), "archive.tar.gz");
        assert_eq!(entry.path(), "/a/b");
        assert_eq!(entry.suffix(), "gz");

        let bare = FileSystemEntry::new("notes.txt");
        assert_eq!(bare.file_name(), "notes.txt");
        assert_eq!(bare.path(), ".");

        let top = FileSystemEntry::new("/notes.txt");
        assert_eq!(top.path(), "/");

        let drive = FileSystemEntry::new("C:/notes.txt");
        assert_eq!(drive.path(), "C:/");
        assert_eq!(FileSystemEntry::new("C:/a/b").path(), "C:/a");

        assert_eq!(FileSystemEntry::new("/a/b/noext").suffix(), "");
        assert_eq!(FileSystemEntry::new("/a/b/dotfile.").suffix(), "");
    }

    #[test]
    fn native_form_is_cached_and_deterministic() {
        let entry = FileSystemEntry::new("/a/b");
        let first = entry.native_path() as *const str;
        let second = entry.native_path() as *const str;
        assert_eq!(first, second, "second call reuses the cached form");
    }

    #[test]
    fn windows_native_conversion() {
        assert_eq!(to_windows_native("C:/a/b"), r"C:\a\b");
        assert_eq!(to_windows_native("//server/share/x"), r"\\server\share\x");

        let long_tail = "x".repeat(300);
        let long = format!("C:/{long_tail}");
        assert!(to_windows_native(&long).starts_with(r"\\?\C:\"));
        let long_unc = format!("//server/share/{long_tail}");
        assert!(to_windows_native(&long_unc).starts_with(r"\\?\UNC\server\"));
    }

    #[test]
    fn from_native_round_trip() {
        assert_eq!(
            FileSystemEntry::from_native(r"C:\a\b").file_path(),
            "C:/a/b"
        );
        assert_eq!(
            FileSystemEntry::from_native(r"\\?\C:\a").file_path(),
            "C:/a"
        );
        assert_eq!(
            FileSystemEntry::from_native(r"\\?\UNC\server\share").file_path(),
            "//server/share"
        );
    }
}
