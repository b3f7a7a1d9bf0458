//! The abstract native OS surface.
//!
//! The engine is written against [`NativeBackend`]; a real implementation
//! binds one platform's syscalls ([`unix::UnixBackend`],
//! [`windows::WindowsBackend`]) and [`mem::MemBackend`] binds an in-memory
//! tree for deterministic tests and hosts without a native filesystem.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::acl::Acl;
use crate::meta::MetaField;
use crate::permissions::Permissions;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        pub mod unix;
        pub use unix::UnixBackend as HostBackend;
    } else if #[cfg(windows)] {
        pub mod windows;
        pub use windows::WindowsBackend as HostBackend;
    } else {
        pub use mem::MemBackend as HostBackend;
    }
}

pub mod mem;

/// Portable classification of a native failure; the `domain` half of the
/// `(code, domain)` error pair.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum NativeErrorKind {
    #[error("entry not found")]
    NotFound,
    /// A parent component of the path is missing.
    #[error("path not found")]
    PathNotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("sharing violation")]
    SharingViolation,
    /// Credentials for a network resource were rejected.
    #[error("logon failure")]
    LogonFailure,
    /// The network path is unreachable.
    #[error("bad network path")]
    BadNetPath,
    #[error("already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("not a directory")]
    NotADirectory,
    /// The operation was refused by a caller-supplied decision point.
    #[error("vetoed")]
    Vetoed,
    #[error("not supported")]
    Unsupported,
    /// Anything else; the raw code is the only detail.
    #[error("io failure")]
    Io,
}

/// A native call failure: the classification plus the raw OS error code
/// (`errno` / `GetLastError` value; 0 when there is none).
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("{kind} (os error {code})")]
pub struct NativeError {
    kind: NativeErrorKind,
    code: i32,
}

impl NativeError {
    pub fn new(kind: NativeErrorKind, code: i32) -> Self {
        NativeError { kind, code }
    }

    pub fn kind(&self) -> NativeErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

impl From<io::Error> for NativeError {
    fn from(err: io::Error) -> Self {
        let code = err.raw_os_error().unwrap_or(0);
        let kind = match err.kind() {
            io::ErrorKind::NotFound => NativeErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => NativeErrorKind::AccessDenied,
            io::ErrorKind::AlreadyExists => NativeErrorKind::AlreadyExists,
            io::ErrorKind::DirectoryNotEmpty => NativeErrorKind::DirectoryNotEmpty,
            io::ErrorKind::NotADirectory => NativeErrorKind::NotADirectory,
            io::ErrorKind::Unsupported => NativeErrorKind::Unsupported,
            _ => NativeErrorKind::Io,
        };
        NativeError { kind, code }
    }
}

impl From<NativeError> for crate::FsError {
    fn from(err: NativeError) -> Self {
        match err.kind {
            NativeErrorKind::NotFound | NativeErrorKind::PathNotFound | NativeErrorKind::BadNetPath => {
                crate::FsError::EntryNotFound
            }
            NativeErrorKind::AccessDenied
            | NativeErrorKind::SharingViolation
            | NativeErrorKind::LogonFailure => crate::FsError::PermissionDenied,
            NativeErrorKind::AlreadyExists => crate::FsError::AlreadyExists,
            NativeErrorKind::DirectoryNotEmpty => crate::FsError::DirectoryNotEmpty,
            NativeErrorKind::NotADirectory => crate::FsError::NotADirectory,
            NativeErrorKind::Vetoed => crate::FsError::TrashVetoed,
            NativeErrorKind::Unsupported => crate::FsError::Unsupported,
            NativeErrorKind::Io => match err.code {
                0 => crate::FsError::IOError,
                code => crate::FsError::Native(code),
            },
        }
    }
}

/// What one native metadata call answered, normalized. The `answers` mask
/// names exactly the groups the call could fill; everything outside it is
/// garbage and must not be copied.
#[derive(Debug, Clone)]
pub struct StatRecord {
    pub answers: MetaField,
    pub file: bool,
    pub directory: bool,
    pub symlink: bool,
    pub junction: bool,
    pub hidden: bool,
    pub read_only: bool,
    /// POSIX permission bits when the call answers permission classes.
    pub mode: u32,
    pub size: u64,
    /// Nanoseconds since the UNIX epoch; 0 when the platform has no value.
    pub birth: u64,
    pub changed: u64,
    pub modified: u64,
    pub accessed: u64,
}

impl Default for StatRecord {
    fn default() -> Self {
        StatRecord {
            answers: MetaField::empty(),
            file: false,
            directory: false,
            symlink: false,
            junction: false,
            hidden: false,
            read_only: false,
            mode: 0,
            size: 0,
            birth: 0,
            changed: 0,
            modified: 0,
            accessed: 0,
        }
    }
}

/// Probe flavor for [`NativeBackend::access_probe`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
    Exists,
    Read,
    Write,
    Execute,
}

/// Which timestamp [`NativeBackend::set_file_time`] writes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WhichTime {
    Access,
    Modification,
    Birth,
}

/// Which principal [`NativeBackend::owner_name`] resolves.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OwnerClass {
    User,
    Group,
}

/// Whether a trash operation would recycle the entry or destroy it; fed to
/// the pre-delete decision sink.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrashDisposition {
    Recycle,
    Delete,
}

/// The opaque native access-control value built once per engine operation
/// and passed by reference into the one call that consumes it.
#[derive(Debug, Clone)]
pub enum NativeSecurity {
    Mode(u32),
    Acl(Acl),
}

impl NativeSecurity {
    pub fn from_permissions(perms: Permissions, directory: bool, acl: bool) -> Self {
        if acl {
            NativeSecurity::Acl(crate::acl::build_acl(perms, directory))
        } else {
            NativeSecurity::Mode(perms.to_mode())
        }
    }
}

/// Stable identity of a file: volume plus per-volume index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileId {
    pub volume: u64,
    pub index: u64,
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.volume, self.index)
    }
}

/// The pre-delete decision sink of the trash operation. Invoked
/// synchronously; returning `false` aborts the operation without touching
/// the entry.
pub type TrashSink<'a> = &'a mut dyn FnMut(&str, TrashDisposition) -> bool;

/// One platform's native filesystem surface. All paths are portable
/// (forward-slash) strings; implementations convert to their native form
/// at the boundary.
///
/// Calls block until the OS answers; failures come back as the portable
/// [`NativeError`] pair, classified at the call site.
pub trait NativeBackend {
    /// The stat-equivalent. With `follow` the record describes the link
    /// target; without it, the link itself (`lstat` semantics).
    fn stat(&self, path: &str, follow: bool) -> Result<StatRecord, NativeError>;

    /// A directory-enumeration record for exactly this name, used as the
    /// access-denied fallback. Answers a subset of what [`stat`] answers.
    ///
    /// [`stat`]: Self::stat
    fn find_entry(&self, path: &str) -> Result<StatRecord, NativeError>;

    fn read_dir(&self, path: &str) -> Result<Vec<(String, StatRecord)>, NativeError>;

    /// Cheap capability probe (`access(2)` flavor); never errors, a failed
    /// probe is simply `false`.
    fn access_probe(&self, path: &str, mode: AccessMode) -> bool;

    /// The direct symlink target where the platform exposes one
    /// (`readlink(2)`); platforms that only speak reparse buffers return
    /// `Unsupported`.
    fn read_link_target(&self, path: &str) -> Result<String, NativeError>;

    /// The raw reparse-point data buffer.
    fn read_reparse_data(&self, path: &str) -> Result<Vec<u8>, NativeError>;

    /// The target recorded in a shell shortcut file.
    fn read_shell_link(&self, path: &str) -> Result<String, NativeError>;

    /// Maps a `Volume{GUID}` path to its drive letter or mount point.
    fn volume_path_name(&self, volume_path: &str) -> Result<String, NativeError>;

    /// Whether permission queries go through real access control; when
    /// false the engine derives permissions heuristically.
    fn supports_acl(&self) -> bool;

    /// Reads the permission classes named by `classes`; the returned mask
    /// names the classes actually answered (may be a subset).
    fn query_permissions(
        &self,
        path: &str,
        classes: MetaField,
    ) -> Result<(Permissions, MetaField), NativeError>;

    fn prepare_security(&self, perms: Permissions, directory: bool) -> NativeSecurity {
        NativeSecurity::from_permissions(perms, directory, self.supports_acl())
    }

    fn apply_security(&self, path: &str, security: &NativeSecurity) -> Result<(), NativeError>;

    fn create_dir(
        &self,
        path: &str,
        security: Option<&NativeSecurity>,
    ) -> Result<(), NativeError>;

    fn remove_dir(&self, path: &str) -> Result<(), NativeError>;

    fn remove_file(&self, path: &str) -> Result<(), NativeError>;

    /// Copies a regular file; fails with `AlreadyExists` when the target
    /// is present.
    fn copy_file(&self, from: &str, to: &str) -> Result<(), NativeError>;

    fn rename(&self, from: &str, to: &str, overwrite: bool) -> Result<(), NativeError>;

    fn set_file_time(&self, path: &str, nanos: u64, which: WhichTime)
        -> Result<(), NativeError>;

    fn owner_name(&self, path: &str, class: OwnerClass) -> Result<String, NativeError>;

    fn file_id(&self, path: &str) -> Result<FileId, NativeError>;

    /// Fully resolved path with every link followed; fails when the entry
    /// does not exist.
    fn canonicalize(&self, path: &str) -> Result<String, NativeError>;

    /// Moves the entry to the platform trash and returns its new location
    /// (empty when the platform cannot report one). The sink is consulted
    /// exactly once before anything is touched.
    fn trash(&self, path: &str, sink: TrashSink<'_>) -> Result<String, NativeError>;
}
