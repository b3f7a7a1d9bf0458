//! Cross-platform filesystem entry, metadata and query engine.
//!
//! The crate reconciles divergent native filesystem APIs (POSIX stat/mode
//! bits, Win32 file attributes, NTFS ACLs, reparse points, shell shortcuts)
//! behind one uniform, cacheable metadata model:
//!
//! * [`FileSystemEntry`]: an immutable path value with lazily computed
//!   derived forms.
//! * [`Metadata`]: a per-query bag of attribute results with an explicit
//!   known-flags mask, so the engine never re-issues a native call for data
//!   it already has.
//! * [`FileSystemEngine`]: the façade over a swappable
//!   [`NativeBackend`](backend::NativeBackend): metadata fill with a
//!   documented fallback chain, directory creation/removal, link
//!   resolution, permission translation, trash, ownership and identity
//!   queries.
//!
//! All operations are synchronous and may block on native I/O. There is no
//! internal threading and no cross-call cache; callers that want caching
//! keep the [`Metadata`] value themselves.

use std::io;

use thiserror::Error;

pub mod acl;
pub mod backend;
mod engine;
mod entry;
mod meta;
mod permissions;
pub mod reparse;
mod resolver;
pub mod shell_link;

pub use engine::{EngineConfig, FileSystemEngine, HostEngine};
pub use entry::{clean_path, FileSystemEntry};
pub use meta::{EntryFlags, MetaField, Metadata};
pub use permissions::{PermClass, Permissions};

pub type Result<T, E = FsError> = std::result::Result<T, E>;

/// Error type for external users.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    /// The requested file or directory could not be found
    #[error("entry not found")]
    EntryNotFound,
    /// A parent component of the path does not exist or is not a directory
    #[error("base not a directory")]
    BaseNotDirectory,
    /// Expected a file but found not a file
    #[error("not a file")]
    NotAFile,
    /// A path component that had to be a directory is not one
    #[error("not a directory")]
    NotADirectory,
    /// File exists
    #[error("file exists")]
    AlreadyExists,
    /// The directory could not be removed because it still has entries
    #[error("directory not empty")]
    DirectoryNotEmpty,
    /// Caller was not allowed to perform this operation
    #[error("permission denied")]
    PermissionDenied,
    /// The provided data is invalid
    #[error("invalid input")]
    InvalidInput,
    /// Invalid internal data, if the argument data is invalid, use `InvalidInput`
    #[error("invalid internal data")]
    InvalidData,
    /// The operation was interrupted before it could finish
    #[error("operation interrupted")]
    Interrupted,
    /// The trash operation was refused at the pre-delete decision point
    /// because the entry would have been deleted instead of recycled
    #[error("trash operation vetoed")]
    TrashVetoed,
    /// The backend has no native facility for the requested operation
    #[error("operation not supported on this platform")]
    Unsupported,
    /// Something failed when doing IO. These errors can generally not be handled.
    /// It may work if tried again.
    #[error("io error")]
    IOError,
    /// A native call failed with an OS error code that has no portable
    /// classification
    #[error("native call failed (os error {0})")]
    Native(i32),
    /// Some other unhandled error. If you see this, it's probably a bug.
    #[error("unknown error found")]
    UnknownError,
}

impl From<io::Error> for FsError {
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            io::ErrorKind::Interrupted => FsError::Interrupted,
            io::ErrorKind::InvalidData => FsError::InvalidData,
            io::ErrorKind::InvalidInput => FsError::InvalidInput,
            io::ErrorKind::NotFound => FsError::EntryNotFound,
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            io::ErrorKind::Other => FsError::IOError,
            _ => match io_error.raw_os_error() {
                Some(code) => FsError::Native(code),
                None => FsError::UnknownError,
            },
        }
    }
}

#[cfg(test)]
mod test_errors {
    use super::*;

    #[test]
    fn io_error_classification() {
        let not_found = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(FsError::from(not_found), FsError::EntryNotFound);

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(FsError::from(denied), FsError::PermissionDenied);
    }

    #[test]
    fn unmapped_io_error_keeps_the_os_code() {
        let raw = io::Error::from_raw_os_error(122);
        let err = FsError::from(raw);
        // 122 (EDQUOT on Linux) has no portable bucket of its own.
        assert!(matches!(err, FsError::Native(122) | FsError::IOError));
    }
}
