//! Error taxonomy for the engine, mapped to POSIX errno values at the
//! bridge boundary.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WfsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("file exists")]
    AlreadyExists,
    #[error("no space left on device")]
    NoSpace,
    #[error("no such attribute")]
    NoXattr,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("result too large for buffer")]
    RangeError,
    #[error("operation not permitted")]
    PermissionDenied,
    #[error("out of memory")]
    OutOfMemory,
    /// Not part of the spec's taxonomy: an unexpected failure talking to
    /// the backing store itself (the engine assumes host durability and
    /// has no recovery path for this beyond surfacing it to the caller).
    #[error("I/O error")]
    Io,
}

impl WfsError {
    /// Maps a variant to the negative errno value the bridge returns.
    pub fn to_errno(self) -> i32 {
        match self {
            WfsError::NotFound => libc::ENOENT,
            WfsError::NotADirectory => libc::ENOTDIR,
            WfsError::IsADirectory => libc::EISDIR,
            WfsError::AlreadyExists => libc::EEXIST,
            WfsError::NoSpace => libc::ENOSPC,
            WfsError::NoXattr => libc::ENODATA,
            WfsError::InvalidArgument => libc::EINVAL,
            WfsError::RangeError => libc::ERANGE,
            WfsError::PermissionDenied => libc::EPERM,
            WfsError::OutOfMemory => libc::ENOMEM,
            WfsError::Io => libc::EIO,
        }
    }
}

pub type Result<T> = core::result::Result<T, WfsError>;
