// Errors here mirror the `-errno` convention of the C API this library
// replaces: every fallible operation reports an OS-style error number
// alongside a discriminated Rust variant callers can match on directly.

use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid name: {0}")]
    InvalidArgument(String),

    #[error("no such state: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("os error {0}")]
    Os(i32),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The positive errno this error corresponds to, per the taxonomy a
    /// caller coming from the C API would expect.
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::NotFound(_) => libc::ENOENT,
            Error::PermissionDenied(_) => libc::EPERM,
            Error::OutOfMemory => libc::ENOMEM,
            Error::Os(e) => *e,
        }
    }

    /// The `-errno` value the original C functions returned on failure.
    pub fn neg_errno(&self) -> i32 {
        -self.errno()
    }

    pub(crate) fn log(self) -> Self {
        error!(errno = self.errno(), "{}", self);
        self
    }
}

pub fn invalid_argument(msg: impl Into<String>) -> Error {
    Error::InvalidArgument(msg.into()).log()
}

pub fn not_found(msg: impl Into<String>) -> Error {
    Error::NotFound(msg.into()).log()
}

pub fn permission_denied(msg: impl Into<String>) -> Error {
    Error::PermissionDenied(msg.into()).log()
}

pub fn out_of_memory() -> Error {
    Error::OutOfMemory.log()
}

pub fn os_error(errno: i32) -> Error {
    Error::Os(errno).log()
}
