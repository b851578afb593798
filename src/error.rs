//! Operation-level error reporting.
//!
//! Handler failures never terminate the helper; they are carried back to the
//! parent inside the response envelope as an errno plus a human-readable
//! description.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use nix::errno::Errno;

/// Failure of a single operation, serialized into the response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpError {
    code: i32,
    message: String,
}

impl OpError {
    /// An error with an explicit errno-style code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        OpError {
            code,
            message: message.into(),
        }
    }

    /// A syscall failure carrying the errno's strerror text.
    pub fn from_errno(errno: Errno) -> Self {
        OpError {
            code: errno as i32,
            message: errno.desc().to_string(),
        }
    }

    /// An argument or request-shape problem, reported as `EINVAL`.
    pub fn invalid(message: impl Into<String>) -> Self {
        OpError {
            code: Errno::EINVAL as i32,
            message: message.into(),
        }
    }

    /// The errno-style code reported to the parent.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The human-readable description reported to the parent.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.message, self.code)
    }
}

impl StdError for OpError {}

impl From<Errno> for OpError {
    fn from(errno: Errno) -> Self {
        OpError::from_errno(errno)
    }
}

impl From<io::Error> for OpError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => OpError::from_errno(Errno::from_raw(code)),
            None => OpError::new(Errno::EIO as i32, err.to_string()),
        }
    }
}

/// Best-effort errno classification of an `io::Error`.
pub(crate) fn io_errno(err: &io::Error) -> Errno {
    err.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_errors_carry_strerror_text() {
        let err = OpError::from_errno(Errno::ENOENT);
        assert_eq!(err.code(), libc::ENOENT);
        assert_eq!(err.message(), "No such file or directory");
    }

    #[test]
    fn invalid_is_einval() {
        let err = OpError::invalid("missing arg 'path'");
        assert_eq!(err.code(), libc::EINVAL);
        assert_eq!(err.message(), "missing arg 'path'");
    }

    #[test]
    fn io_errors_map_to_their_raw_code() {
        let err = OpError::from(io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(err.code(), libc::EACCES);
    }
}
