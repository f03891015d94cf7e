//! Error types for the redirfs interposition layer.

use std::io;
use thiserror::Error;

/// Comprehensive error type for all routed operations.
///
/// Every variant maps onto an OS error code through [`RedirError::errno`], which
/// is what the C surface stores in `errno` before returning its failure sentinel.
#[derive(Debug, Error)]
pub enum RedirError {
    /// The backend reported a hard failure.
    #[error("Backend {operation} failed on '{path}' (errno {code})")]
    Backend {
        operation: &'static str,
        path: String,
        code: i32,
    },

    /// A rename whose endpoints classify differently.
    #[error("Cannot rename across mounts: '{from}' -> '{to}'")]
    CrossMount {
        from: String,
        to: String,
    },

    /// The descriptor's record has already been released.
    #[error("Descriptor {fd} is closed")]
    Closed {
        fd: i32,
    },

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        reason: String,
    },

    /// A result does not fit the caller-supplied buffer.
    #[error("Result of {needed} bytes does not fit a buffer of {available} bytes")]
    Range {
        needed: usize,
        available: usize,
    },

    /// A native symbol could not be resolved.
    #[error("Native symbol '{symbol}' is unavailable")]
    Unresolved {
        symbol: &'static str,
    },

    /// I/O error from a native call.
    #[error("I/O error")]
    Io {
        #[from]
        #[source]
        source: io::Error,
    },

    /// A failure inside the layer itself.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl RedirError {
    /// Returns the OS error code describing this error.
    pub fn errno(&self) -> i32 {
        match self {
            RedirError::Backend { code, .. } => *code,
            RedirError::CrossMount { .. } => libc::ENOENT,
            RedirError::Closed { .. } => libc::EBADF,
            RedirError::InvalidArgument { .. } => libc::EINVAL,
            RedirError::Range { .. } => libc::ERANGE,
            RedirError::Unresolved { .. } => libc::ENOSYS,
            RedirError::Io { source } => source.raw_os_error().unwrap_or(libc::EIO),
            RedirError::Internal { .. } => libc::EIO,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        RedirError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Result type alias for redirfs operations.
pub type Result<T> = std::result::Result<T, RedirError>;
