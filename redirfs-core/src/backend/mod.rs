//! Backend results and the shipped backend implementation.

mod local;

pub use local::{LocalBackend, LocalHandle};

use std::io;
use thiserror::Error;

/// The non-success outcomes of a backend verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend is busy; the same call must be retried.
    #[error("Backend busy, try again")]
    Again,

    /// The backend failed with a backend-domain error code.
    #[error("Backend failure (code {code})")]
    Failed { code: i32 },
}

/// Result type of every backend verb.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl BackendError {
    pub fn failed(code: i32) -> Self {
        BackendError::Failed { code }
    }
}

impl From<io::Error> for BackendError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => BackendError::Again,
            Some(code) => BackendError::Failed { code },
            None => BackendError::Failed { code: libc::EIO },
        }
    }
}
