//! The native operating-system side of the layer.
//!
//! [`symbols`] resolves the next definition of each wrapped entry point; the
//! [`Native`] trait is the narrow set of native operations the dispatcher
//! itself needs, implemented over those symbols by [`System`].

pub mod symbols;
mod system;

pub use system::System;

use libc::{c_int, mode_t};
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;

/// Identity of a native `DIR*` stream, kept as an address so it can key the
/// directory table and cross threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirHandle(usize);

impl DirHandle {
    pub fn from_ptr(dir: *mut libc::DIR) -> Self {
        Self(dir as usize)
    }

    pub fn as_ptr(&self) -> *mut libc::DIR {
        self.0 as *mut libc::DIR
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Native operations the dispatcher performs on its own behalf.
///
/// Errors carry the OS error code of the failed call; a native symbol that
/// cannot be resolved fails with `ENOSYS`.
pub trait Native: Send + Sync {
    fn open(&self, path: &Path, flags: c_int, mode: mode_t) -> io::Result<RawFd>;

    fn close(&self, fd: RawFd) -> io::Result<()>;

    fn read(&self, fd: RawFd, buf: &mut [u8]) -> io::Result<usize>;

    /// Repositions `fd`; returns the resulting offset.
    fn seek(&self, fd: RawFd, offset: i64, whence: c_int) -> io::Result<u64>;

    /// A descriptor on a fresh anonymous temporary file, used as the exposed
    /// identity of a backend-bound open.
    fn anonymous_file(&self, cloexec: bool) -> io::Result<RawFd>;

    /// A directory stream on a directory that always exists, used as the
    /// exposed identity of a backend-bound `opendir`.
    fn open_placeholder_dir(&self) -> io::Result<DirHandle>;

    fn dir_fd(&self, dir: DirHandle) -> io::Result<RawFd>;

    fn close_dir(&self, dir: DirHandle) -> io::Result<()>;

    fn chdir(&self, path: &Path) -> io::Result<()>;

    /// The native current working directory.
    fn current_dir(&self) -> io::Result<String>;
}

pub(crate) fn unresolved(symbol: &'static str) -> io::Error {
    tracing::warn!("Native symbol {} could not be resolved", symbol);
    io::Error::from_raw_os_error(libc::ENOSYS)
}
