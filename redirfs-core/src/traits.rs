//! Core traits that define the redirfs backend interface.
//!
//! The backend is an external storage engine reached through an opaque
//! per-open handle and a fixed verb set. Implementations never see native
//! descriptors: the dispatcher owns those.

use crate::backend::BackendResult;
use crate::types::{FileAttr, Identity, OpenFlags};
use libc::{mode_t, pid_t};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// The storage backend that backend-classified calls are routed to.
///
/// Every path handed to a verb is the canonical logical path. Every verb may
/// answer [`BackendError::Again`](crate::backend::BackendError::Again); the
/// dispatcher decides which verbs are retried.
pub trait Backend: Send + Sync {
    /// Opaque per-open state.
    type Handle: Send + Sync;

    /// Opens (and, per `flags`, creates or truncates) a file.
    fn open(&self, path: &str, flags: OpenFlags, mode: mode_t, pid: pid_t) -> BackendResult<Self::Handle>;

    /// Releases a handle. Returns the number of references the backend still
    /// holds on the underlying file.
    fn close(&self, handle: Self::Handle, identity: Identity, flags: OpenFlags) -> BackendResult<usize>;

    /// Reads into `buf` starting at `offset`; returns the bytes transferred.
    fn read(&self, handle: &Self::Handle, buf: &mut [u8], offset: u64) -> BackendResult<usize>;

    /// Writes `buf` at `offset` on behalf of `pid`; returns the bytes
    /// actually written, which may be fewer than requested.
    fn write(&self, handle: &Self::Handle, buf: &[u8], offset: u64, pid: pid_t) -> BackendResult<usize>;

    /// Flushes a handle's data to stable storage.
    fn sync(&self, handle: &Self::Handle) -> BackendResult<()>;

    /// Attributes of the file at `path`.
    fn getattr(&self, path: &str) -> BackendResult<FileAttr>;

    /// Attributes of an open file.
    fn fgetattr(&self, handle: &Self::Handle) -> BackendResult<FileAttr>;

    fn mkdir(&self, path: &str, mode: mode_t) -> BackendResult<()>;

    fn rmdir(&self, path: &str) -> BackendResult<()>;

    fn rename(&self, from: &str, to: &str) -> BackendResult<()>;

    fn chmod(&self, path: &str, mode: mode_t) -> BackendResult<()>;

    /// Names of every entry in the directory at `path`.
    fn readdir(&self, path: &str) -> BackendResult<BTreeSet<String>>;

    /// Physical location of a logical path.
    fn expand_path(&self, path: &str) -> BackendResult<PathBuf>;

    /// Mode bits of the file at `path`.
    fn mode(&self, path: &str) -> BackendResult<mode_t>;

    /// Native path through which the backend's filesystem view of `path` can
    /// be opened directly.
    fn mounted_view(&self, path: &str) -> BackendResult<PathBuf> {
        Ok(PathBuf::from(path))
    }

    /// Translates a backend failure code into an OS error code.
    fn to_errno(&self, code: i32) -> i32 {
        code
    }
}
