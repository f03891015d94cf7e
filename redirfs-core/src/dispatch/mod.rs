//! Per-call routing between the native OS and the backend.
//!
//! Every routed operation returns `Option<Result<T>>`: `None` means the call
//! does not concern the backend and must be forwarded, unchanged, to the
//! native implementation; `Some` is the complete outcome of a backend-serviced
//! call.
//!
//! Descriptor-based calls are backend-bound when the descriptor is registered
//! in the [`DescriptorTable`]; path-based calls when the canonical path
//! classifies as [`Classification::Backend`].

mod dir;
mod file;
mod meta;
mod stream;

use crate::backend::{BackendError, BackendResult};
use crate::error::{RedirError, Result};
use crate::native::Native;
use crate::registry::MountRegistry;
use crate::retry::RetryPolicy;
use crate::stats::{DispatchStats, OperationType};
use crate::table::{DescriptorTable, DirectoryTable, FileState, OpenFile, Position};
use crate::traits::Backend;
use crate::types::{canonicalize, Classification};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tracing::{debug, trace};

/// Reads of at least this many bytes go through the backend read verb;
/// smaller ones through the passthrough descriptor.
pub const LARGE_READ_THRESHOLD: usize = 1024 * 1024;

/// The routing core shared by every intercepted call.
pub struct Dispatcher<B: Backend, N: Native> {
    backend: B,
    native: N,
    registry: Arc<MountRegistry>,
    files: DescriptorTable<B::Handle>,
    dirs: DirectoryTable,
    retry: RetryPolicy,
    stats: DispatchStats,
}

impl<B: Backend, N: Native> Dispatcher<B, N> {
    pub fn new(backend: B, native: N, registry: Arc<MountRegistry>) -> Self {
        Self {
            backend,
            native,
            registry,
            files: DescriptorTable::new(),
            dirs: DirectoryTable::new(),
            retry: RetryPolicy::default(),
            stats: DispatchStats::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn registry(&self) -> &Arc<MountRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn files(&self) -> &DescriptorTable<B::Handle> {
        &self.files
    }

    pub fn dirs(&self) -> &DirectoryTable {
        &self.dirs
    }

    /// Canonical form of `path`, resolved against the logical working
    /// directory. `None` if it cannot be computed.
    pub fn canonical(&self, path: &str) -> Option<String> {
        canonicalize(path, || self.logical_cwd()).ok()
    }

    /// Classifies `path`. Paths without a canonical form are native.
    pub fn classify(&self, path: &str) -> Classification {
        match self.canonical(path) {
            Some(canonical) => self.registry.classify(&canonical),
            None => Classification::Native,
        }
    }

    /// Canonical form of `path` if it is backend-managed.
    pub(crate) fn route(&self, path: &str) -> Option<String> {
        let canonical = self.canonical(path)?;
        let class = self.registry.classify(&canonical);
        trace!("{} -> {} ({})", path, canonical, class);
        class.is_backend().then_some(canonical)
    }

    /// The working directory as the caller sees it: a native directory inside
    /// a mount's physical path is reported under the mount prefix.
    pub fn logical_cwd(&self) -> std::io::Result<String> {
        let native = self.native.current_dir()?;
        Ok(self.registry.to_logical(&native, |prefix| self.expand(prefix)))
    }

    fn expand(&self, prefix: &str) -> Option<String> {
        self.backend
            .expand_path(prefix)
            .ok()
            .map(|path| path.to_string_lossy().into_owned())
    }

    /// Runs a backend verb until it stops answering "try again".
    pub(crate) fn retry<T, F>(&self, operation: &'static str, mut op: F) -> BackendResult<T>
    where
        F: FnMut() -> BackendResult<T>,
    {
        self.retry.run(operation, || {
            let result = op();
            if matches!(result, Err(BackendError::Again)) {
                self.stats.record(OperationType::Retry);
            }
            result
        })
    }

    /// Translates a backend failure into the OS error domain.
    pub(crate) fn fail(&self, operation: &'static str, path: &str, err: BackendError) -> RedirError {
        let code = match err {
            BackendError::Again => libc::EAGAIN,
            BackendError::Failed { code } => self.backend.to_errno(code),
        };
        debug!("Backend {} on {} failed: errno {}", operation, path, code);
        RedirError::Backend {
            operation,
            path: path.to_string(),
            code,
        }
    }

    /// Runs `f` on the record registered under `fd` with its state locked.
    /// `None` if `fd` is not backend-bound.
    pub(crate) fn with_record<T, F>(&self, fd: RawFd, f: F) -> Option<Result<T>>
    where
        F: FnOnce(&OpenFile<B::Handle>, &B::Handle, &mut Position) -> Result<T>,
    {
        let record = self.files.get(fd)?;
        let mut guard = record.lock();
        let FileState { handle, position } = &mut *guard;
        let Some(handle) = handle.as_ref() else {
            return Some(Err(RedirError::Closed { fd }));
        };
        Some(f(&record, handle, position))
    }
}

impl<B: Backend, N: Native> std::fmt::Debug for Dispatcher<B, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("files", &self.files.len())
            .field("dirs", &self.dirs.len())
            .field("retry", &self.retry)
            .finish()
    }
}
