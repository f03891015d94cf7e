//! Directory streams, the working directory, and directory creation.

use super::Dispatcher;
use crate::error::{RedirError, Result};
use crate::native::{DirHandle, Native};
use crate::stats::OperationType;
use crate::table::DirectoryRecord;
use crate::traits::Backend;
use libc::mode_t;
use std::ptr::NonNull;
use tracing::debug;

fn child_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

impl<B: Backend, N: Native> Dispatcher<B, N> {
    /// `opendir`: snapshots the backend directory behind a placeholder
    /// native stream.
    pub fn opendir(&self, path: &str) -> Option<Result<DirHandle>> {
        let canonical = self.route(path)?;
        Some(self.opendir_backend(canonical))
    }

    fn opendir_backend(&self, path: String) -> Result<DirHandle> {
        let entries = self
            .retry("readdir", || self.backend.readdir(&path))
            .map_err(|e| self.fail("readdir", &path, e))?;

        let dir = self.native.open_placeholder_dir()?;
        let dir_fd = match self.native.dir_fd(dir) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = self.native.close_dir(dir);
                return Err(e.into());
            }
        };

        debug!("Opened directory {} ({} entries) as fd {}", path, entries.len(), dir_fd);
        self.dirs.insert(dir, DirectoryRecord::new(path, entries, dir_fd));
        self.stats.record(OperationType::OpenDir);
        Ok(dir)
    }

    /// `readdir`: the next snapshot entry, `None` once exhausted.
    ///
    /// The entry lives in the stream's own buffer and is overwritten by the
    /// next call on the same stream.
    pub fn readdir(&self, dir: DirHandle) -> Option<Result<Option<NonNull<libc::dirent>>>> {
        let record = self.dirs.get(dir)?;
        let mut record = record.lock();

        let Some(name) = record.advance() else {
            return Some(Ok(None));
        };

        let child = child_path(record.path(), &name);
        let (ino, d_type) = match self.retry("getattr", || self.backend.getattr(&child)) {
            Ok(attr) => (attr.ino, attr.dirent_type()),
            Err(e) => {
                debug!("No attributes for {}: {}", child, e);
                (0, libc::DT_UNKNOWN)
            }
        };

        Some(Ok(Some(record.fill(&name, ino, d_type))))
    }

    /// `closedir`.
    pub fn closedir(&self, dir: DirHandle) -> Option<Result<()>> {
        let record = self.dirs.remove(dir)?;
        debug!("Closed directory {}", record.lock().path());
        Some(self.native.close_dir(dir).map_err(RedirError::from))
    }

    /// `chdir` into a backend directory moves the process into its physical
    /// location.
    pub fn chdir(&self, path: &str) -> Option<Result<()>> {
        let canonical = self.route(path)?;
        let result = self
            .backend
            .expand_path(&canonical)
            .map_err(|e| self.fail("chdir", &canonical, e))
            .and_then(|physical| Ok(self.native.chdir(&physical)?));
        Some(result)
    }

    /// `getcwd` into a caller buffer: writes the logical working directory
    /// and a NUL, returns the path length.
    pub fn getcwd(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(RedirError::invalid("getcwd buffer of size 0"));
        }
        let cwd = self.logical_cwd()?;
        let needed = cwd.len() + 1;
        if buf.len() < needed {
            return Err(RedirError::Range {
                needed,
                available: buf.len(),
            });
        }
        buf[..cwd.len()].copy_from_slice(cwd.as_bytes());
        buf[cwd.len()] = 0;
        Ok(cwd.len())
    }

    /// `mkdir`. Not retried: a busy backend surfaces as `EAGAIN`.
    pub fn mkdir(&self, path: &str, mode: mode_t) -> Option<Result<()>> {
        let canonical = self.route(path)?;
        Some(
            self.backend
                .mkdir(&canonical, mode)
                .map_err(|e| self.fail("mkdir", &canonical, e)),
        )
    }

    /// `rmdir`. Not retried.
    pub fn rmdir(&self, path: &str) -> Option<Result<()>> {
        let canonical = self.route(path)?;
        Some(
            self.backend
                .rmdir(&canonical)
                .map_err(|e| self.fail("rmdir", &canonical, e)),
        )
    }
}
