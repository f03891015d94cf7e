//! Attribute queries, permission changes and rename.

use super::Dispatcher;
use crate::error::{RedirError, Result};
use crate::native::Native;
use crate::stats::OperationType;
use crate::traits::Backend;
use crate::types::FileAttr;
use libc::{c_uint, mode_t};
use std::io;
use std::os::unix::io::RawFd;
use tracing::debug;

impl<B: Backend, N: Native> Dispatcher<B, N> {
    /// `stat`, `lstat` and their variants.
    pub fn stat(&self, path: &str) -> Option<Result<FileAttr>> {
        let canonical = self.route(path)?;
        Some(self.getattr(&canonical))
    }

    fn getattr(&self, path: &str) -> Result<FileAttr> {
        self.stats.record(OperationType::Stat);
        self.retry("getattr", || self.backend.getattr(path))
            .map_err(|e| self.fail("getattr", path, e))
    }

    /// `fstat` and its variants: directory placeholders first, then file
    /// records.
    pub fn fstat(&self, fd: RawFd) -> Option<Result<FileAttr>> {
        if let Some(dir) = self.dirs.by_fd(fd) {
            let path = dir.lock().path().to_string();
            return Some(self.getattr(&path));
        }

        self.with_record(fd, |record, handle, _| {
            self.stats.record(OperationType::Stat);
            self.retry("fgetattr", || self.backend.fgetattr(handle))
                .map_err(|e| self.fail("fgetattr", record.path(), e))
        })
    }

    /// `chmod`. Not retried.
    pub fn chmod(&self, path: &str, mode: mode_t) -> Option<Result<()>> {
        let canonical = self.route(path)?;
        Some(
            self.backend
                .chmod(&canonical, mode)
                .map_err(|e| self.fail("chmod", &canonical, e)),
        )
    }

    /// `rename`. Both ends must be on the same side: backend to backend goes
    /// to the backend, native to native is forwarded, anything else fails
    /// with `ENOENT` without touching either side.
    pub fn rename(&self, from: &str, to: &str) -> Option<Result<()>> {
        let source = self.route(from);
        let target = self.route(to);

        match (source, target) {
            (None, None) => None,
            (Some(source), Some(target)) => {
                self.stats.record(OperationType::Rename);
                Some(
                    self.backend
                        .rename(&source, &target)
                        .map_err(|e| self.fail("rename", &source, e)),
                )
            }
            _ => {
                debug!("Refusing rename across mounts: {} -> {}", from, to);
                Some(Err(RedirError::CrossMount {
                    from: from.to_string(),
                    to: to.to_string(),
                }))
            }
        }
    }

    /// The path an `*at` call names: absolute paths and paths relative to
    /// `AT_FDCWD` as given, relative paths under a backend directory stream
    /// joined to its logical path. `None` for a path relative to a native
    /// directory descriptor.
    fn resolve_at(&self, dirfd: RawFd, path: &str) -> Option<String> {
        if path.starts_with('/') || dirfd == libc::AT_FDCWD {
            return Some(path.to_string());
        }
        let dir = self.dirs.by_fd(dirfd)?;
        let base = dir.lock().path().to_string();
        Some(format!("{}/{}", base, path))
    }

    /// `fstatat`, `fstatat64` and `statx`. With `empty_path` set, an empty
    /// `path` names `dirfd` itself.
    pub fn stat_at(&self, dirfd: RawFd, path: &str, empty_path: bool) -> Option<Result<FileAttr>> {
        if path.is_empty() && empty_path {
            if dirfd == libc::AT_FDCWD {
                return self.stat(".");
            }
            return self.fstat(dirfd);
        }
        let path = self.resolve_at(dirfd, path)?;
        self.stat(&path)
    }

    /// `renameat` and `renameat2`. Of the `renameat2` flags only
    /// `RENAME_NOREPLACE` is served by the backend; the others fail with
    /// `EINVAL`.
    pub fn rename_at(
        &self,
        from_dir: RawFd,
        from: &str,
        to_dir: RawFd,
        to: &str,
        flags: c_uint,
    ) -> Option<Result<()>> {
        match (self.resolve_at(from_dir, from), self.resolve_at(to_dir, to)) {
            (Some(source), Some(target)) => {
                if flags == 0 {
                    return self.rename(&source, &target);
                }
                let routed = self.route(&source).is_some() || self.route(&target).is_some();
                if !routed {
                    return None;
                }
                if flags & !libc::RENAME_NOREPLACE != 0 {
                    return Some(Err(RedirError::invalid(format!("rename flags {:#x}", flags))));
                }
                if let Some(Ok(_)) = self.stat(&target) {
                    return Some(Err(io::Error::from_raw_os_error(libc::EEXIST).into()));
                }
                self.rename(&source, &target)
            }
            (Some(path), None) | (None, Some(path)) => self.route(&path).map(|_| {
                debug!("Refusing rename across mounts: {} -> {}", from, to);
                Err(RedirError::CrossMount {
                    from: from.to_string(),
                    to: to.to_string(),
                })
            }),
            (None, None) => None,
        }
    }
}
