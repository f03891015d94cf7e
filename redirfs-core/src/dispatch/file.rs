//! Open, close, duplication and the data-moving calls on backend-bound
//! descriptors.
//!
//! A backend-bound open owns three positions that move together: the exposed
//! descriptor's, the passthrough descriptor's and the record's logical
//! offset. Every data-moving call first re-reads the exposed position, since
//! the caller may have repositioned it natively, then operates, then advances.

use super::{Dispatcher, LARGE_READ_THRESHOLD};
use crate::error::{RedirError, Result};
use crate::native::Native;
use crate::stats::OperationType;
use crate::table::{OpenFile, Position};
use crate::traits::Backend;
use crate::types::{Identity, OpenFlags};
use libc::{c_int, mode_t};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tracing::{debug, trace, warn};

impl<B: Backend, N: Native> Dispatcher<B, N> {
    /// `open`, `open64` and `creat`.
    pub fn open(&self, path: &str, flags: c_int, mode: mode_t) -> Option<Result<RawFd>> {
        let canonical = self.route(path)?;
        Some(self.open_backend(&canonical, OpenFlags::from_bits(flags), mode))
    }

    pub(crate) fn open_backend(&self, path: &str, flags: OpenFlags, mode: mode_t) -> Result<RawFd> {
        let identity = Identity::current();
        let mode = if flags.creates() {
            mode
        } else {
            self.retry("mode", || self.backend.mode(path)).unwrap_or_else(|e| {
                debug!("Mode query on {} failed ({}), opening with 0", path, e);
                0
            })
        };

        let handle = self
            .retry("open", || self.backend.open(path, flags, mode, identity.pid))
            .map_err(|e| self.fail("open", path, e))?;

        let passthrough = match self.open_passthrough(path, flags) {
            Ok(fd) => fd,
            Err(e) => {
                self.abandon(path, handle, identity, flags, &[]);
                return Err(e);
            }
        };

        let exposed = match self.native.anonymous_file(flags.contains(OpenFlags::CLOSE_ON_EXEC)) {
            Ok(fd) => fd,
            Err(e) => {
                self.abandon(path, handle, identity, flags, &[passthrough]);
                return Err(e.into());
            }
        };

        let mut position = Position {
            passthrough,
            offset: 0,
        };
        if flags.is_append() {
            let appended = self
                .retry("fgetattr", || self.backend.fgetattr(&handle))
                .map_err(|e| self.fail("fgetattr", path, e))
                .and_then(|attr| {
                    position.offset = attr.size;
                    self.reposition(exposed, &mut position)
                });
            if let Err(e) = appended {
                self.abandon(path, handle, identity, flags, &[passthrough, exposed]);
                return Err(e);
            }
        }

        let record = Arc::new(OpenFile::new(
            path.to_string(),
            flags,
            handle,
            passthrough,
            position.offset,
        ));
        if let Some(stale) = self.files.insert(exposed, record) {
            if let Err(e) = self.finish(&stale) {
                warn!("Releasing stale record for {} failed: {}", stale.path(), e);
            }
        }

        self.stats.record(OperationType::Open);
        debug!(
            "Opened {} ({}) as fd {}, passthrough fd {}",
            path, flags, exposed, passthrough
        );
        Ok(exposed)
    }

    fn open_passthrough(&self, path: &str, flags: OpenFlags) -> Result<RawFd> {
        let view = self
            .backend
            .mounted_view(path)
            .map_err(|e| self.fail("open", path, e))?;
        Ok(self.native.open(&view, flags.for_passthrough().bits(), 0)?)
    }

    /// Undoes a partially completed open.
    fn abandon(&self, path: &str, handle: B::Handle, identity: Identity, flags: OpenFlags, fds: &[RawFd]) {
        for fd in fds {
            if let Err(e) = self.native.close(*fd) {
                warn!("Closing fd {} after failed open of {}: {}", fd, path, e);
            }
        }
        if let Err(e) = self.backend.close(handle, identity, flags) {
            warn!("Releasing backend handle after failed open of {}: {}", path, e);
        }
    }

    /// `close`: releases the record behind `fd`, then closes `fd` natively.
    pub fn close(&self, fd: RawFd) -> Option<Result<()>> {
        let released = self.release(fd)?;
        let closed = self.native.close(fd).map_err(RedirError::from);
        Some(released.and(closed))
    }

    /// Unregisters `fd` without closing it. The backend handle and the
    /// passthrough descriptor are released with the last alias.
    pub fn release(&self, fd: RawFd) -> Option<Result<()>> {
        let (record, last) = self.files.remove(fd)?;
        if !last {
            debug!("Closed alias fd {} of {} ({} left)", fd, record.path(), record.refs());
            return Some(Ok(()));
        }
        Some(self.finish(&record))
    }

    fn finish(&self, record: &OpenFile<B::Handle>) -> Result<()> {
        let (handle, passthrough) = {
            let mut state = record.lock();
            (state.handle.take(), state.position.passthrough)
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        let released = self.backend.close(handle, Identity::current(), record.flags());
        let closed = self.native.close(passthrough);
        self.stats.record(OperationType::Release);

        match released {
            Ok(refs) => debug!("Released {} ({} backend references left)", record.path(), refs),
            Err(e) => return Err(self.fail("close", record.path(), e)),
        }
        Ok(closed?)
    }

    /// Records that `to` now duplicates `from`, after a native `dup`, `dup2`
    /// or `F_DUPFD` succeeded. A record previously held by `to` is released.
    pub fn duplicated(&self, from: RawFd, to: RawFd) -> bool {
        if from == to {
            return self.files.contains(from);
        }
        if let Some(Err(e)) = self.release(to) {
            warn!("Releasing fd {} replaced by dup: {}", to, e);
        }
        let aliased = self.files.alias(from, to);
        if aliased {
            debug!("fd {} now aliases fd {}", to, from);
        }
        aliased
    }

    /// `read`.
    pub fn read(&self, fd: RawFd, buf: &mut [u8]) -> Option<Result<usize>> {
        self.with_record(fd, |record, handle, position| {
            self.resync(fd, position)?;

            if buf.len() >= LARGE_READ_THRESHOLD {
                return self.read_backend(fd, record, handle, position, buf);
            }

            let n = self.native.read(position.passthrough, buf)?;
            self.native.seek(fd, n as i64, libc::SEEK_CUR)?;
            position.offset += n as u64;
            self.stats.record_read(OperationType::PassthroughRead, n);
            trace!("fd {}: {} bytes through passthrough", fd, n);
            Ok(n)
        })
    }

    /// Reads through the backend verb at the logical offset and advances.
    pub(crate) fn read_backend(
        &self,
        fd: RawFd,
        record: &OpenFile<B::Handle>,
        handle: &B::Handle,
        position: &mut Position,
        buf: &mut [u8],
    ) -> Result<usize> {
        let offset = position.offset;
        let n = self
            .retry("read", || self.backend.read(handle, buf, offset))
            .map_err(|e| self.fail("read", record.path(), e))?;
        position.offset += n as u64;
        self.reposition(fd, position)?;
        self.stats.record_read(OperationType::BackendRead, n);
        trace!("fd {}: {} bytes through backend at {}", fd, n, offset);
        Ok(n)
    }

    /// `write`. Appending records write at the backend's current size.
    pub fn write(&self, fd: RawFd, buf: &[u8]) -> Option<Result<usize>> {
        self.with_record(fd, |record, handle, position| {
            self.resync(fd, position)?;
            self.write_backend(fd, record, handle, position, buf)
        })
    }

    pub(crate) fn write_backend(
        &self,
        fd: RawFd,
        record: &OpenFile<B::Handle>,
        handle: &B::Handle,
        position: &mut Position,
        buf: &[u8],
    ) -> Result<usize> {
        if record.flags().is_append() {
            let attr = self
                .retry("fgetattr", || self.backend.fgetattr(handle))
                .map_err(|e| self.fail("fgetattr", record.path(), e))?;
            position.offset = attr.size;
        }

        let offset = position.offset;
        let pid = Identity::current().pid;
        let n = self
            .retry("write", || self.backend.write(handle, buf, offset, pid))
            .map_err(|e| self.fail("write", record.path(), e))?;
        position.offset += n as u64;
        self.reposition(fd, position)?;
        self.stats.record_write(n);
        trace!("fd {}: wrote {} of {} bytes at {}", fd, n, buf.len(), offset);
        Ok(n)
    }

    /// `pread`: always the backend verb, positions untouched.
    pub fn pread(&self, fd: RawFd, buf: &mut [u8], offset: i64) -> Option<Result<usize>> {
        self.with_record(fd, |record, handle, _| {
            let offset = non_negative(offset)?;
            let n = self
                .retry("read", || self.backend.read(handle, buf, offset))
                .map_err(|e| self.fail("read", record.path(), e))?;
            self.stats.record_read(OperationType::BackendRead, n);
            Ok(n)
        })
    }

    /// `pwrite`: always the backend verb, positions untouched.
    pub fn pwrite(&self, fd: RawFd, buf: &[u8], offset: i64) -> Option<Result<usize>> {
        self.with_record(fd, |record, handle, _| {
            let offset = non_negative(offset)?;
            let pid = Identity::current().pid;
            let n = self
                .retry("write", || self.backend.write(handle, buf, offset, pid))
                .map_err(|e| self.fail("write", record.path(), e))?;
            self.stats.record_write(n);
            Ok(n)
        })
    }

    /// `lseek`. Only `SEEK_END` needs the backend: the exposed file is empty,
    /// so its own end is meaningless. Other origins stay native.
    pub fn seek(&self, fd: RawFd, offset: i64, whence: c_int) -> Option<Result<u64>> {
        if whence != libc::SEEK_END {
            return None;
        }
        self.with_record(fd, |record, handle, position| {
            let attr = self
                .retry("fgetattr", || self.backend.fgetattr(handle))
                .map_err(|e| self.fail("fgetattr", record.path(), e))?;
            let target = (attr.size as i64)
                .checked_add(offset)
                .filter(|target| *target >= 0)
                .ok_or_else(|| RedirError::invalid("resulting offset is negative"))?;
            position.offset = target as u64;
            self.reposition(fd, position)?;
            Ok(position.offset)
        })
    }

    /// `fsync` and `fdatasync`.
    pub fn sync(&self, fd: RawFd) -> Option<Result<()>> {
        self.with_record(fd, |record, handle, _| {
            self.retry("sync", || self.backend.sync(handle))
                .map_err(|e| self.fail("sync", record.path(), e))
        })
    }

    /// Syncs every open backend record. Returns the first failure after
    /// attempting all of them.
    pub fn sync_all(&self) -> Result<()> {
        let mut result = Ok(());
        for record in self.files.records() {
            let state = record.lock();
            let Some(handle) = state.handle.as_ref() else {
                continue;
            };
            if let Err(e) = self.retry("sync", || self.backend.sync(handle)) {
                let err = self.fail("sync", record.path(), e);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Pulls the logical offset and the passthrough position to wherever the
    /// exposed descriptor currently is.
    pub(crate) fn resync(&self, fd: RawFd, position: &mut Position) -> Result<u64> {
        let current = self.native.seek(fd, 0, libc::SEEK_CUR)?;
        self.native.seek(position.passthrough, current as i64, libc::SEEK_SET)?;
        position.offset = current;
        Ok(current)
    }

    /// Moves the exposed and passthrough descriptors to the logical offset.
    pub(crate) fn reposition(&self, fd: RawFd, position: &mut Position) -> Result<()> {
        let offset = position.offset as i64;
        self.native.seek(fd, offset, libc::SEEK_SET)?;
        self.native.seek(position.passthrough, offset, libc::SEEK_SET)?;
        Ok(())
    }
}

fn non_negative(offset: i64) -> Result<u64> {
    u64::try_from(offset).map_err(|_| RedirError::invalid("negative offset"))
}
