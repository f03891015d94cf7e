//! The data path under backend-bound buffered streams.
//!
//! A backend stream is a C library stream whose I/O functions call back into
//! the dispatcher with the exposed descriptor of the open. The C library does
//! the buffering and formatting; these calls see only whole buffers, keyed by
//! that descriptor.

use super::Dispatcher;
use crate::error::{RedirError, Result};
use crate::native::Native;
use crate::traits::Backend;
use crate::types::OpenFlags;
use libc::c_int;
use std::os::unix::io::RawFd;

/// Permission bits of files created by `fopen`.
const STREAM_CREATE_MODE: libc::mode_t = 0o666;

impl<B: Backend, N: Native> Dispatcher<B, N> {
    /// `fopen` and `fopen64`: the backend-bound descriptor to build the stream
    /// on.
    pub fn fopen(&self, path: &str, mode: &str) -> Option<Result<RawFd>> {
        let canonical = self.route(path)?;
        let Some(flags) = OpenFlags::from_stream_mode(mode) else {
            return Some(Err(RedirError::invalid(format!("stream mode {:?}", mode))));
        };
        Some(self.open_backend(&canonical, flags, STREAM_CREATE_MODE))
    }

    /// Stream read: fills as much of `buf` as the backend provides. Short
    /// only at end of file.
    pub fn fread(&self, fd: RawFd, buf: &mut [u8]) -> Option<Result<usize>> {
        self.with_record(fd, |record, handle, position| {
            self.resync(fd, position)?;
            let mut filled = 0;
            while filled < buf.len() {
                let n = self.read_backend(fd, record, handle, position, &mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            Ok(filled)
        })
    }

    /// Stream write: writes all of `buf`, looping over short writes. Stops
    /// early only if the backend accepts nothing.
    pub fn fwrite(&self, fd: RawFd, buf: &[u8]) -> Option<Result<usize>> {
        self.with_record(fd, |record, handle, position| {
            self.resync(fd, position)?;
            let mut written = 0;
            while written < buf.len() {
                let n = self.write_backend(fd, record, handle, position, &buf[written..])?;
                if n == 0 {
                    break;
                }
                written += n;
            }
            Ok(written)
        })
    }

    /// Stream seek, including the position queries behind `ftell`. Unlike
    /// [`Dispatcher::seek`] every origin is served here, since the stream has
    /// no native descriptor of its own to fall back on.
    pub fn fseek(&self, fd: RawFd, offset: i64, whence: c_int) -> Option<Result<u64>> {
        if whence == libc::SEEK_END {
            return self.seek(fd, offset, whence);
        }
        self.with_record(fd, |_, _, position| {
            let target = self.native.seek(fd, offset, whence)?;
            position.offset = target;
            self.reposition(fd, position)?;
            Ok(target)
        })
    }

    /// `fflush`: syncs one backend stream once the C library has pushed its
    /// buffer through [`Dispatcher::fwrite`].
    pub fn fflush(&self, fd: RawFd) -> Option<Result<()>> {
        self.sync(fd)
    }
}
