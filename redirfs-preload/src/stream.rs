//! Buffered streams.
//!
//! A backend stream is a C library cookie stream whose read, write, seek and
//! close functions call the dispatcher with the exposed descriptor of the
//! open. Buffering, formatting and line handling stay in the C library, so
//! `fprintf`, `fgets`, `getline`, `fscanf` and the rest of stdio reach the
//! backend without being wrapped one by one.
//!
//! The standard streams are pointed at such a stream while a backend
//! descriptor is duplicated onto 0, 1 or 2, and pointed back afterwards.

use crate::state::{bytes, bytes_mut, c_str, dispatch, intercept, reply, Shim};
use dashmap::DashMap;
use errno::{set_errno, Errno};
use libc::{c_char, c_int, c_void, off64_t, size_t, ssize_t, FILE};
use redirfs_core::{RedirError, Result};
use std::io;
use std::os::unix::io::RawFd;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use tracing::{debug, warn};

type ReadFn = unsafe extern "C" fn(*mut c_void, *mut c_char, size_t) -> ssize_t;
type WriteFn = unsafe extern "C" fn(*mut c_void, *const c_char, size_t) -> ssize_t;
type SeekFn = unsafe extern "C" fn(*mut c_void, *mut off64_t, c_int) -> c_int;
type CloseFn = unsafe extern "C" fn(*mut c_void) -> c_int;

/// `cookie_io_functions_t`.
#[repr(C)]
struct CookieIo {
    read: Option<ReadFn>,
    write: Option<WriteFn>,
    seek: Option<SeekFn>,
    close: Option<CloseFn>,
}

extern "C" {
    fn fopencookie(cookie: *mut c_void, mode: *const c_char, io: CookieIo) -> *mut FILE;

    static mut stdin: *mut FILE;
    static mut stdout: *mut FILE;
    static mut stderr: *mut FILE;
}

/// `_IONBF`.
const UNBUFFERED: c_int = 2;

const COOKIE_IO: CookieIo = CookieIo {
    read: Some(cookie_read),
    write: Some(cookie_write),
    seek: Some(cookie_seek),
    close: Some(cookie_close),
};

struct StreamCookie {
    fd: RawFd,
    stream: usize,
}

/// Backend streams by address, for `fileno` and `fflush`.
fn streams() -> &'static DashMap<usize, RawFd> {
    static STREAMS: OnceLock<DashMap<usize, RawFd>> = OnceLock::new();
    STREAMS.get_or_init(DashMap::new)
}

fn backend_stream(stream: *mut FILE) -> Option<RawFd> {
    if stream.is_null() {
        return None;
    }
    streams().get(&(stream as usize)).map(|fd| *fd)
}

/// Builds a backend stream over the exposed descriptor `fd`. The stream owns
/// `fd`: closing it closes the descriptor.
unsafe fn stream_over(fd: RawFd, mode: *const c_char) -> io::Result<*mut FILE> {
    let cookie = Box::into_raw(Box::new(StreamCookie { fd, stream: 0 }));
    let stream = fopencookie(cookie.cast(), mode, COOKIE_IO);
    if stream.is_null() {
        let err = io::Error::last_os_error();
        drop(Box::from_raw(cookie));
        return Err(err);
    }
    (*cookie).stream = stream as usize;
    streams().insert(stream as usize, fd);
    debug!("Stream {:p} over fd {}", stream, fd);
    Ok(stream)
}

/// A freshly opened descriptor wrapped in a stream, closed again if that
/// fails.
unsafe fn wrap_opened(shim: &Shim, fd: RawFd, mode: *const c_char) -> Result<*mut FILE> {
    stream_over(fd, mode).or_else(|err| {
        if let Some(Err(e)) = shim.close(fd) {
            warn!("Closing fd {} after a failed stream setup: {}", fd, e);
        }
        Err(err.into())
    })
}

unsafe fn fopen_routed(path: *const c_char, mode: *const c_char) -> Option<*mut FILE> {
    let path = c_str(path)?;
    let stream_mode = c_str(mode)?;
    dispatch(
        |shim| {
            shim.fopen(path, stream_mode)
                .map(|opened| opened.and_then(|fd| wrap_opened(shim, fd, mode)))
        },
        |stream| stream,
    )
}

#[no_mangle]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    fopen_routed(path, mode).unwrap_or_else(|| call_next!(fopen(path, mode)))
}

#[no_mangle]
pub unsafe extern "C" fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE {
    fopen_routed(path, mode).unwrap_or_else(|| call_next!(fopen64(path, mode)))
}

/// A stream over a backend descriptor is a backend stream; a failed setup
/// leaves the descriptor open, as a failed native `fdopen` does.
#[no_mangle]
pub unsafe extern "C" fn fdopen(fd: c_int, mode: *const c_char) -> *mut FILE {
    let routed = (!mode.is_null())
        .then(|| {
            dispatch(
                |shim| shim.files().contains(fd).then(|| stream_over(fd, mode).map_err(RedirError::from)),
                |stream| stream,
            )
        })
        .flatten();
    routed.unwrap_or_else(|| call_next!(fdopen(fd, mode)))
}

#[no_mangle]
pub unsafe extern "C" fn fileno(stream: *mut FILE) -> c_int {
    backend_stream(stream).unwrap_or_else(|| call_next!(fileno(stream)))
}

/// Flushes natively, which pushes a backend stream's buffer through its
/// write function, then syncs the backend. `fflush(NULL)` syncs every
/// backend record.
#[no_mangle]
pub unsafe extern "C" fn fflush(stream: *mut FILE) -> c_int {
    let flushed: c_int = call_next!(fflush(stream));
    if flushed != 0 {
        return flushed;
    }
    let synced = if stream.is_null() {
        intercept(|shim| Some(shim.sync_all()))
    } else {
        backend_stream(stream).and_then(|fd| intercept(|shim| shim.fflush(fd)))
    };
    match synced {
        Some(result) => reply(result, |()| 0),
        None => flushed,
    }
}

unsafe fn cookie_fd(cookie: *mut c_void) -> RawFd {
    (*cookie.cast::<StreamCookie>()).fd
}

/// Runs a cookie callback's dispatcher call. A descriptor that is no longer
/// backend-bound fails with `EBADF`.
fn on_stream<T>(fd: RawFd, f: impl FnOnce(&'static Shim) -> Option<Result<T>>) -> Result<T> {
    intercept(f).unwrap_or(Err(RedirError::Closed { fd }))
}

unsafe extern "C" fn cookie_read(cookie: *mut c_void, buf: *mut c_char, size: size_t) -> ssize_t {
    let fd = cookie_fd(cookie);
    let Some(out) = bytes_mut(buf.cast(), size) else {
        set_errno(Errno(libc::EINVAL));
        return -1;
    };
    reply(on_stream(fd, |shim| shim.fread(fd, out)), |n| n as ssize_t)
}

/// Reports failure as 0 bytes written, with `errno` set.
unsafe extern "C" fn cookie_write(cookie: *mut c_void, buf: *const c_char, size: size_t) -> ssize_t {
    let fd = cookie_fd(cookie);
    let Some(data) = bytes(buf.cast(), size) else {
        set_errno(Errno(libc::EINVAL));
        return 0;
    };
    match on_stream(fd, |shim| shim.fwrite(fd, data)) {
        Ok(n) => n as ssize_t,
        Err(e) => {
            set_errno(Errno(e.errno()));
            0
        }
    }
}

unsafe extern "C" fn cookie_seek(cookie: *mut c_void, offset: *mut off64_t, whence: c_int) -> c_int {
    let fd = cookie_fd(cookie);
    let Some(offset) = offset.as_mut() else {
        set_errno(Errno(libc::EINVAL));
        return -1;
    };
    let requested = *offset;
    reply(on_stream(fd, |shim| shim.fseek(fd, requested, whence)), |target| {
        *offset = target as off64_t;
        0
    })
}

unsafe extern "C" fn cookie_close(cookie: *mut c_void) -> c_int {
    let cookie = Box::from_raw(cookie.cast::<StreamCookie>());
    streams().remove(&cookie.stream);
    let fd = cookie.fd;
    reply(on_stream(fd, |shim| shim.close(fd)), |()| 0)
}

/// Native standard streams displaced by a backend stream, by descriptor.
static DISPLACED: [AtomicUsize; 3] = [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];

unsafe fn standard(fd: RawFd) -> Option<(*mut *mut FILE, &'static [u8])> {
    match fd {
        libc::STDIN_FILENO => Some((addr_of_mut!(stdin), &b"r\0"[..])),
        libc::STDOUT_FILENO => Some((addr_of_mut!(stdout), &b"w\0"[..])),
        libc::STDERR_FILENO => Some((addr_of_mut!(stderr), &b"w\0"[..])),
        _ => None,
    }
}

/// Flushes the standard stream on `target` before a duplication replaces
/// the descriptor under it, so buffered output reaches its old target.
pub(crate) unsafe fn flush_standard(target: c_int) {
    if target == libc::STDIN_FILENO {
        return;
    }
    if let Some((slot, _)) = standard(target) {
        if !(*slot).is_null() {
            fflush(*slot);
        }
    }
}

/// Points the standard stream on `fd` at a backend stream when `fd` has
/// become backend-bound, and back at the native stream when it no longer is.
pub(crate) fn rebind_standard(shim: &Shim, fd: RawFd) {
    // SAFETY: the standard stream variables are only swapped here, after the
    // pending output was flushed by `flush_standard`.
    unsafe {
        let Some((slot, mode)) = standard(fd) else {
            return;
        };
        let routed = shim.files().contains(fd);
        let current = *slot;
        let displaced = &DISPLACED[fd as usize];

        match (routed, backend_stream(current).is_some()) {
            (true, false) => match stream_over(fd, mode.as_ptr().cast()) {
                Ok(stream) => {
                    if fd == libc::STDERR_FILENO {
                        libc::setvbuf(stream, std::ptr::null_mut(), UNBUFFERED, 0);
                    }
                    displaced.store(current as usize, Ordering::SeqCst);
                    *slot = stream;
                    debug!("Standard stream on fd {} now reaches the backend", fd);
                }
                Err(e) => warn!("Rebinding the standard stream on fd {}: {}", fd, e),
            },
            (false, true) => {
                // The backend stream is left open; closing it would close fd.
                streams().remove(&(current as usize));
                *slot = displaced.swap(0, Ordering::SeqCst) as *mut FILE;
                debug!("Standard stream on fd {} is native again", fd);
            }
            _ => {}
        }
    }
}
