//! Descriptor I/O.

use crate::state::{bytes, bytes_mut, c_str, dispatch, observe};
use crate::stream;
use libc::{c_char, c_int, c_long, c_uint, c_void, mode_t, off_t, size_t, ssize_t};

unsafe fn open_routed(path: *const c_char, flags: c_int, mode: mode_t) -> Option<c_int> {
    let path = c_str(path)?;
    dispatch(|shim| shim.open(path, flags, mode), |fd| fd)
}

#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    open_routed(path, flags, mode).unwrap_or_else(|| call_next!(open(path, flags, mode as c_uint)))
}

#[no_mangle]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    open_routed(path, flags, mode).unwrap_or_else(|| call_next!(open64(path, flags, mode as c_uint)))
}

#[no_mangle]
pub unsafe extern "C" fn creat(path: *const c_char, mode: mode_t) -> c_int {
    open_routed(path, libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC, mode)
        .unwrap_or_else(|| call_next!(creat(path, mode)))
}

#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    dispatch(|shim| shim.close(fd), |()| 0).unwrap_or_else(|| call_next!(close(fd)))
}

#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    bytes_mut(buf, count)
        .and_then(|buf| dispatch(|shim| shim.read(fd, buf), |n| n as ssize_t))
        .unwrap_or_else(|| call_next!(read(fd, buf, count)))
}

#[no_mangle]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    bytes(buf, count)
        .and_then(|buf| dispatch(|shim| shim.write(fd, buf), |n| n as ssize_t))
        .unwrap_or_else(|| call_next!(write(fd, buf, count)))
}

#[no_mangle]
pub unsafe extern "C" fn pread(fd: c_int, buf: *mut c_void, count: size_t, offset: off_t) -> ssize_t {
    bytes_mut(buf, count)
        .and_then(|buf| dispatch(|shim| shim.pread(fd, buf, offset), |n| n as ssize_t))
        .unwrap_or_else(|| call_next!(pread(fd, buf, count, offset)))
}

#[no_mangle]
pub unsafe extern "C" fn pread64(fd: c_int, buf: *mut c_void, count: size_t, offset: i64) -> ssize_t {
    bytes_mut(buf, count)
        .and_then(|buf| dispatch(|shim| shim.pread(fd, buf, offset), |n| n as ssize_t))
        .unwrap_or_else(|| call_next!(pread64(fd, buf, count, offset)))
}

#[no_mangle]
pub unsafe extern "C" fn pwrite(fd: c_int, buf: *const c_void, count: size_t, offset: off_t) -> ssize_t {
    bytes(buf, count)
        .and_then(|buf| dispatch(|shim| shim.pwrite(fd, buf, offset), |n| n as ssize_t))
        .unwrap_or_else(|| call_next!(pwrite(fd, buf, count, offset)))
}

#[no_mangle]
pub unsafe extern "C" fn pwrite64(fd: c_int, buf: *const c_void, count: size_t, offset: i64) -> ssize_t {
    bytes(buf, count)
        .and_then(|buf| dispatch(|shim| shim.pwrite(fd, buf, offset), |n| n as ssize_t))
        .unwrap_or_else(|| call_next!(pwrite64(fd, buf, count, offset)))
}

#[no_mangle]
pub unsafe extern "C" fn lseek(fd: c_int, offset: off_t, whence: c_int) -> off_t {
    dispatch(|shim| shim.seek(fd, offset, whence), |pos| pos as off_t)
        .unwrap_or_else(|| call_next!(lseek(fd, offset, whence)))
}

#[no_mangle]
pub unsafe extern "C" fn lseek64(fd: c_int, offset: i64, whence: c_int) -> i64 {
    dispatch(|shim| shim.seek(fd, offset, whence), |pos| pos as i64)
        .unwrap_or_else(|| call_next!(lseek64(fd, offset, whence)))
}

#[no_mangle]
pub unsafe extern "C" fn fsync(fd: c_int) -> c_int {
    dispatch(|shim| shim.sync(fd), |()| 0).unwrap_or_else(|| call_next!(fsync(fd)))
}

#[no_mangle]
pub unsafe extern "C" fn fdatasync(fd: c_int) -> c_int {
    dispatch(|shim| shim.sync(fd), |()| 0).unwrap_or_else(|| call_next!(fdatasync(fd)))
}

/// Registers `copy` as an alias of `fd` once a native duplication succeeded.
fn track_dup(fd: c_int, copy: c_int) -> c_int {
    if copy >= 0 {
        observe(|shim| {
            shim.duplicated(fd, copy);
            stream::rebind_standard(shim, copy);
        });
    }
    copy
}

#[no_mangle]
pub unsafe extern "C" fn dup(fd: c_int) -> c_int {
    track_dup(fd, call_next!(dup(fd)))
}

#[no_mangle]
pub unsafe extern "C" fn dup2(fd: c_int, target: c_int) -> c_int {
    stream::flush_standard(target);
    track_dup(fd, call_next!(dup2(fd, target)))
}

#[no_mangle]
pub unsafe extern "C" fn dup3(fd: c_int, target: c_int, flags: c_int) -> c_int {
    stream::flush_standard(target);
    track_dup(fd, call_next!(dup3(fd, target, flags)))
}

fn duplicates(cmd: c_int) -> bool {
    cmd == libc::F_DUPFD || cmd == libc::F_DUPFD_CLOEXEC
}

/// Only the duplicating commands concern the layer; everything else passes
/// through with its argument untouched.
#[no_mangle]
pub unsafe extern "C" fn fcntl(fd: c_int, cmd: c_int, arg: c_long) -> c_int {
    let ret: c_int = call_next!(fcntl(fd, cmd, arg));
    if duplicates(cmd) {
        track_dup(fd, ret)
    } else {
        ret
    }
}

/// The entry point of programs built with 64-bit file offsets.
#[no_mangle]
pub unsafe extern "C" fn fcntl64(fd: c_int, cmd: c_int, arg: c_long) -> c_int {
    let ret: c_int = call_next!(fcntl64(fd, cmd, arg));
    if duplicates(cmd) {
        track_dup(fd, ret)
    } else {
        ret
    }
}
