//! Attribute queries, permission changes and rename.

use crate::state::{c_str, dispatch};
use libc::{c_char, c_int, c_uint, mode_t};
use redirfs_core::types::FileAttr;

unsafe fn stat_routed(path: *const c_char, buf: *mut libc::stat) -> Option<c_int> {
    let path = c_str(path)?;
    let out = buf.as_mut()?;
    dispatch(|shim| shim.stat(path), |attr| {
        attr.fill_stat(out);
        0
    })
}

unsafe fn fstat_routed(fd: c_int, buf: *mut libc::stat) -> Option<c_int> {
    let out = buf.as_mut()?;
    dispatch(|shim| shim.fstat(fd), |attr| {
        attr.fill_stat(out);
        0
    })
}

/// Shared routing of the `*at` stat calls; `fill` runs on success only.
unsafe fn stat_at_routed(dirfd: c_int, path: *const c_char, flags: c_int, fill: impl FnOnce(&FileAttr)) -> Option<c_int> {
    let path = c_str(path)?;
    let empty_path = flags & libc::AT_EMPTY_PATH != 0;
    dispatch(|shim| shim.stat_at(dirfd, path, empty_path), |attr| {
        fill(&attr);
        0
    })
}

#[no_mangle]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    stat_routed(path, buf).unwrap_or_else(|| call_next!(stat(path, buf)))
}

#[no_mangle]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    stat_routed(path, buf).unwrap_or_else(|| call_next!(lstat(path, buf)))
}

#[no_mangle]
pub unsafe extern "C" fn fstat(fd: c_int, buf: *mut libc::stat) -> c_int {
    fstat_routed(fd, buf).unwrap_or_else(|| call_next!(fstat(fd, buf)))
}

#[no_mangle]
pub unsafe extern "C" fn __xstat(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
    stat_routed(path, buf).unwrap_or_else(|| call_next!(__xstat(ver, path, buf)))
}

#[no_mangle]
pub unsafe extern "C" fn __lxstat(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
    stat_routed(path, buf).unwrap_or_else(|| call_next!(__lxstat(ver, path, buf)))
}

#[no_mangle]
pub unsafe extern "C" fn __fxstat(ver: c_int, fd: c_int, buf: *mut libc::stat) -> c_int {
    fstat_routed(fd, buf).unwrap_or_else(|| call_next!(__fxstat(ver, fd, buf)))
}

#[no_mangle]
pub unsafe extern "C" fn fstatat(dirfd: c_int, path: *const c_char, buf: *mut libc::stat, flags: c_int) -> c_int {
    buf.as_mut()
        .and_then(|out| stat_at_routed(dirfd, path, flags, |attr| attr.fill_stat(out)))
        .unwrap_or_else(|| call_next!(fstatat(dirfd, path, buf, flags)))
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
mod large {
    use super::*;
    use libc::c_void;

    unsafe fn stat64_routed(path: *const c_char, buf: *mut c_void) -> Option<c_int> {
        let path = c_str(path)?;
        let out = buf.cast::<libc::stat64>().as_mut()?;
        dispatch(|shim| shim.stat(path), |attr| {
            attr.fill_stat64(out);
            0
        })
    }

    #[no_mangle]
    pub unsafe extern "C" fn stat64(path: *const c_char, buf: *mut c_void) -> c_int {
        stat64_routed(path, buf).unwrap_or_else(|| call_next!(stat64(path, buf)))
    }

    #[no_mangle]
    pub unsafe extern "C" fn lstat64(path: *const c_char, buf: *mut c_void) -> c_int {
        stat64_routed(path, buf).unwrap_or_else(|| call_next!(lstat64(path, buf)))
    }

    #[no_mangle]
    pub unsafe extern "C" fn fstat64(fd: c_int, buf: *mut c_void) -> c_int {
        buf.cast::<libc::stat64>()
            .as_mut()
            .and_then(|out| {
                dispatch(|shim| shim.fstat(fd), |attr| {
                    attr.fill_stat64(out);
                    0
                })
            })
            .unwrap_or_else(|| call_next!(fstat64(fd, buf)))
    }

    #[no_mangle]
    pub unsafe extern "C" fn fstatat64(dirfd: c_int, path: *const c_char, buf: *mut c_void, flags: c_int) -> c_int {
        buf.cast::<libc::stat64>()
            .as_mut()
            .and_then(|out| stat_at_routed(dirfd, path, flags, |attr| attr.fill_stat64(out)))
            .unwrap_or_else(|| call_next!(fstatat64(dirfd, path, buf, flags)))
    }

    /// Routed results carry the basic stats only, announced in `stx_mask`.
    #[no_mangle]
    pub unsafe extern "C" fn statx(
        dirfd: c_int,
        path: *const c_char,
        flags: c_int,
        mask: c_uint,
        buf: *mut c_void,
    ) -> c_int {
        buf.cast::<libc::statx>()
            .as_mut()
            .and_then(|out| {
                stat_at_routed(dirfd, path, flags, |attr| {
                    *out = std::mem::zeroed();
                    attr.fill_statx(out);
                })
            })
            .unwrap_or_else(|| call_next!(statx(dirfd, path, flags, mask, buf)))
    }
}

#[no_mangle]
pub unsafe extern "C" fn chmod(path: *const c_char, mode: mode_t) -> c_int {
    c_str(path)
        .and_then(|path| dispatch(|shim| shim.chmod(path, mode), |()| 0))
        .unwrap_or_else(|| call_next!(chmod(path, mode)))
}

/// Paths on different sides fail with `ENOENT`; neither side is touched.
#[no_mangle]
pub unsafe extern "C" fn rename(from: *const c_char, to: *const c_char) -> c_int {
    let routed = c_str(from)
        .zip(c_str(to))
        .and_then(|(source, target)| dispatch(|shim| shim.rename(source, target), |()| 0));
    routed.unwrap_or_else(|| call_next!(rename(from, to)))
}

#[no_mangle]
pub unsafe extern "C" fn renameat(from_dir: c_int, from: *const c_char, to_dir: c_int, to: *const c_char) -> c_int {
    renameat2(from_dir, from, to_dir, to, 0)
}

#[no_mangle]
pub unsafe extern "C" fn renameat2(
    from_dir: c_int,
    from: *const c_char,
    to_dir: c_int,
    to: *const c_char,
    flags: c_uint,
) -> c_int {
    let routed = c_str(from).zip(c_str(to)).and_then(|(source, target)| {
        dispatch(|shim| shim.rename_at(from_dir, source, to_dir, target, flags), |()| 0)
    });
    routed.unwrap_or_else(|| {
        if flags == 0 {
            call_next!(renameat(from_dir, from, to_dir, to))
        } else {
            call_next!(renameat2(from_dir, from, to_dir, to, flags))
        }
    })
}
