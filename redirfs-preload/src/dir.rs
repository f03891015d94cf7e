//! Directory streams, namespace calls and the working directory.

use crate::state::{c_str, dispatch, intercept, reply};
use libc::{c_char, c_int, c_void, mode_t, size_t, DIR};
use redirfs_core::native::DirHandle;
use redirfs_core::RedirError;
use std::ffi::CString;

// readdir64 hands out the same record as readdir.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
const _: () = assert!(std::mem::size_of::<libc::dirent>() == std::mem::size_of::<libc::dirent64>());

#[no_mangle]
pub unsafe extern "C" fn opendir(path: *const c_char) -> *mut DIR {
    c_str(path)
        .and_then(|path| dispatch(|shim| shim.opendir(path), |dir| dir.as_ptr()))
        .unwrap_or_else(|| call_next!(opendir(path)))
}

unsafe fn readdir_routed(dir: *mut DIR) -> Option<*mut libc::dirent> {
    if dir.is_null() {
        return None;
    }
    dispatch(
        |shim| shim.readdir(DirHandle::from_ptr(dir)),
        |entry| entry.map_or(std::ptr::null_mut(), |entry| entry.as_ptr()),
    )
}

#[no_mangle]
pub unsafe extern "C" fn readdir(dir: *mut DIR) -> *mut libc::dirent {
    readdir_routed(dir).unwrap_or_else(|| call_next!(readdir(dir)))
}

#[no_mangle]
pub unsafe extern "C" fn readdir64(dir: *mut DIR) -> *mut c_void {
    readdir_routed(dir)
        .map(|entry| entry.cast())
        .unwrap_or_else(|| call_next!(readdir64(dir)))
}

#[no_mangle]
pub unsafe extern "C" fn closedir(dir: *mut DIR) -> c_int {
    (!dir.is_null())
        .then(|| dispatch(|shim| shim.closedir(DirHandle::from_ptr(dir)), |()| 0))
        .flatten()
        .unwrap_or_else(|| call_next!(closedir(dir)))
}

#[no_mangle]
pub unsafe extern "C" fn mkdir(path: *const c_char, mode: mode_t) -> c_int {
    c_str(path)
        .and_then(|path| dispatch(|shim| shim.mkdir(path, mode), |()| 0))
        .unwrap_or_else(|| call_next!(mkdir(path, mode)))
}

#[no_mangle]
pub unsafe extern "C" fn rmdir(path: *const c_char) -> c_int {
    c_str(path)
        .and_then(|path| dispatch(|shim| shim.rmdir(path), |()| 0))
        .unwrap_or_else(|| call_next!(rmdir(path)))
}

#[no_mangle]
pub unsafe extern "C" fn chdir(path: *const c_char) -> c_int {
    c_str(path)
        .and_then(|path| dispatch(|shim| shim.chdir(path), |()| 0))
        .unwrap_or_else(|| call_next!(chdir(path)))
}

/// Reports the logical working directory. A null `buf` gets a buffer from
/// `malloc`, sized to fit when `size` is 0, which the caller frees.
#[no_mangle]
pub unsafe extern "C" fn getcwd(buf: *mut c_char, size: size_t) -> *mut c_char {
    let routed = intercept(|shim| {
        if !buf.is_null() {
            let out = std::slice::from_raw_parts_mut(buf.cast::<u8>(), size);
            return Some(shim.getcwd(out).map(|_| buf));
        }

        let cwd = match shim.logical_cwd() {
            Ok(cwd) => cwd,
            Err(e) => return Some(Err(e.into())),
        };
        let capacity = if size == 0 { cwd.len() + 1 } else { size };
        let mem = libc::malloc(capacity).cast::<c_char>();
        if mem.is_null() {
            return Some(Err(std::io::Error::from_raw_os_error(libc::ENOMEM).into()));
        }
        let out = std::slice::from_raw_parts_mut(mem.cast::<u8>(), capacity);
        Some(match shim.getcwd(out) {
            Ok(_) => Ok(mem),
            Err(e) => {
                libc::free(mem.cast());
                Err(e)
            }
        })
    });
    match routed {
        Some(result) => reply(result, |cwd| cwd),
        None => call_next!(getcwd(buf, size)),
    }
}

/// The logical working directory in a `malloc` buffer.
#[no_mangle]
pub unsafe extern "C" fn get_current_dir_name() -> *mut c_char {
    let routed = intercept(|shim| {
        let name = shim
            .logical_cwd()
            .map_err(RedirError::from)
            .and_then(|cwd| CString::new(cwd).map_err(|_| RedirError::Internal {
                message: "working directory contains a NUL byte".to_string(),
            }));
        Some(name.and_then(|name| {
            let copy = libc::strdup(name.as_ptr());
            if copy.is_null() {
                Err(std::io::Error::from_raw_os_error(libc::ENOMEM).into())
            } else {
                Ok(copy)
            }
        }))
    });
    match routed {
        Some(result) => reply(result, |name| name),
        None => call_next!(get_current_dir_name()),
    }
}
