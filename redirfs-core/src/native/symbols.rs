//! The next definition of every native entry point the layer wraps.
//!
//! Each accessor looks its symbol up with `dlsym(RTLD_NEXT, ..)` the first
//! time it is called and caches the address for the rest of the process, so
//! concurrent first calls race only to store the same value. `None` means the
//! symbol does not exist in any object loaded after the caller.

use libc::{c_char, c_int, c_uint, c_void, mode_t, off_t, size_t, ssize_t, DIR, FILE};
use std::sync::OnceLock;

fn lookup(name: &'static str) -> usize {
    // SAFETY: `name` is a NUL-terminated literal produced by `next_symbol!`.
    unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr() as *const c_char) as usize }
}

macro_rules! next_symbol {
    ($name:ident, $ty:ty) => {
        pub fn $name() -> Option<$ty> {
            static ADDRESS: OnceLock<usize> = OnceLock::new();
            let address = *ADDRESS.get_or_init(|| lookup(concat!(stringify!($name), "\0")));
            // SAFETY: a non-zero address is the dlsym result for this exact
            // symbol, whose C prototype is `$ty`.
            (address != 0).then(|| unsafe { std::mem::transmute::<usize, $ty>(address) })
        }
    };
}

macro_rules! next_symbols {
    () => {};
    ($name:ident: fn($($arg:ty),*) -> $ret:ty; $($rest:tt)*) => {
        next_symbol!($name, unsafe extern "C" fn($($arg),*) -> $ret);
        next_symbols!($($rest)*);
    };
    ($name:ident: variadic fn($($arg:ty),*) -> $ret:ty; $($rest:tt)*) => {
        next_symbol!($name, unsafe extern "C" fn($($arg),*, ...) -> $ret);
        next_symbols!($($rest)*);
    };
}

next_symbols! {
    open: variadic fn(*const c_char, c_int) -> c_int;
    open64: variadic fn(*const c_char, c_int) -> c_int;
    creat: fn(*const c_char, mode_t) -> c_int;
    close: fn(c_int) -> c_int;
    read: fn(c_int, *mut c_void, size_t) -> ssize_t;
    write: fn(c_int, *const c_void, size_t) -> ssize_t;
    pread: fn(c_int, *mut c_void, size_t, off_t) -> ssize_t;
    pwrite: fn(c_int, *const c_void, size_t, off_t) -> ssize_t;
    pread64: fn(c_int, *mut c_void, size_t, i64) -> ssize_t;
    pwrite64: fn(c_int, *const c_void, size_t, i64) -> ssize_t;
    lseek: fn(c_int, off_t, c_int) -> off_t;
    lseek64: fn(c_int, i64, c_int) -> i64;
    fsync: fn(c_int) -> c_int;
    fdatasync: fn(c_int) -> c_int;
    dup: fn(c_int) -> c_int;
    dup2: fn(c_int, c_int) -> c_int;
    dup3: fn(c_int, c_int, c_int) -> c_int;
    fcntl: variadic fn(c_int, c_int) -> c_int;
    fcntl64: variadic fn(c_int, c_int) -> c_int;

    tmpfile: fn() -> *mut FILE;
    fopen: fn(*const c_char, *const c_char) -> *mut FILE;
    fopen64: fn(*const c_char, *const c_char) -> *mut FILE;
    fdopen: fn(c_int, *const c_char) -> *mut FILE;
    fclose: fn(*mut FILE) -> c_int;
    fflush: fn(*mut FILE) -> c_int;
    fileno: fn(*mut FILE) -> c_int;

    opendir: fn(*const c_char) -> *mut DIR;
    readdir: fn(*mut DIR) -> *mut libc::dirent;
    readdir64: fn(*mut DIR) -> *mut c_void;
    closedir: fn(*mut DIR) -> c_int;

    mkdir: fn(*const c_char, mode_t) -> c_int;
    rmdir: fn(*const c_char) -> c_int;
    rename: fn(*const c_char, *const c_char) -> c_int;
    renameat: fn(c_int, *const c_char, c_int, *const c_char) -> c_int;
    renameat2: fn(c_int, *const c_char, c_int, *const c_char, c_uint) -> c_int;
    chmod: fn(*const c_char, mode_t) -> c_int;
    stat: fn(*const c_char, *mut libc::stat) -> c_int;
    lstat: fn(*const c_char, *mut libc::stat) -> c_int;
    fstat: fn(c_int, *mut libc::stat) -> c_int;
    stat64: fn(*const c_char, *mut c_void) -> c_int;
    lstat64: fn(*const c_char, *mut c_void) -> c_int;
    fstat64: fn(c_int, *mut c_void) -> c_int;
    __xstat: fn(c_int, *const c_char, *mut libc::stat) -> c_int;
    __lxstat: fn(c_int, *const c_char, *mut libc::stat) -> c_int;
    __fxstat: fn(c_int, c_int, *mut libc::stat) -> c_int;
    fstatat: fn(c_int, *const c_char, *mut libc::stat, c_int) -> c_int;
    fstatat64: fn(c_int, *const c_char, *mut c_void, c_int) -> c_int;
    statx: fn(c_int, *const c_char, c_int, c_uint, *mut c_void) -> c_int;

    chdir: fn(*const c_char) -> c_int;
    getcwd: fn(*mut c_char, size_t) -> *mut c_char;
    get_current_dir_name: fn() -> *mut c_char;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolves_libc_symbols() {
        assert!(open().is_some());
        assert!(read().is_some());
        assert!(opendir().is_some());
        assert!(getcwd().is_some());
    }

    #[test]
    fn test_resolves_large_file_and_at_variants() {
        assert!(fcntl64().is_some());
        assert!(dup3().is_some());
        assert!(renameat().is_some());
        assert!(statx().is_some());
    }

    #[test]
    fn test_resolution_is_cached() {
        let first = close().map(|f| f as usize);
        let second = close().map(|f| f as usize);
        assert_eq!(first, second);
    }

    #[test]
    fn test_resolved_symbol_is_callable() {
        let next_dup = dup().unwrap();
        // SAFETY: dup on stdin either succeeds with a new descriptor or fails.
        let fd = unsafe { next_dup(0) };
        if fd >= 0 {
            // SAFETY: fd was just returned by dup.
            unsafe { libc::close(fd) };
        }
    }
}
