use super::{symbols, unresolved, DirHandle, Native};
use libc::{c_char, c_int, mode_t};
use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

/// [`Native`] over the resolved next symbols.
#[derive(Debug, Clone, Copy, Default)]
pub struct System;

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn check(ret: c_int) -> io::Result<c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

impl Native for System {
    fn open(&self, path: &Path, flags: c_int, mode: mode_t) -> io::Result<RawFd> {
        let open = symbols::open().ok_or_else(|| unresolved("open"))?;
        let path = c_path(path)?;
        // SAFETY: path is NUL-terminated and outlives the call.
        check(unsafe { open(path.as_ptr(), flags, mode as libc::c_uint) })
    }

    fn close(&self, fd: RawFd) -> io::Result<()> {
        let close = symbols::close().ok_or_else(|| unresolved("close"))?;
        // SAFETY: closing an arbitrary descriptor is memory safe.
        check(unsafe { close(fd) }).map(|_| ())
    }

    fn read(&self, fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        let read = symbols::read().ok_or_else(|| unresolved("read"))?;
        // SAFETY: buf is valid for buf.len() writable bytes.
        let n = unsafe { read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn seek(&self, fd: RawFd, offset: i64, whence: c_int) -> io::Result<u64> {
        let lseek = symbols::lseek().ok_or_else(|| unresolved("lseek"))?;
        // SAFETY: lseek has no memory-safety preconditions.
        let pos = unsafe { lseek(fd, offset as libc::off_t, whence) };
        if pos < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(pos as u64)
        }
    }

    fn anonymous_file(&self, cloexec: bool) -> io::Result<RawFd> {
        let tmpfile = symbols::tmpfile().ok_or_else(|| unresolved("tmpfile"))?;
        let fcntl = symbols::fcntl().ok_or_else(|| unresolved("fcntl"))?;
        let fclose = symbols::fclose().ok_or_else(|| unresolved("fclose"))?;

        // SAFETY: the stream is checked for NULL and closed exactly once; the
        // duplicated descriptor keeps the unlinked file alive.
        unsafe {
            let stream = tmpfile();
            if stream.is_null() {
                return Err(io::Error::last_os_error());
            }
            let cmd = if cloexec { libc::F_DUPFD_CLOEXEC } else { libc::F_DUPFD };
            let fd = fcntl(libc::fileno(stream), cmd, 0 as c_int);
            let err = io::Error::last_os_error();
            fclose(stream);
            if fd < 0 {
                Err(err)
            } else {
                Ok(fd)
            }
        }
    }

    fn open_placeholder_dir(&self) -> io::Result<DirHandle> {
        let opendir = symbols::opendir().ok_or_else(|| unresolved("opendir"))?;
        // SAFETY: the literal is NUL-terminated.
        let dir = unsafe { opendir(b"/\0".as_ptr() as *const c_char) };
        if dir.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(DirHandle::from_ptr(dir))
        }
    }

    fn dir_fd(&self, dir: DirHandle) -> io::Result<RawFd> {
        // SAFETY: dir came from open_placeholder_dir and is still open.
        check(unsafe { libc::dirfd(dir.as_ptr()) })
    }

    fn close_dir(&self, dir: DirHandle) -> io::Result<()> {
        let closedir = symbols::closedir().ok_or_else(|| unresolved("closedir"))?;
        // SAFETY: dir is an open stream owned by the caller.
        check(unsafe { closedir(dir.as_ptr()) }).map(|_| ())
    }

    fn chdir(&self, path: &Path) -> io::Result<()> {
        let chdir = symbols::chdir().ok_or_else(|| unresolved("chdir"))?;
        let path = c_path(path)?;
        // SAFETY: path is NUL-terminated and outlives the call.
        check(unsafe { chdir(path.as_ptr()) }).map(|_| ())
    }

    fn current_dir(&self) -> io::Result<String> {
        let getcwd = symbols::getcwd().ok_or_else(|| unresolved("getcwd"))?;
        let mut buf = vec![0u8; 512];
        loop {
            // SAFETY: buf is valid for buf.len() writable bytes.
            let ret = unsafe { getcwd(buf.as_mut_ptr() as *mut c_char, buf.len()) };
            if !ret.is_null() {
                break;
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ERANGE) {
                return Err(err);
            }
            let grown = buf.len() * 2;
            buf.resize(grown, 0);
        }

        let cwd = CStr::from_bytes_until_nul(&buf)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        cwd.to_str()
            .map(str::to_owned)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "working directory is not UTF-8"))
    }
}
