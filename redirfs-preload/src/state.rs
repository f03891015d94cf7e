//! Process-wide dispatcher and the glue every exported symbol goes through.

use crate::guard::Guard;
use errno::{set_errno, Errno};
use redirfs_core::backend::LocalBackend;
use redirfs_core::dispatch::Dispatcher;
use redirfs_core::native::System;
use redirfs_core::registry::MountRegistry;
use redirfs_core::types::config::ENV_LOG;
use redirfs_core::types::ConfigSources;
use redirfs_core::{RedirError, Result};
use libc::c_char;
use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

pub(crate) type Shim = Dispatcher<LocalBackend, System>;

static SHIM: OnceLock<Shim> = OnceLock::new();

fn shim() -> &'static Shim {
    SHIM.get_or_init(|| {
        init_logging();
        let registry = Arc::new(MountRegistry::new(ConfigSources::from_env()));
        let backend = LocalBackend::new(registry.clone());
        info!("redirfs loaded in pid {}", std::process::id());
        Dispatcher::new(backend, System, registry)
    })
}

/// Logs to stderr only when `REDIRFS_LOG` holds a filter; the host process's
/// output is otherwise left untouched.
fn init_logging() {
    let Ok(filter) = EnvFilter::try_from_env(ENV_LOG) else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Runs `f` against the dispatcher unless this thread is already inside the
/// layer. `None` means the call belongs to the native definition.
///
/// A panic is contained here and turned into `EIO` for the caller.
pub(crate) fn intercept<T>(f: impl FnOnce(&'static Shim) -> Option<Result<T>>) -> Option<Result<T>> {
    let _guard = Guard::enter()?;
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(shim()))) {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("Panic while serving a routed call");
            Some(Err(RedirError::Internal {
                message: "panic while serving a routed call".to_string(),
            }))
        }
    };
    if let Some(Err(e)) = &outcome {
        debug!("Routed call failed: {}", e);
    }
    outcome
}

/// Runs a side effect that keeps the tables in step with a native call.
pub(crate) fn observe(f: impl FnOnce(&'static Shim)) {
    let Some(_guard) = Guard::enter() else {
        return;
    };
    if panic::catch_unwind(AssertUnwindSafe(|| f(shim()))).is_err() {
        error!("Panic while tracking a native call");
    }
}

/// The value a C entry point returns on failure.
pub(crate) trait Sentinel {
    const FAILED: Self;
}

impl Sentinel for i32 {
    const FAILED: Self = -1;
}

impl Sentinel for i64 {
    const FAILED: Self = -1;
}

impl Sentinel for isize {
    const FAILED: Self = -1;
}

/// `fread` and `fwrite` report failure as zero items.
impl Sentinel for usize {
    const FAILED: Self = 0;
}

impl<T> Sentinel for *mut T {
    const FAILED: Self = std::ptr::null_mut();
}

/// Converts a routed result into the C return value, storing the error code
/// in `errno` on failure.
pub(crate) fn reply<T, R: Sentinel>(result: Result<T>, ok: impl FnOnce(T) -> R) -> R {
    match result {
        Ok(value) => ok(value),
        Err(e) => fail(&e),
    }
}

fn fail<R: Sentinel>(err: &RedirError) -> R {
    set_errno(Errno(err.errno()));
    R::FAILED
}

/// [`intercept`] followed by [`reply`].
pub(crate) fn dispatch<T, R: Sentinel>(
    f: impl FnOnce(&'static Shim) -> Option<Result<T>>,
    ok: impl FnOnce(T) -> R,
) -> Option<R> {
    intercept(f).map(|result| reply(result, ok))
}

/// Failure for a native symbol that could not be resolved.
pub(crate) fn unresolved<R: Sentinel>(symbol: &'static str) -> R {
    let err = RedirError::Unresolved { symbol };
    // Logging may itself write through an interposed call.
    if let Some(_guard) = Guard::enter() {
        warn!("{}", err);
    }
    fail(&err)
}

/// Borrows a C path argument. Null and non-UTF-8 paths are left to the
/// native call.
pub(crate) unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the caller passes a NUL-terminated C string.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Borrows a caller buffer for reading into.
pub(crate) unsafe fn bytes_mut<'a>(ptr: *mut libc::c_void, len: usize) -> Option<&'a mut [u8]> {
    if len == 0 {
        return Some(&mut []);
    }
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the caller guarantees `len` writable bytes at `ptr`.
    Some(unsafe { std::slice::from_raw_parts_mut(ptr.cast(), len) })
}

/// Borrows a caller buffer for writing from.
pub(crate) unsafe fn bytes<'a>(ptr: *const libc::c_void, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the caller guarantees `len` readable bytes at `ptr`.
    Some(unsafe { std::slice::from_raw_parts(ptr.cast(), len) })
}

/// Calls the next definition of a symbol, failing with `ENOSYS` when there is
/// none.
macro_rules! call_next {
    ($name:ident($($arg:expr),* $(,)?)) => {
        match ::redirfs_core::native::symbols::$name() {
            // SAFETY: the caller's own arguments are forwarded unchanged.
            Some(next) => unsafe { next($($arg),*) },
            None => $crate::state::unresolved(stringify!($name)),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_sets_errno() {
        let ret: i32 = reply::<(), i32>(Err(RedirError::Closed { fd: 9 }), |_| 0);
        assert_eq!(ret, -1);
        assert_eq!(errno::errno().0, libc::EBADF);

        let ptr: *mut libc::FILE = reply(Err(RedirError::CrossMount {
            from: "a".into(),
            to: "b".into(),
        }), |p: *mut libc::FILE| p);
        assert!(ptr.is_null());
        assert_eq!(errno::errno().0, libc::ENOENT);
    }

    #[test]
    fn test_reply_passes_success_through() {
        let n: isize = reply(Ok(12usize), |n| n as isize);
        assert_eq!(n, 12);
    }

    #[test]
    fn test_unresolved_symbol_fails_with_enosys() {
        let ret: i32 = unresolved("fopencookie");
        assert_eq!(ret, -1);
        assert_eq!(errno::errno().0, libc::ENOSYS);

        let ptr: *mut libc::DIR = unresolved("opendir");
        assert!(ptr.is_null());
        assert_eq!(errno::errno().0, libc::ENOSYS);

        // Still fails when the thread is already inside the layer.
        let _guard = Guard::enter().unwrap();
        let n: isize = unresolved("read");
        assert_eq!(n, -1);
    }

    #[test]
    fn test_intercept_declines_when_reentered() {
        let _guard = Guard::enter().unwrap();
        let routed = intercept(|_| Some(Ok(1)));
        assert!(routed.is_none());
    }

    #[test]
    fn test_buffers() {
        // SAFETY: zero-length borrows never touch the pointer.
        unsafe {
            assert_eq!(bytes(std::ptr::null(), 0), Some(&[][..]));
            assert!(bytes(std::ptr::null(), 4).is_none());
            assert!(c_str(std::ptr::null()).is_none());
            assert_eq!(c_str(b"/mnt/plfs/x\0".as_ptr().cast()), Some("/mnt/plfs/x"));
        }
    }
}
