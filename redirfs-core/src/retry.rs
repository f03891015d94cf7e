//! Retry policy for transient backend results.

use crate::backend::{BackendError, BackendResult};
use std::time::Duration;
use tracing::trace;

/// How the layer waits out a backend that answers "try again".
///
/// The retry never gives up: a call either succeeds or fails hard. The first
/// `spin_attempts` retries busy-wait, later ones sleep with a doubling delay
/// capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub spin_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            spin_attempts: 64,
            initial_backoff: Duration::from_micros(1),
            max_backoff: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that only ever busy-waits.
    pub fn busy_wait() -> Self {
        Self {
            spin_attempts: u32::MAX,
            ..Self::default()
        }
    }

    /// Runs `op` until it returns anything but [`BackendError::Again`].
    pub fn run<T, F>(&self, operation: &'static str, mut op: F) -> BackendResult<T>
    where
        F: FnMut() -> BackendResult<T>,
    {
        let mut attempt: u32 = 0;
        let mut delay = self.initial_backoff;

        loop {
            match op() {
                Err(BackendError::Again) => {
                    attempt = attempt.saturating_add(1);
                    trace!("Backend {} busy, retrying (attempt {})", operation, attempt);

                    if attempt <= self.spin_attempts {
                        std::hint::spin_loop();
                    } else {
                        std::thread::sleep(delay);
                        delay = (delay * 2).min(self.max_backoff);
                    }
                }
                other => return other,
            }
        }
    }
}
