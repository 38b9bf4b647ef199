//! Bounded-retry polling
//!
//! `wait_until` is the single suspension point of the harness: it polls a
//! value at a fixed interval until a predicate passes, the timeout elapses,
//! or an external cancellation signal fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why a wait ended without the predicate passing.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The timeout elapsed; carries the last polled value for diagnostics.
    #[error("timed out after {waited:?}; last observed: {last}")]
    Timeout { waited: Duration, last: String },

    /// The cancellation token fired. Not a test failure; propagates up.
    #[error("wait cancelled")]
    Cancelled,
}

/// Timeout and poll interval for a wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(1),
        }
    }
}

impl WaitOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Shared cancellation signal for in-flight waits.
///
/// Clones share the underlying flag; cancelling any clone aborts every wait
/// holding one at its next interval boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel this token when the process receives Ctrl-C / SIGTERM, so a
    /// test-runner abort unwinds waits instead of leaving them sleeping.
    ///
    /// The process-wide handler can only be installed once.
    pub fn install_ctrlc_handler(&self) -> anyhow::Result<()> {
        let flag = Arc::clone(&self.cancelled);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })?;
        Ok(())
    }
}

/// Poll `poll` until `predicate` passes, returning the first passing value.
///
/// The first poll happens before any sleep, so an already-satisfied
/// predicate returns immediately. On timeout the last polled value is
/// rendered into the error; on cancellation the wait aborts at the next
/// interval boundary.
pub fn wait_until<T, F, P>(
    mut poll: F,
    predicate: P,
    opts: &WaitOptions,
    cancel: &CancelToken,
) -> Result<T, WaitError>
where
    T: std::fmt::Debug,
    F: FnMut() -> T,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        let value = poll();
        if predicate(&value) {
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= opts.timeout {
            return Err(WaitError::Timeout {
                waited: elapsed,
                last: format!("{value:?}"),
            });
        }

        // Never sleep past the deadline.
        let remaining = opts.timeout - elapsed;
        thread::sleep(opts.interval.min(remaining));
    }
}
