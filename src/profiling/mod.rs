//! Scoped test instrumentation
//!
//! Entry/exit timing only; no coupling to the profiling subsystem's
//! internals. Records go through `tracing`, so the host test runner decides
//! where they end up.

use std::time::Instant;

use tracing::info;

/// Guard recording the wall-clock duration of a harness run.
///
/// Logs at entry and again on drop with the elapsed time.
#[must_use = "the profile records its duration when dropped"]
pub struct TestProfile {
    name: String,
    started: Instant,
}

/// Wrap a harness scenario in entry/exit instrumentation.
pub fn profile_test(name: &str) -> TestProfile {
    info!(test = name, "profile start");
    TestProfile {
        name: name.to_string(),
        started: Instant::now(),
    }
}

impl Drop for TestProfile {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        info!(test = %self.name, elapsed_ms, "profile end");
    }
}

/// Initialize tracing for a test binary, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
