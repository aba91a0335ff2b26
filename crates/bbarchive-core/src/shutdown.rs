//! Cooperative cancellation, threaded explicitly into every blocking call.
//!
//! A [`CancelToken`] is cheap to clone; all clones observe the same flag.
//! SIGINT/SIGTERM set the flag once, a second signal exits the process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity at which sleeping callers re-check the flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Returned by blocking helpers when the token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once the token fired.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Err(Cancelled)` if the token fires.
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Resolves once the token fires. Used to race in-flight requests.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Route SIGINT/SIGTERM into `token`.
///
/// First signal: set the flag so workers unwind.
/// Second signal: exit immediately with code 130.
pub fn install_signal_handlers(token: &CancelToken) -> std::io::Result<()> {
    use signal_hook::flag;

    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        // Registered first so it only fires once the flag is already set.
        flag::register_conditional_shutdown(signal, 130, Arc::clone(&token.flag))?;
        flag::register(signal, Arc::clone(&token.flag))?;
    }
    Ok(())
}
