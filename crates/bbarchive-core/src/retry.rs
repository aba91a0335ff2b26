//! Escalating backoff for rate limits and transient transport failures
//!
//! Short fixed delay per failure; every `escalate_every`-th consecutive
//! failure waits `(failures / escalate_every + 1) * long_unit` instead.
//! Retries never give up on their own: only success or cancellation ends them.

use std::time::Duration;

use crate::error::FetchError;
use crate::shutdown::CancelToken;

/// Backoff timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub short_delay: Duration,
    pub long_unit: Duration,
    pub escalate_every: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            short_delay: Duration::from_secs(5),
            long_unit: Duration::from_secs(60),
            escalate_every: 5,
        }
    }
}

/// Per-worker consecutive failure counter.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Count one more failure and return how long to wait before retrying.
    pub fn record_failure(&mut self) -> Duration {
        self.failures += 1;
        let every = self.policy.escalate_every.max(1);
        if self.failures % every == 0 {
            self.policy.long_unit * (self.failures / every + 1)
        } else {
            self.policy.short_delay
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Run `attempt_fn` until it succeeds, fails permanently, or `cancel` fires.
///
/// `notify` receives a one-line status for every retry (throttled display
/// is the caller's concern).
pub fn retry_with_backoff<T>(
    label: &str,
    backoff: &mut Backoff,
    cancel: &CancelToken,
    notify: &mut dyn FnMut(&str),
    mut attempt_fn: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    loop {
        cancel.check()?;
        match attempt_fn() {
            Ok(v) => {
                backoff.reset();
                return Ok(v);
            }
            Err(e) if e.is_retryable() => {
                let delay = backoff.record_failure();
                let line = format!(
                    "{label}: {e}, retry #{} in {}s",
                    backoff.failures(),
                    delay.as_secs()
                );
                log::debug!("{line}");
                notify(&line);
                cancel.sleep(delay)?;
            }
            Err(e) => {
                backoff.reset();
                return Err(e);
            }
        }
    }
}
