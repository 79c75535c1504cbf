//! Per-attempt timeout with exponential backoff between attempts
//!
//! Each attempt races against its own timer. A failed attempt (timeout or
//! error) is retried after `base * 2^(n-1)` until the attempt budget runs out;
//! the last failure is returned to the caller. Dropping the returned future
//! abandons both the in-flight attempt and any pending backoff sleep.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Default per-attempt timeout
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default first backoff delay
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^(n-1)` before retry `n`
    Exponential { base: Duration },
    /// Same delay before every retry
    Fixed(Duration),
    /// Retry immediately
    None,
}

impl Backoff {
    /// Delay before the 0-indexed `attempt`; attempt 0 never waits
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match *self {
            Backoff::Exponential { base } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor)
            }
            Backoff::Fixed(delay) => delay,
            Backoff::None => Duration::ZERO,
        }
    }
}

/// Attempt budget, timeout and backoff for one retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff: Backoff::Exponential {
                base: DEFAULT_BACKOFF_BASE,
            },
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Raised when a single attempt outlives `RetryPolicy::attempt_timeout`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimedOut(pub Duration);

/// Run `operation` under `policy`, passing the 0-indexed attempt number
pub async fn retry_with_timeout<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<AttemptTimedOut> + Display,
{
    let mut attempt = 0;
    loop {
        let delay = policy.backoff.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match tokio::time::timeout(policy.attempt_timeout, operation(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(E::from(AttemptTimedOut(policy.attempt_timeout))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_retries => return Err(err),
            Err(err) => {
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.total_attempts(),
                    error = %err,
                    "Attempt failed, retrying"
                );
                attempt += 1;
            }
        }
    }
}
