//! Bounded connect retries.
//!
//! Producers are often started after the monitor, so the listener retries the
//! initial connect a few times with exponential backoff and light jitter.
//! Waiting between attempts is interrupted by cancellation.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::debug;

const MIN_CONNECT_BACKOFF: Duration = Duration::from_millis(100);
const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Policy controlling connect attempts and backoff growth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first attempt.
    pub max_attempts: usize,
    /// Delay used before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for exponential backoff delay growth.
    pub max_backoff: Duration,
    /// Maximum random jitter added to each retry delay.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Five attempts, 100 ms doubling up to 2 s.
    pub fn connect() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: MIN_CONNECT_BACKOFF,
            max_backoff: MAX_CONNECT_BACKOFF,
            jitter: Duration::from_millis(25),
        }
    }

    /// Single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay before the retry that follows `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_backoff);
        }
        delay + jitter_duration(self.jitter, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::connect()
    }
}

/// Runs `op` until it succeeds, attempts run out, or `cancel` fires.
///
/// Returns `Ok(None)` when cancelled before an attempt succeeded; the last
/// error is returned once attempts are exhausted.
pub async fn retry_connect<T, E, Op, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: Op,
) -> Result<Option<T>, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let error = match op(attempt).await {
            Ok(value) => return Ok(Some(value)),
            Err(error) => error,
        };
        if attempt >= max_attempts {
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        debug!(
            event = "connect_attempt_failed",
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error
        );
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

fn jitter_duration(max_jitter: Duration, attempt: usize) -> Duration {
    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    if limit_nanos == 0 {
        return Duration::ZERO;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ ((attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % (limit_nanos + 1))
}
