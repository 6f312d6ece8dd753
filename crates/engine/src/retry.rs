// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The retry executor: bounded exponential backoff with jitter.
//!
//! Every external I/O call in the system routes through [`retry`],
//! parameterized per call site only by its classifier and a [`RetryPolicy`].
//! The executor is stateless and reentrant; nesting is the caller's budget
//! decision.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Classification of one observed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; worth another attempt.
    Retryable,
    /// Retrying cannot help; propagate immediately.
    Fatal,
}

/// Attempt budget and delay shape for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    kiln_core::setters! {
        set {
            max_attempts: u32,
            base_delay: Duration,
            max_jitter: Duration,
        }
    }

    /// Sleep before the attempt after `attempt` (1-based):
    /// `base_delay * 2^(attempt-1) + uniform(0..=max_jitter)`.
    ///
    /// The exponent is clamped so a generous budget cannot overflow the
    /// multiplier.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        backoff.saturating_add(jitter(self.max_jitter))
    }
}

/// Random jitter in `0..=max`.
///
/// A linear-congruential step over the subsecond nanos is plenty here; the
/// jitter only has to decorrelate workers, not be unpredictable.
fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let seed = u64::from(
        std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    Duration::from_millis(seed.wrapping_mul(6364136223846793005).wrapping_add(1) % (max_ms + 1))
}

/// A wrapped operation's terminal failure.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Classified non-retryable; propagated on first sight.
    #[error("fatal: {0}")]
    Fatal(E),
    /// The operation never succeeded within its attempt budget.
    #[error("{attempts} attempts exhausted: {source}")]
    Exhausted { attempts: u32, source: E },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The underlying error, whichever way the budget ended.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) => e,
            RetryError::Exhausted { source, .. } => source,
        }
    }
}

/// Run `op` until it succeeds, a fatal error is classified, or the attempt
/// budget is exhausted. Sleeps [`RetryPolicy::delay_for`] between attempts.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    classify: impl Fn(&E) -> ErrorClass,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if classify(&err) == ErrorClass::Fatal {
                    tracing::warn!(attempt, error = %err, "fatal failure, not retrying");
                    return Err(RetryError::Fatal(err));
                }
                if attempt >= policy.max_attempts {
                    tracing::warn!(attempts = attempt, error = %err, "attempt budget exhausted");
                    return Err(RetryError::Exhausted { attempts: attempt, source: err });
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                    "retryable failure, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
