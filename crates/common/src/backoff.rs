//! Retry policies
//!
//! A [`BackoffPolicy`] describes how long to wait between attempts and when
//! to give up. [`retry`] drives an async operation under such a policy.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Backoff policy for a single logical operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_interval: Duration,
    /// Factor applied to the delay after every retry (1 = fixed delay)
    pub multiplier: u32,
    /// Give up once the next delay would exceed this
    pub max_interval: Option<Duration>,
    /// Give up once sleeping would cross this much time since the first attempt
    pub max_elapsed: Option<Duration>,
    /// Total number of attempts, including the first one
    pub max_attempts: Option<u32>,
}

impl BackoffPolicy {
    /// Doubling delays starting at `initial`, stopping once a delay would exceed `max_interval`.
    pub fn exponential(initial: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval: initial,
            multiplier: 2,
            max_interval: Some(max_interval),
            max_elapsed: None,
            max_attempts: None,
        }
    }

    /// Constant `delay` between at most `attempts` attempts.
    pub fn fixed(delay: Duration, attempts: u32) -> Self {
        Self {
            initial_interval: delay,
            multiplier: 1,
            max_interval: None,
            max_elapsed: None,
            max_attempts: Some(attempts),
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Upstream login validation: 30s doubling within a 2 minute window.
    pub fn login() -> Self {
        Self::exponential(Duration::from_secs(30), Duration::from_secs(120))
    }

    /// Redirection toggling: 5 attempts, 30s apart.
    pub fn redirection() -> Self {
        Self::fixed(Duration::from_secs(30), 5)
    }

    /// Start tracking a new operation under this policy.
    pub fn start(&self) -> RetryState {
        RetryState {
            interval: self.initial_interval,
            attempts: 1,
            deadline: self.max_elapsed.map(|d| Instant::now() + d),
            policy: self.clone(),
        }
    }
}

/// Per-operation retry bookkeeping
#[derive(Debug, Clone)]
pub struct RetryState {
    interval: Duration,
    attempts: u32,
    deadline: Option<Instant>,
    policy: BackoffPolicy,
}

impl RetryState {
    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait before the next attempt, or `None` if the policy is exhausted.
    /// Calling this counts the upcoming attempt.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        let delay = self.interval;
        if let Some(max) = self.policy.max_interval {
            if delay > max {
                return None;
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() + delay > deadline {
                return None;
            }
        }

        self.attempts += 1;
        self.interval = delay.saturating_mul(self.policy.multiplier.max(1));
        Some(delay)
    }
}

/// Run `op` until it succeeds, fails with an error `should_retry` rejects, or
/// the policy is exhausted. The last error is returned on exhaustion.
pub async fn retry<T, E, F, Fut, R>(
    policy: &BackoffPolicy,
    operation: &str,
    mut op: F,
    should_retry: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut state = policy.start();

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if should_retry(&e) => match state.next_delay() {
                Some(delay) => {
                    warn!(
                        "{} failed (attempt {}): {}; retrying in {:?}",
                        operation,
                        state.attempts() - 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        "{} failed after {} attempts, giving up: {}",
                        operation,
                        state.attempts(),
                        e
                    );
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}
