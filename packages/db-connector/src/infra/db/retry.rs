//! Exponential backoff retry executor shared by every bootstrap path.

use std::env;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::DbConnectorError;

pub const ENV_MAX_ATTEMPTS: &str = "DB_CONNECT_MAX_ATTEMPTS";
pub const ENV_MAX_ELAPSED_MS: &str = "DB_CONNECT_MAX_ELAPSED_MS";

/// Limits and growth parameters for [`retry`].
///
/// A policy is plain configuration; the per-call attempt counter, current
/// interval and start instant live inside a single `retry` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub initial_interval: Duration,
    /// Factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
    /// Each delay is drawn from `interval * (1 ± randomization_factor)`.
    /// Zero, or any non-finite value, disables jitter.
    pub randomization_factor: f64,
    /// Ceiling on total time measured from the start of the first attempt.
    pub max_elapsed_time: Duration,
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            randomization_factor: 0.0,
            max_elapsed_time: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Default policy with `DB_CONNECT_MAX_ATTEMPTS` and
    /// `DB_CONNECT_MAX_ELAPSED_MS` applied when set.
    pub fn from_env() -> Result<Self, DbConnectorError> {
        let mut policy = Self::default();
        if let Ok(raw) = env::var(ENV_MAX_ATTEMPTS) {
            policy.max_attempts = raw.trim().parse::<u32>().map_err(|_| {
                DbConnectorError::config(format!(
                    "{ENV_MAX_ATTEMPTS} must be a positive integer, got '{raw}'"
                ))
            })?;
        }
        if let Ok(raw) = env::var(ENV_MAX_ELAPSED_MS) {
            let ms = raw.trim().parse::<u64>().map_err(|_| {
                DbConnectorError::config(format!(
                    "{ENV_MAX_ELAPSED_MS} must be a number of milliseconds, got '{raw}'"
                ))
            })?;
            policy.max_elapsed_time = Duration::from_millis(ms);
        }
        Ok(policy)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_elapsed_time(mut self, max_elapsed_time: Duration) -> Self {
        self.max_elapsed_time = max_elapsed_time;
        self
    }

    pub fn with_initial_interval(mut self, initial_interval: Duration) -> Self {
        self.initial_interval = initial_interval;
        self
    }

    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    /// Nominal (jitter-free) delays in the order `retry` would sleep them.
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_interval), move |d| Some(self.grow(*d)))
    }

    fn grow(&self, interval: Duration) -> Duration {
        let next = interval.as_secs_f64() * self.multiplier.max(1.0);
        Duration::from_secs_f64(next.min(self.max_interval.as_secs_f64()))
    }

    fn jittered(&self, interval: Duration) -> Duration {
        if !self.randomization_factor.is_finite() {
            return interval;
        }
        let factor = self.randomization_factor.clamp(0.0, 0.99);
        if factor == 0.0 {
            return interval;
        }
        let secs = interval.as_secs_f64();
        let delta = secs * factor;
        Duration::from_secs_f64(rand::rng().random_range((secs - delta)..=(secs + delta)))
    }
}

/// Returned when every attempt allowed by the policy has failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub elapsed: Duration,
    /// Failure reported by the final attempt.
    pub last: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gave up after {} attempt(s) in {}ms: {}",
            self.attempts,
            self.elapsed.as_millis(),
            self.last
        )
    }
}

/// Run `op` until it succeeds or the policy gives up.
///
/// Stops on the first success. After a failure it stops when `max_attempts`
/// attempts have run, or when sleeping the next delay would pass
/// `max_elapsed_time`; otherwise it sleeps and tries again. A policy with
/// `max_attempts == 0` still runs the operation once.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let start = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        "connection_retry=success attempts={} elapsed_ms={}",
                        attempt,
                        start.elapsed().as_millis()
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let elapsed = start.elapsed();
        if attempt >= max_attempts {
            warn!(
                error = %err,
                "connection_retry=exhausted reason=max_attempts attempts={} elapsed_ms={}",
                attempt,
                elapsed.as_millis()
            );
            return Err(RetryExhausted {
                attempts: attempt,
                elapsed,
                last: err,
            });
        }

        let delay = policy.jittered(interval);
        if elapsed + delay > policy.max_elapsed_time {
            warn!(
                error = %err,
                "connection_retry=exhausted reason=max_elapsed attempts={} elapsed_ms={} max_elapsed_ms={}",
                attempt,
                elapsed.as_millis(),
                policy.max_elapsed_time.as_millis()
            );
            return Err(RetryExhausted {
                attempts: attempt,
                elapsed,
                last: err,
            });
        }

        warn!(
            error = %err,
            "connection_retry=failed attempt={} max_attempts={} delay_ms={}",
            attempt,
            max_attempts,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        interval = policy.grow(interval);
    }
}
