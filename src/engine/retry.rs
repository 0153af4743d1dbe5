//! Bounded retry with backoff.

use std::future::Future;
use std::time::Duration;

use crate::config::ReadinessConfig;
use crate::defaults::READINESS_BACKOFF;

/// Outcome of a [`Retry::run`] that did not succeed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error the predicate refused to retry.
    Aborted(E),
}

/// Retry policy: a fixed number of attempts with a growing, capped delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Retry {
    attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff: f64,
}

impl Retry {
    /// Fixed delay between attempts. Zero attempts is treated as one.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            backoff: 1.0,
        }
    }

    /// Multiply the delay by `factor` after each failure, up to `max_delay`.
    pub fn with_backoff(mut self, factor: f64, max_delay: Duration) -> Self {
        self.backoff = if factor.is_finite() && factor >= 1.0 { factor } else { 1.0 };
        self.max_delay = max_delay.max(self.initial_delay);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to sleep after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Run `op` until it succeeds, the predicate rejects an error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        mut op: F,
        mut retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(RetryError::Aborted(e)),
                Err(e) if attempt >= self.attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(_) => {
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl From<ReadinessConfig> for Retry {
    fn from(config: ReadinessConfig) -> Self {
        Retry::new(config.attempts, Duration::from_millis(config.initial_delay_ms))
            .with_backoff(READINESS_BACKOFF, Duration::from_millis(config.max_delay_ms))
    }
}
