//! Retry policy — bounded exponential backoff with uniform jitter.
//!
//! Delay before retry *i* (0-based) is `min(initial * multiplier^i, max)`,
//! shifted by up to `± jitter_factor` of itself and clamped to `[0, max]`.
//! A call is attempted at most `max_retries + 1` times. Only retryable
//! [`RemoteError`]s are retried; anything else fails on the spot.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use catsync_core::{ConfigError, RetryConfig};

use crate::error::{RemoteError, RetryError};

/// A successful value plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Un-jittered delay before retry number `retry` (0-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.config.backoff_multiplier.powi(exponent);
        let secs = self.config.initial_delay.as_secs_f64() * factor;
        let max = self.config.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay with jitter applied; `noise` is a sample from `[-1, 1]`.
    pub fn jittered_delay(&self, retry: u32, noise: f64) -> Duration {
        let base = self.base_delay(retry).as_secs_f64();
        let jitter = base * self.config.jitter_factor * noise.clamp(-1.0, 1.0);
        let secs = (base + jitter)
            .max(0.0)
            .min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Run `op` until it succeeds, fails fatally, runs out of retries, or
    /// `cancel` fires. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<Retried<T>, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(call = label, attempts = attempt, "succeeded after retry");
                    }
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    source: err,
                });
            }
            if attempt > self.config.max_retries {
                tracing::warn!(call = label, attempts = attempt, error = %err, "retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: err,
                });
            }

            let delay = self.jittered_delay(attempt - 1, jitter_noise());
            tracing::warn!(
                call = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable failure; backing off",
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn jitter_noise() -> f64 {
    rand::thread_rng().gen_range(-1.0..=1.0)
}
