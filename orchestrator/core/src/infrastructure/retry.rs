// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Retry logic with exponential backoff, bounded by total elapsed time.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::domain::runtime_config::RetryConfig;

/// Backoff schedule derived from [`RetryConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub exponent: f64,
    /// Bounds the whole call, attempts included.
    pub max_elapsed_time: Duration,
    pub retryable_status_codes: Vec<u16>,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_interval: config.initial_interval,
            max_interval: config.max_interval,
            exponent: config.exponent,
            max_elapsed_time: config.max_elapsed_time,
            retryable_status_codes: config.retryable_status_codes.clone(),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure. The single attempt is
    /// still bounded by `max_elapsed_time`.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_interval`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_interval.as_nanos() as f64 * self.exponent.powi(attempt as i32);
        let capped = base.min(self.max_interval.as_nanos() as f64);
        Duration::from_nanos(capped.max(0.0).round() as u64)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    fn attempts_exhausted(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts_made >= max)
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClassification {
    /// Should retry (transient error)
    Retry,

    /// Should not retry (permanent error)
    NoRetry,
}

/// Trait for errors that can be classified for retry
pub trait RetryableError: Sized {
    fn classify(&self) -> RetryClassification;

    /// Error reported when the elapsed-time budget runs out while an attempt
    /// is still pending and no earlier attempt failed.
    fn budget_exhausted(elapsed: Duration) -> Self;
}

/// Execute an async operation with retry logic.
///
/// Every attempt runs under a timeout of whatever is left of
/// `max_elapsed_time`, measured from the first attempt, and a retry is only
/// scheduled if its delay still fits inside that budget. A timed-out attempt
/// returns the last failure seen, or [`RetryableError::budget_exhausted`]
/// when the first attempt never finished.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation_name: &str, mut operation: F) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    let mut last_error: Option<E> = None;

    loop {
        let remaining = policy.max_elapsed_time.saturating_sub(started.elapsed());
        let outcome = match timeout(remaining, operation()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "{}: attempt {} still pending when the {:?} budget ran out",
                    operation_name,
                    attempt + 1,
                    policy.max_elapsed_time
                );
                return Err(last_error.unwrap_or_else(|| E::budget_exhausted(started.elapsed())));
            }
        };

        match outcome {
            Ok(result) => return Ok(result),
            Err(e) => {
                if e.classify() == RetryClassification::NoRetry {
                    debug!("{}: non-retryable error on attempt {}: {}", operation_name, attempt + 1, e);
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt);
                if policy.attempts_exhausted(attempt + 1) || started.elapsed() + delay > policy.max_elapsed_time {
                    warn!(
                        "{}: giving up after {} attempt(s) in {:?}: {}",
                        operation_name,
                        attempt + 1,
                        started.elapsed(),
                        e
                    );
                    return Err(e);
                }

                warn!(
                    "{}: attempt {} failed, retrying in {:?}: {}",
                    operation_name,
                    attempt + 1,
                    delay,
                    e
                );
                last_error = Some(e);
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
