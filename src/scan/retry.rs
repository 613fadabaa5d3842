//! Retry Policy
//!
//! Wraps one dispatch in bounded retries. Backoff before retry `k`
//! (0-based) is `base_delay * 2^k`, capped at `max_delay`. The policy
//! always returns a [`CallOutcome`]; it never sleeps after the final
//! attempt.

use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::types::{CallOutcome, ScanTarget};
use crate::error::CallError;

/// Where a call sequence stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    FailedTerminal { attempts: u32 },
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            // at least one attempt is always made
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Backoff before retrying after the failed attempt with index `retry`
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The state following a failed attempt (1-based `attempt`)
    pub fn next_state(&self, attempt: u32, error: &CallError) -> RetryState {
        if error.is_retryable() && attempt < self.max_attempts {
            RetryState::Retrying {
                attempt,
                delay: self.backoff(attempt - 1),
            }
        } else {
            RetryState::FailedTerminal { attempts: attempt }
        }
    }

    /// Run `call` until it succeeds, fails terminally or runs out of
    /// attempts. Returns the final result and the number of attempts made.
    pub async fn run<F, Fut>(&self, label: &str, mut call: F) -> (Result<Value, CallError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, CallError>>,
    {
        let mut attempt = 1;

        loop {
            let error = match call().await {
                Ok(value) => {
                    debug!(call = %label, attempts = attempt, "Call succeeded");
                    return (Ok(value), attempt);
                }
                Err(error) => error,
            };

            match self.next_state(attempt, &error) {
                RetryState::Retrying { delay, .. } => {
                    warn!(
                        call = %label,
                        error_kind = %error.kind,
                        "Retrying in {:?} (attempt {}/{}): {}",
                        delay, attempt, self.max_attempts, error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => {
                    warn!(
                        call = %label,
                        error_kind = %error.kind,
                        attempts = attempt,
                        "Call failed: {}",
                        error.message
                    );
                    return (Err(error), attempt);
                }
            }
        }
    }

    /// Run the call for one target and record its outcome
    pub async fn execute<F, Fut>(&self, target: ScanTarget, call: F) -> CallOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, CallError>>,
    {
        let started = Instant::now();
        let (result, attempts) = self.run(&target.display_name, call).await;
        match result {
            Ok(value) => CallOutcome::succeeded(target, value, attempts, started.elapsed()),
            Err(error) => CallOutcome::failed(target, error, attempts, started.elapsed()),
        }
    }
}
