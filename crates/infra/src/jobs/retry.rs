//! Run an operation under a [`RetryPolicy`].

use std::thread;

use tracing::{debug, warn};

use super::types::RetryPolicy;

/// All attempts failed.
#[derive(Debug, thiserror::Error)]
#[error("retry exhausted after {attempts} attempt(s): {last_failure:#}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_failure: anyhow::Error,
}

/// Run `op(attempt)` until it succeeds or the policy is exhausted, sleeping
/// `delay_for_attempt(attempt)` between attempts. Attempts are 1-indexed.
pub fn execute<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryExhausted>
where
    F: FnMut(u32) -> anyhow::Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(failure) if policy.should_retry(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "attempt failed, retrying"
                );
                thread::sleep(delay);
            }
            Err(failure) => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_failure: failure,
                });
            }
        }
    }
}
