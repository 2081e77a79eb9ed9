//! Bounded exponential backoff for transient backend failures.

use std::future::Future;
use std::time::Duration;

use crate::error::LlmError;

/// Errors that can classify themselves as worth retrying.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for LlmError {
    fn is_transient(&self) -> bool {
        LlmError::is_transient(self)
    }
}

/// Retry policy for transient failures.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

/// Run `f`, retrying on transient errors up to the policy's attempt budget.
///
/// Non-transient errors surface immediately; the last transient error
/// surfaces once attempts are exhausted.
///
/// # Errors
///
/// Returns the final error when all attempts fail.
pub async fn with_backoff<T, E, F, Fut>(policy: &BackoffPolicy, op: &str, mut f: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retry + 1 < policy.max_attempts.max(1) => {
                let delay = policy.delay(retry);
                tracing::warn!(
                    "{op} failed ({e}), retrying in {}ms ({}/{})",
                    delay.as_millis(),
                    retry + 1,
                    policy.max_attempts - 1,
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
