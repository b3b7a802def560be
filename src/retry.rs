//! Fixed-delay retry for remote operations that may fail transiently.
//!
//! Two loops in the pipeline use this: role-assignment creation, which
//! retries forever while the new principal replicates through the directory,
//! and cluster validation, which gives up after a fixed number of attempts.
//! The policy is a value so callers (and tests) can bound or shorten it.
//!
//! # Example
//!
//! ```ignore
//! use kubeseed::retry::{retry_with_policy, RetryPolicy};
//!
//! let assignment = retry_with_policy(
//!     &RetryPolicy::forever(Duration::from_secs(3)),
//!     "create_role_assignment",
//!     || async { directory.create_role_assignment(&request).await },
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// How often and how long to retry a failing operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay between consecutive attempts
    pub delay: Duration,
}

impl RetryPolicy {
    /// Retry until success, sleeping `delay` between attempts
    pub fn forever(delay: Duration) -> Self {
        Self {
            max_attempts: 0,
            delay,
        }
    }

    /// Make at most `attempts` attempts, sleeping `delay` between them
    pub fn bounded(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts.max(1),
            delay,
        }
    }

    /// Whether attempt number `attempt` (1-based) was the last one allowed
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Run `operation` until it succeeds or the policy's attempt budget runs out.
///
/// Sleeps between attempts, never after the final one. Returns the last error
/// once the budget is exhausted; an unbounded policy only ever returns `Ok`.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if policy.is_exhausted(attempt) {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = policy.delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
