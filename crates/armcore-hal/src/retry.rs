//! Bounded retry with exponential backoff for status polling.
//!
//! Only the status query is retried.  Motion commands are never passed
//! through this module: a stalled physical motion must surface as a timeout
//! and be handled by the supervisor.

use std::time::Duration;

use armcore_types::{ArmError, HardwareStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapter::HardwareAdapter;

/// Retry budget for a single status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.  Values below 1 are treated
    /// as 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after every failure.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Deadline for each individual attempt.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    5
}
fn default_max_backoff_ms() -> u64 {
    40
}
fn default_attempt_timeout_ms() -> u64 {
    100
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Worst-case wall time of a fully failing poll.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let waits: Duration = (1..attempts).map(|a| self.backoff(a)).sum();
        Duration::from_millis(self.attempt_timeout_ms) * attempts + waits
    }
}

/// Query the hardware status, retrying transient failures.
///
/// Each attempt is bounded by `attempt_timeout_ms`.  When every attempt
/// fails the last failure is escalated to [`ArmError::HardwareTimeout`].
pub async fn poll_status(
    adapter: &dyn HardwareAdapter,
    policy: &RetryPolicy,
) -> Result<HardwareStatus, ArmError> {
    let attempts = policy.max_attempts.max(1);
    let per_attempt = Duration::from_millis(policy.attempt_timeout_ms);
    let mut last_failure = String::new();

    for attempt in 1..=attempts {
        match tokio::time::timeout(per_attempt, adapter.get_status()).await {
            Ok(Ok(status)) => {
                if attempt > 1 {
                    debug!(adapter = adapter.id(), attempt, "status poll recovered");
                }
                return Ok(status);
            }
            Ok(Err(e)) => last_failure = e.to_string(),
            Err(_) => last_failure = format!("attempt timed out after {} ms", policy.attempt_timeout_ms),
        }

        if attempt < attempts {
            let wait = policy.backoff(attempt);
            warn!(
                adapter = adapter.id(),
                attempt,
                backoff_ms = wait.as_millis() as u64,
                error = %last_failure,
                "status poll failed; retrying"
            );
            tokio::time::sleep(wait).await;
        }
    }

    Err(ArmError::HardwareTimeout {
        operation: format!("status poll ({attempts} attempts, last error: {last_failure})"),
        timeout_ms: policy.worst_case().as_millis() as u64,
    })
}
