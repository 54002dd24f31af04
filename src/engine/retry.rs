use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use super::PlannerError;
use crate::observability;

/// Backoff for document write conflicts.
///
/// Defaults: 100 attempts, 10ms first delay doubling up to 1s.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (0-based):
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

/// Run `op` until it stops failing with [`PlannerError::Conflict`].
/// Every other outcome is returned as is.
pub(crate) async fn retry_on_conflict<F, Fut, T>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, PlannerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlannerError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Err(PlannerError::Conflict(id)) => {
                metrics::counter!(observability::CONFLICT_RETRIES_TOTAL).increment(1);
                if attempt >= policy.max_attempts {
                    tracing::warn!(attempts = attempt, "{what}: giving up after repeated conflicts on {id}");
                    return Err(PlannerError::RetriesExhausted { attempts: attempt });
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::debug!(attempt, ?delay, "{what}: write conflict on {id}, retrying");
                sleep(delay).await;
            }
            other => {
                if attempt > 1 && other.is_ok() {
                    tracing::debug!(attempt, "{what}: succeeded after retry");
                }
                return other;
            }
        }
    }
}
