use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

const BACKOFF_BASE: f64 = 1.5;
const MIN_MAX_WAIT_SECS: u64 = 2;
const FALLBACK_MAX_WAIT_SECS: u64 = 30;

/// Exponential backoff shared by every retry loop in the indexer.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Retries after the first attempt. Negative means retry forever.
    pub max_attempts: i64,
    pub max_wait: Duration,
}

impl Backoff {
    pub fn new(max_attempts: i64, max_wait_secs: i64) -> Self {
        let max_wait_secs = u64::try_from(max_wait_secs)
            .unwrap_or(FALLBACK_MAX_WAIT_SECS)
            .max(MIN_MAX_WAIT_SECS);
        Backoff {
            max_attempts,
            max_wait: Duration::from_secs(max_wait_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based): 1.5^attempt seconds, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = BACKOFF_BASE.powi(attempt.min(i32::MAX as u32) as i32);
        if !secs.is_finite() || secs >= self.max_wait.as_secs_f64() {
            return self.max_wait;
        }
        Duration::from_secs_f64(secs)
    }

    pub fn allows(&self, retries_so_far: u32) -> bool {
        self.max_attempts < 0 || i64::from(retries_so_far) < self.max_attempts
    }

    /// Run `op` until it succeeds or the budget is spent. `label` names the work in logs.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retries = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.allows(retries) => {
                    retries += 1;
                    let wait = self.delay(retries);
                    warn!(
                        "{} failed (attempt {}): {}. Retrying in {:.1}s",
                        label,
                        retries,
                        e,
                        wait.as_secs_f64()
                    );
                    sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
