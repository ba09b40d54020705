//! Bounded exponential backoff for transient transport failures.

use crate::config::RetryConfig;
use crate::error::{CloudError, CloudResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retries an operation while it fails with a transient error.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        })
    }

    /// Delay before retry number `attempt` (0-based), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Exhausted transient failures surface as [`CloudError::Network`];
    /// everything else is returned unchanged on first occurrence.
    pub async fn run<F, Fut, T>(&self, op_name: &str, mut op: F) -> CloudResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CloudResult<T>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= attempts {
                        let cause = match e {
                            CloudError::Network(msg) => msg,
                            other => other.to_string(),
                        };
                        return Err(CloudError::Network(format!(
                            "{op_name} failed after {attempts} attempts: {cause}"
                        )));
                    }
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        "{op_name} retry {attempt}/{}: {e} (waiting {}ms)",
                        attempts - 1,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
