//! Bounded retry for store operations.
//!
//! Transient failures get exactly one more attempt after a short backoff.
//! Everything else is returned immediately.

use std::time::Duration;

use tracing::{info_span, warn, Instrument};

use crate::error::StorageResult;
use crate::metrics::record_retry;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Delay before each retry.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let backoff_ms: u64 = std::env::var("STORE_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(500);

        Self {
            max_retries: 1,
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

/// Execute an async operation, retrying transient failures.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> StorageResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;

    loop {
        let span = info_span!("store_attempt", operation = %operation, attempt = attempt + 1);

        match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = config.backoff.as_millis() as u64,
                    "Store operation failed, retrying: {}",
                    e
                );
                record_retry(operation);
                tokio::time::sleep(config.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
