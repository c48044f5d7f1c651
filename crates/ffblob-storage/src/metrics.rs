//! Store metrics collection.
//!
//! - Request counters by operation and status
//! - Latency histograms
//! - Retry counters
//! - Transferred bytes

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total store requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "ffblob_store_requests_total";

    /// Total retry attempts by operation.
    pub const RETRIES_TOTAL: &str = "ffblob_store_retries_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "ffblob_store_latency_seconds";

    /// Bytes moved, by direction.
    pub const BYTES_TOTAL: &str = "ffblob_store_bytes_total";
}

/// Record metrics for a completed store operation.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record bytes downloaded or uploaded.
pub fn record_bytes(direction: &'static str, bytes: u64) {
    counter!(names::BYTES_TOTAL, "direction" => direction).increment(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::REQUESTS_TOTAL.starts_with("ffblob_store_"));
        assert!(names::RETRIES_TOTAL.contains("retries"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
    }
}
