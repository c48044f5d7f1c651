//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "ffblob_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "ffblob_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "ffblob_http_requests_in_flight";

    // Processing metrics
    pub const FFMPEG_DURATION_SECONDS: &str = "ffblob_ffmpeg_duration_seconds";
    pub const DOWNLOAD_DURATION_SECONDS: &str = "ffblob_download_duration_seconds";
    pub const UPLOAD_DURATION_SECONDS: &str = "ffblob_upload_duration_seconds";
    pub const PIPELINE_OUTCOMES_TOTAL: &str = "ffblob_pipeline_outcomes_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record FFmpeg run duration by result ("success", "failed", "timeout").
pub fn record_ffmpeg_duration(result: &str, duration_secs: f64) {
    let labels = [("result", result.to_string())];
    histogram!(names::FFMPEG_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record download duration.
pub fn record_download_duration(duration_secs: f64) {
    histogram!(names::DOWNLOAD_DURATION_SECONDS).record(duration_secs);
}

/// Record upload duration.
pub fn record_upload_duration(duration_secs: f64) {
    histogram!(names::UPLOAD_DURATION_SECONDS).record(duration_secs);
}

/// Record how a pipeline run ended ("success" or an error kind).
pub fn record_pipeline_outcome(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::PIPELINE_OUTCOMES_TOTAL, &labels).increment(1);
}

/// Metrics middleware for HTTP requests.
///
/// Paths are labelled by route template so arbitrary URLs don't create new series.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_namespaced() {
        for name in [
            names::HTTP_REQUESTS_TOTAL,
            names::FFMPEG_DURATION_SECONDS,
            names::PIPELINE_OUTCOMES_TOTAL,
        ] {
            assert!(name.starts_with("ffblob_"));
        }
    }
}
