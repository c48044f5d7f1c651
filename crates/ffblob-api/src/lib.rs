//! HTTP front end for ffblob.
//!
//! This crate provides:
//! - The transcode endpoint and its download → ffmpeg → upload pipeline
//! - Health, readiness and Prometheus endpoints
//! - Request id propagation, security headers and request logging

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod state;

pub use config::{ApiConfig, PipelineConfig};
pub use error::{ApiError, ApiResult};
pub use pipeline::{Pipeline, PreparedJob};
pub use routes::create_router;
pub use state::AppState;
