//! Shared data models for the ffblob service.
//!
//! This crate provides Serde-serializable types for:
//! - The transcode request body and its validated form
//! - Success and error response bodies
//! - Request identifiers used for log correlation

pub mod request;
pub mod request_id;
pub mod response;

pub use request::{ProcessingRequest, RequestError, TranscodeRequest};
pub use request_id::RequestId;
pub use response::{ErrorBody, TranscodeResponse};
