//! Azure Blob Storage access for ffblob.
//!
//! This crate provides:
//! - Blob URL parsing against an endpoint allowlist
//! - Managed identity credentials with a shared token cache
//! - Streamed download and non-overwriting upload over the Blob REST API
//! - Bounded retry for transient failures
//! - Unique output object naming

pub mod client;
pub mod credential;
pub mod error;
pub mod metrics;
pub mod naming;
pub mod reference;
pub mod retry;
pub mod token_cache;

pub use client::{BlobStoreClient, BlobStoreConfig, ObjectStore};
pub use credential::{
    AccessToken, CredentialProvider, IdentitySource, ManagedIdentityConfig,
    ManagedIdentityCredential, STORAGE_RESOURCE,
};
pub use error::{StorageError, StorageResult};
pub use naming::{generate_object_name, output_extension};
pub use reference::{StoreReference, UrlPolicy};
pub use retry::RetryConfig;
pub use token_cache::TokenCache;
