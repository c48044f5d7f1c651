//! Application state.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use ffblob_media::resolve_ffmpeg;
use ffblob_storage::{
    BlobStoreClient, BlobStoreConfig, ManagedIdentityCredential, TokenCache, UrlPolicy,
    STORAGE_RESOURCE,
};

use crate::config::{ApiConfig, PipelineConfig};
use crate::pipeline::Pipeline;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Create new application state.
    ///
    /// Fails when ffmpeg cannot be located or the identity endpoint is not
    /// configured.
    pub fn new(config: ApiConfig, pipeline_config: PipelineConfig) -> anyhow::Result<Self> {
        let ffmpeg = resolve_ffmpeg(pipeline_config.ffmpeg_path.as_deref())
            .context("Failed to locate ffmpeg")?;
        info!(path = %ffmpeg.display(), "Using ffmpeg");

        let credential =
            ManagedIdentityCredential::from_env().context("Failed to configure managed identity")?;
        let tokens = Arc::new(TokenCache::new(Arc::new(credential), STORAGE_RESOURCE));
        let store = BlobStoreClient::new(BlobStoreConfig::from_env(), tokens)
            .context("Failed to create blob store client")?;

        let pipeline = Pipeline::new(Arc::new(store), UrlPolicy::from_env(), ffmpeg, pipeline_config);
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: ApiConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }
}
