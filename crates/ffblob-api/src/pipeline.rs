//! The download → transcode → upload pipeline behind the HTTP endpoint.
//!
//! Requests are checked completely (fields, URLs, directive) before any I/O.
//! Each run owns a scratch directory that is removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

use ffblob_media::{Directive, FfmpegCommand, ProcessRunner, ScratchSpace, WorkItem};
use ffblob_models::TranscodeRequest;
use ffblob_storage::{
    generate_object_name, output_extension, ObjectStore, StoreReference, UrlPolicy,
};

use crate::config::PipelineConfig;
use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// A request that passed every check that needs no I/O.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub input: StoreReference,
    pub output: StoreReference,
    pub directive: Directive,
}

/// Runs transcode jobs against an object store.
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    policy: UrlPolicy,
    ffmpeg: PathBuf,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        policy: UrlPolicy,
        ffmpeg: PathBuf,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            policy,
            ffmpeg,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// Validate fields, resolve both store references and vet the directive.
    pub fn prepare(&self, request: &TranscodeRequest) -> ApiResult<PreparedJob> {
        let request = request.validate()?;

        let input = StoreReference::parse_object(&request.input_blob_url, &self.policy)
            .map_err(|e| ApiError::validation(format!("Invalid inputBlobUrl: {}", e)))?;
        let output = StoreReference::parse_container(&request.output_container_url, &self.policy)
            .map_err(|e| ApiError::validation(format!("Invalid outputContainerName: {}", e)))?;
        let directive = Directive::parse(&request.command)?;

        Ok(PreparedJob {
            input,
            output,
            directive,
        })
    }

    /// Run a prepared job and return the uploaded object's URL.
    pub async fn execute(&self, job: PreparedJob) -> ApiResult<Url> {
        let deadline = Instant::now() + self.config.request_timeout;

        let scratch = ScratchSpace::acquire(&self.config.scratch_root).map_err(|e| {
            warn!("Failed to create scratch space: {}", e);
            ApiError::internal("failed to create scratch space")
        })?;

        let result = self.process(&job, &scratch, deadline).await;

        if let Err(e) = scratch.close().await {
            warn!("Failed to release scratch space: {}", e);
        }

        match &result {
            Ok(_) => metrics::record_pipeline_outcome("success"),
            Err(e) => metrics::record_pipeline_outcome(e.kind()),
        }
        result
    }

    /// Prepare and execute in one step.
    pub async fn run(&self, request: &TranscodeRequest) -> ApiResult<Url> {
        let job = self.prepare(request)?;
        self.execute(job).await
    }

    async fn process(
        &self,
        job: &PreparedJob,
        scratch: &ScratchSpace,
        deadline: Instant,
    ) -> ApiResult<Url> {
        let item = scratch.work_item(&output_extension(&job.input));

        let start = Instant::now();
        let bytes = within(deadline, "download", self.store.download(&job.input, &item.input_path))
            .await??;
        metrics::record_download_duration(start.elapsed().as_secs_f64());
        info!(bytes, "Source downloaded");

        self.transcode(job, &item, deadline).await?;

        let name = generate_object_name(&job.input, Utc::now());
        let start = Instant::now();
        let url = within(
            deadline,
            "upload",
            self.store.upload(&item.output_path, &job.output, &name),
        )
        .await?
        .map_err(ApiError::from_upload)?;
        metrics::record_upload_duration(start.elapsed().as_secs_f64());
        info!(output = %url, "Output uploaded");

        Ok(url)
    }

    async fn transcode(&self, job: &PreparedJob, item: &WorkItem, deadline: Instant) -> ApiResult<()> {
        let args = FfmpegCommand::new(&item.input_path, &item.output_path)
            .log_level(self.config.ffmpeg_log_level.as_str())
            .directive(&job.directive)
            .build_args();

        let timeout = self
            .config
            .process_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        if timeout.is_zero() {
            return Err(ApiError::timeout("Request time budget exhausted before processing"));
        }

        let runner = ProcessRunner::new()
            .with_output_limit(self.config.output_limit)
            .with_kill_grace(self.config.kill_grace)
            .with_working_dir(&item.scratch_dir);

        debug!(args = args.len(), timeout_secs = timeout.as_secs(), "Running ffmpeg");
        let start = Instant::now();
        let outcome = match runner.run(&self.ffmpeg, &args, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let label = match e {
                    ffblob_media::MediaError::Timeout(_) => "timeout",
                    _ => "failed",
                };
                metrics::record_ffmpeg_duration(label, start.elapsed().as_secs_f64());
                return Err(e.into());
            }
        };

        if !outcome.success() {
            metrics::record_ffmpeg_duration("failed", outcome.duration.as_secs_f64());
            let excerpt = self.stderr_excerpt(&outcome.stderr_lossy(), &item.scratch_dir);
            warn!(
                exit_code = ?outcome.exit_code,
                duration_ms = outcome.duration_ms(),
                stderr = %excerpt,
                "ffmpeg failed"
            );

            let message = match outcome.exit_code {
                Some(code) => format!("ffmpeg exited with status {}", code),
                None => "ffmpeg was terminated by a signal".to_string(),
            };
            return Err(ApiError::Process {
                message,
                stderr: Some(excerpt),
            });
        }

        metrics::record_ffmpeg_duration("success", outcome.duration.as_secs_f64());
        info!(duration_ms = outcome.duration_ms(), "ffmpeg finished");

        match tokio::fs::metadata(&item.output_path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
            _ => Err(ApiError::process("process produced no output")),
        }
    }

    /// Tail of stderr with local paths replaced by placeholders.
    fn stderr_excerpt(&self, stderr: &str, scratch_dir: &Path) -> String {
        let mut text = stderr.to_string();

        let replacements = [
            (scratch_dir.to_string_lossy().into_owned(), "<scratch>"),
            (
                self.config.scratch_root.to_string_lossy().into_owned(),
                "<scratch-root>",
            ),
            (self.ffmpeg.to_string_lossy().into_owned(), "<ffmpeg>"),
        ];
        for (needle, placeholder) in replacements {
            if needle.len() > 1 {
                text = text.replace(&needle, placeholder);
            }
        }

        let text = text.trim();
        let count = text.chars().count();
        let limit = self.config.stderr_excerpt_chars;
        if count <= limit {
            return text.to_string();
        }
        text.chars().skip(count - limit).collect()
    }
}

/// Bound a store call by what is left of the request budget.
async fn within<T>(
    deadline: Instant,
    stage: &str,
    fut: impl std::future::Future<Output = T>,
) -> ApiResult<T> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining == Duration::ZERO {
        return Err(ApiError::timeout(format!(
            "Request time budget exhausted before {}",
            stage
        )));
    }

    tokio::time::timeout(remaining, fut).await.map_err(|_| {
        ApiError::timeout(format!("Request time budget exhausted during {}", stage))
    })
}
