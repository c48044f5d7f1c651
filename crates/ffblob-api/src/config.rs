//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Route segment under `/api`
    pub function_name: String,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            function_name: "ffmpeg".to_string(),
            cors_origins: vec!["*".to_string()],
            max_body_size: 64 * 1024,
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            // Function hosts hand custom handlers their port in a dedicated variable.
            port: std::env::var("API_PORT")
                .or_else(|_| std::env::var("FUNCTIONS_CUSTOMHANDLER_PORT"))
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8080),
            function_name: std::env::var("FUNCTION_NAME")
                .ok()
                .map(|s| s.trim().trim_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "ffmpeg".to_string()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["*".to_string()]),
            max_body_size: std::env::var("MAX_BODY_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64 * 1024),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

/// Processing pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Explicit ffmpeg location; searched for when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Upper bound for a single ffmpeg run
    pub process_timeout: Duration,
    /// Budget for the whole request (download, process, upload)
    pub request_timeout: Duration,
    /// Time between SIGTERM and SIGKILL on timeout
    pub kill_grace: Duration,
    /// Value passed to ffmpeg `-v`
    pub ffmpeg_log_level: String,
    /// Bytes of stdout/stderr retained per run
    pub output_limit: usize,
    /// Characters of stderr returned to the caller
    pub stderr_excerpt_chars: usize,
    /// Parent of per-request scratch directories
    pub scratch_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            process_timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(900),
            kill_grace: Duration::from_secs(5),
            ffmpeg_log_level: "error".to_string(),
            output_limit: 64 * 1024,
            stderr_excerpt_chars: 2000,
            scratch_root: std::env::temp_dir(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            process_timeout: env_parse("FFMPEG_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.process_timeout),
            request_timeout: env_parse("REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            kill_grace: env_parse("FFMPEG_KILL_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.kill_grace),
            ffmpeg_log_level: std::env::var("FFMPEG_LOG_LEVEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.ffmpeg_log_level),
            output_limit: env_parse("FFMPEG_OUTPUT_LIMIT_BYTES").unwrap_or(defaults.output_limit),
            stderr_excerpt_chars: env_parse("STDERR_EXCERPT_CHARS")
                .unwrap_or(defaults.stderr_excerpt_chars),
            scratch_root: std::env::var("SCRATCH_ROOT")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
        }
    }
}
