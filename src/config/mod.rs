use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Largest decoded input image, in pixels (width × height).
    #[serde(default = "default_max_input_pixels")]
    pub max_input_pixels: u64,

    /// Largest produced output image, in pixels.
    #[serde(default = "default_max_output_pixels")]
    pub max_output_pixels: u64,

    /// Number of jobs allowed to process at the same time.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Upper bound on a single processing attempt.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// How long finished jobs are kept before eviction. Zero keeps them forever.
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Weights file for the model backend. Without it the backend reports unavailable.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_max_input_pixels() -> u64 {
    4096 * 4096
}

fn default_max_output_pixels() -> u64 {
    100_000_000
}

fn default_worker_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_job_timeout_secs() -> u64 {
    120
}

fn default_job_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_upload_bytes: default_max_upload_bytes(),
            max_input_pixels: default_max_input_pixels(),
            max_output_pixels: default_max_output_pixels(),
            worker_concurrency: default_worker_concurrency(),
            job_timeout_secs: default_job_timeout_secs(),
            job_ttl_secs: default_job_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            model_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Build a config from explicit key/value pairs, using the same
    /// (upper-case) names as the environment.
    pub fn from_iter<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// `None` when eviction is disabled.
    pub fn job_ttl(&self) -> Option<Duration> {
        (self.job_ttl_secs > 0).then(|| Duration::from_secs(self.job_ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn image_limits(&self) -> crate::services::codec::ImageLimits {
        crate::services::codec::ImageLimits {
            max_input_pixels: self.max_input_pixels,
            max_output_pixels: self.max_output_pixels,
        }
    }
}
