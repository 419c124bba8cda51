//! Pluggable upscaling backends.
//!
//! Every backend implements [`Upscaler`]; [`Upscalers`] maps each
//! [`Backend`] variant to exactly one implementation so the runner never
//! branches on backend-specific flags.

pub mod fast;
pub mod model;

use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::job::{ErrorKind, JobFailure};
use crate::models::options::{Backend, ScaleFactor, UpscaleOptions};

pub use fast::FastResampler;
pub use model::ModelUpscaler;

/// PIL-style sharpen kernel (normalised by its sum of 16).
pub(crate) const SHARPEN_KERNEL: [f32; 9] = [-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0];

/// Light blur followed by a sharpen pass; shared denoise step of both backends.
pub(crate) fn denoise(image: &DynamicImage) -> DynamicImage {
    image.blur(0.5).filter3x3(&SHARPEN_KERNEL)
}

/// Target dimensions for `factor`, or a processing error on overflow.
pub(crate) fn scaled_dimensions(
    width: u32,
    height: u32,
    factor: u32,
) -> Result<(u32, u32), UpscaleError> {
    match (width.checked_mul(factor), height.checked_mul(factor)) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => Err(UpscaleError::PayloadTooLarge(format!(
            "{width}x{height} cannot be scaled by {factor}"
        ))),
    }
}

/// Capability shared by every upscaling backend.
pub trait Upscaler: Send + Sync {
    fn backend(&self) -> Backend;

    /// Factor this backend will apply when `requested` is asked for.
    fn output_factor(&self, requested: ScaleFactor) -> ScaleFactor {
        requested
    }

    /// Whether jobs for this backend can currently be accepted.
    fn is_available(&self) -> bool {
        true
    }

    /// Enlarge `image` according to `options`. Blocking; call off the async runtime.
    fn enhance(
        &self,
        image: DynamicImage,
        options: &UpscaleOptions,
    ) -> Result<DynamicImage, UpscaleError>;

    fn describe(&self) -> BackendInfo;
}

/// Readiness of a backend as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Ready,
    NotLoaded,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub backend: Backend,
    pub service: &'static str,
    pub method: &'static str,
    pub available_factors: Vec<ScaleFactor>,
    pub features: Vec<&'static str>,
    pub status: BackendStatus,
}

/// One upscaler per backend variant.
#[derive(Clone)]
pub struct Upscalers {
    fast: Arc<dyn Upscaler>,
    model: Arc<dyn Upscaler>,
}

impl Upscalers {
    pub fn new(fast: Arc<dyn Upscaler>, model: Arc<dyn Upscaler>) -> Self {
        Self { fast, model }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(FastResampler::new()),
            Arc::new(ModelUpscaler::new(config.model_path.clone())),
        )
    }

    pub fn get(&self, backend: Backend) -> &Arc<dyn Upscaler> {
        match backend {
            Backend::Fast => &self.fast,
            Backend::Model => &self.model,
        }
    }

    pub fn describe_all(&self) -> Vec<BackendInfo> {
        vec![self.fast.describe(), self.model.describe()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpscaleError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("image too large: {0}")]
    PayloadTooLarge(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("processing timed out after {0}s")]
    Timeout(u64),
}

impl UpscaleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpscaleError::InvalidImage(_) => ErrorKind::InvalidImage,
            UpscaleError::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            UpscaleError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            UpscaleError::Processing(_) => ErrorKind::ProcessingError,
            UpscaleError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn into_failure(self) -> JobFailure {
        JobFailure {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
