use image::imageops::FilterType;
use image::DynamicImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use super::{denoise, scaled_dimensions, BackendInfo, BackendStatus, Upscaler, UpscaleError};
use crate::models::options::{Backend, ScaleFactor, UpscaleOptions};

/// The only factor the model produces.
pub const MODEL_FACTOR: ScaleFactor = ScaleFactor::X4;

/// Pre-trained super-resolution weights: a fixed 4× resample refined by a
/// learned 3×3 residual filter.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelModel {
    pub name: String,
    pub scale: u32,
    pub kernel: [f32; 9],
    #[serde(default)]
    pub bias: i32,
}

impl KernelModel {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read model weights {}: {e}", path.display()))?;
        let model: KernelModel = serde_json::from_str(&raw)
            .map_err(|e| format!("malformed model weights {}: {e}", path.display()))?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), String> {
        if self.scale != MODEL_FACTOR.get() {
            return Err(format!(
                "model {} has scale {}, expected {}",
                self.name,
                self.scale,
                MODEL_FACTOR.get()
            ));
        }
        if self.kernel.iter().any(|w| !w.is_finite()) {
            return Err(format!("model {} has non-finite weights", self.name));
        }
        Ok(())
    }

    /// Run inference on an RGB copy of `image`.
    pub fn infer(&self, image: &DynamicImage) -> Result<DynamicImage, UpscaleError> {
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        let (width, height) = scaled_dimensions(rgb.width(), rgb.height(), self.scale)?;
        let upsampled = rgb.resize_exact(width, height, FilterType::CatmullRom);
        let refined = upsampled.filter3x3(&self.kernel);
        Ok(if self.bias != 0 {
            refined.brighten(self.bias)
        } else {
            refined
        })
    }
}

/// Model-backed upscaler. Always outputs exactly 4×, whatever factor was
/// requested; the override is reported through [`Upscaler::output_factor`].
///
/// Weights load lazily on first use and at most once: concurrent first calls
/// wait on the same initialisation, and a failed load is remembered.
#[derive(Debug)]
pub struct ModelUpscaler {
    weights_path: Option<PathBuf>,
    model: OnceLock<Result<Arc<KernelModel>, String>>,
}

impl ModelUpscaler {
    pub fn new(weights_path: Option<PathBuf>) -> Self {
        Self {
            weights_path,
            model: OnceLock::new(),
        }
    }

    /// Upscaler with already-loaded weights.
    pub fn from_model(model: KernelModel) -> Self {
        let upscaler = Self::new(None);
        let _ = upscaler.model.set(Ok(Arc::new(model)));
        upscaler
    }

    /// Load the weights if that has not happened yet.
    pub fn warm_up(&self) -> Result<(), UpscaleError> {
        self.load().map(|_| ())
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.model.get(), Some(Ok(_)))
    }

    fn load(&self) -> Result<Arc<KernelModel>, UpscaleError> {
        self.model
            .get_or_init(|| {
                let path = self
                    .weights_path
                    .as_deref()
                    .ok_or_else(|| "no model weights configured (set MODEL_PATH)".to_string())?;
                let start = Instant::now();
                tracing::info!(path = %path.display(), "Loading upscaling model");
                match KernelModel::from_file(path) {
                    Ok(model) => {
                        tracing::info!(
                            model = %model.name,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Upscaling model loaded"
                        );
                        Ok(Arc::new(model))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Upscaling model failed to load");
                        Err(e)
                    }
                }
            })
            .clone()
            .map_err(UpscaleError::BackendUnavailable)
    }
}

impl Upscaler for ModelUpscaler {
    fn backend(&self) -> Backend {
        Backend::Model
    }

    fn output_factor(&self, _requested: ScaleFactor) -> ScaleFactor {
        MODEL_FACTOR
    }

    fn is_available(&self) -> bool {
        match self.model.get() {
            Some(loaded) => loaded.is_ok(),
            None => self.weights_path.is_some(),
        }
    }

    fn enhance(
        &self,
        image: DynamicImage,
        options: &UpscaleOptions,
    ) -> Result<DynamicImage, UpscaleError> {
        let model = self.load()?;
        let start = Instant::now();
        let output = model.infer(&image)?;
        let output = if options.denoise {
            denoise(&output)
        } else {
            output
        };

        tracing::debug!(
            model = %model.name,
            requested_factor = options.factor.get(),
            applied_factor = MODEL_FACTOR.get(),
            width = output.width(),
            height = output.height(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Model inference complete"
        );

        Ok(output)
    }

    fn describe(&self) -> BackendInfo {
        let status = match self.model.get() {
            Some(Ok(_)) => BackendStatus::Ready,
            Some(Err(_)) => BackendStatus::Unavailable,
            None if self.weights_path.is_some() => BackendStatus::NotLoaded,
            None => BackendStatus::Unavailable,
        };
        BackendInfo {
            backend: Backend::Model,
            service: "ModelUpscaler",
            method: "Learned 4x super-resolution filter",
            available_factors: vec![MODEL_FACTOR],
            features: vec!["learned_refinement", "edge_preservation", "denoising"],
            status,
        }
    }
}
