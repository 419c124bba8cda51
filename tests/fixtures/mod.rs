//! Test fixtures: generated images, model weights, and app construction.

#![allow(dead_code)]

use axum::Router;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image_upscaler::app_state::AppState;
use image_upscaler::config::AppConfig;
use image_upscaler::models::options::{Backend, ScaleFactor, UpscaleOptions};
use image_upscaler::routes;
use image_upscaler::services::upscaler::model::KernelModel;
use image_upscaler::services::upscaler::{
    BackendInfo, BackendStatus, FastResampler, ModelUpscaler, UpscaleError, Upscaler, Upscalers,
};

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            ((x + y) % 256) as u8,
        ])
    }))
}

fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    gradient(width, height)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("encode fixture image");
    bytes
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    encoded(width, height, ImageFormat::Png)
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encoded(width, height, ImageFormat::Jpeg)
}

/// Identity-kernel weights; output is a plain 4× Catmull-Rom resample.
pub fn identity_model() -> KernelModel {
    KernelModel {
        name: "identity".to_string(),
        scale: 4,
        kernel: [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        bias: 0,
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        worker_concurrency: 2,
        job_timeout_secs: 30,
        job_ttl_secs: 0,
        ..AppConfig::default()
    }
}

/// Fast backend plus an in-memory model with identity weights.
pub fn upscalers_with_model() -> Upscalers {
    Upscalers::new(
        Arc::new(FastResampler::new()),
        Arc::new(ModelUpscaler::from_model(identity_model())),
    )
}

/// Fast backend plus a model backend with no weights configured.
pub fn upscalers_without_model() -> Upscalers {
    Upscalers::from_config(&test_config())
}

pub fn build_app(config: AppConfig, upscalers: Upscalers) -> (AppState, Router) {
    let state = AppState::new(config, upscalers);
    let app = routes::router(state.clone(), None);
    (state, app)
}

pub fn default_app() -> (AppState, Router) {
    build_app(test_config(), upscalers_with_model())
}

/// Model-slot stub that sleeps before returning a plain 4× resample.
pub struct SlowUpscaler {
    pub delay: Duration,
}

impl Upscaler for SlowUpscaler {
    fn backend(&self) -> Backend {
        Backend::Model
    }

    fn output_factor(&self, _requested: ScaleFactor) -> ScaleFactor {
        ScaleFactor::X4
    }

    fn enhance(
        &self,
        image: DynamicImage,
        _options: &UpscaleOptions,
    ) -> Result<DynamicImage, UpscaleError> {
        std::thread::sleep(self.delay);
        Ok(image.resize_exact(
            image.width() * 4,
            image.height() * 4,
            image::imageops::FilterType::Nearest,
        ))
    }

    fn describe(&self) -> BackendInfo {
        BackendInfo {
            backend: Backend::Model,
            service: "SlowUpscaler",
            method: "sleep then nearest-neighbour",
            available_factors: vec![ScaleFactor::X4],
            features: vec![],
            status: BackendStatus::Ready,
        }
    }
}

pub fn upscalers_with_slow_model(delay: Duration) -> Upscalers {
    Upscalers::new(
        Arc::new(FastResampler::new()),
        Arc::new(SlowUpscaler { delay }),
    )
}
