use image::imageops::FilterType;
use image::{DynamicImage, Rgb, Rgba};
use std::time::Instant;

use super::{denoise, scaled_dimensions, BackendInfo, BackendStatus, Upscaler, UpscaleError};
use crate::models::options::{Backend, ScaleFactor, UpscaleOptions};

const UNSHARP_SIGMA: f32 = 1.5;
const UNSHARP_THRESHOLD: i32 = 3;
const CONTRAST_BOOST: f32 = 15.0;
const SATURATION_FACTOR: f32 = 1.08;

/// Deterministic resampling pipeline.
///
/// Stage order is fixed so identical input always yields identical output:
/// 1. Lanczos3 resample to `factor × original` dimensions
/// 2. Unsharp mask (σ 1.5, threshold 3)
/// 3. Contrast +15%
/// 4. Saturation +8%
/// 5. Denoise (blur σ 0.5 then sharpen) when requested, plain sharpen otherwise
#[derive(Debug, Default)]
pub struct FastResampler;

impl FastResampler {
    pub fn new() -> Self {
        Self
    }
}

impl Upscaler for FastResampler {
    fn backend(&self) -> Backend {
        Backend::Fast
    }

    fn enhance(
        &self,
        image: DynamicImage,
        options: &UpscaleOptions,
    ) -> Result<DynamicImage, UpscaleError> {
        let start = Instant::now();
        let (width, height) =
            scaled_dimensions(image.width(), image.height(), options.factor.get())?;

        let resized = image.resize_exact(width, height, FilterType::Lanczos3);
        let enhanced = resized
            .unsharpen(UNSHARP_SIGMA, UNSHARP_THRESHOLD)
            .adjust_contrast(CONTRAST_BOOST);
        let enhanced = saturate(enhanced, SATURATION_FACTOR);

        let output = if options.denoise {
            denoise(&enhanced)
        } else {
            enhanced.filter3x3(&super::SHARPEN_KERNEL)
        };

        tracing::debug!(
            source_width = image.width(),
            source_height = image.height(),
            width,
            height,
            factor = options.factor.get(),
            denoise = options.denoise,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Fast resample complete"
        );

        Ok(output)
    }

    fn describe(&self) -> BackendInfo {
        BackendInfo {
            backend: Backend::Fast,
            service: "FastResampler",
            method: "Lanczos3 resample with unsharp mask and contrast boost",
            available_factors: ScaleFactor::ALL.to_vec(),
            features: vec![
                "edge_enhancement",
                "contrast_boost",
                "color_saturation",
                "denoising",
            ],
            status: BackendStatus::Ready,
        }
    }
}

/// Push each pixel away from its luma by `factor`. Grayscale input is returned as is.
fn saturate(image: DynamicImage, factor: f32) -> DynamicImage {
    if !image.color().has_color() {
        return image;
    }
    if image.color().has_alpha() {
        let mut buffer = image.into_rgba8();
        for pixel in buffer.pixels_mut() {
            let Rgba([r, g, b, a]) = *pixel;
            let [r, g, b] = saturate_rgb([r, g, b], factor);
            *pixel = Rgba([r, g, b, a]);
        }
        DynamicImage::ImageRgba8(buffer)
    } else {
        let mut buffer = image.into_rgb8();
        for pixel in buffer.pixels_mut() {
            *pixel = Rgb(saturate_rgb(pixel.0, factor));
        }
        DynamicImage::ImageRgb8(buffer)
    }
}

/// Blend away from ITU-R 601 luma, the same grey point PIL's colour enhancer uses.
fn saturate_rgb(rgb: [u8; 3], factor: f32) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let luma = 0.299 * r + 0.587 * g + 0.114 * b;
    rgb.map(|channel| (luma + (f32::from(channel) - luma) * factor).round().clamp(0.0, 255.0) as u8)
}
