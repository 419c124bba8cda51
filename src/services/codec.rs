use image::{ColorType, DynamicImage, ImageError, ImageFormat, ImageReader};
use std::io::Cursor;

use crate::models::options::ScaleFactor;
use crate::services::upscaler::UpscaleError;

/// Resource guard applied before any pixel data is allocated.
#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    pub max_input_pixels: u64,
    pub max_output_pixels: u64,
}

/// Header information read without decoding pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, UpscaleError> {
    if bytes.is_empty() {
        return Err(UpscaleError::InvalidImage("empty upload".to_string()));
    }
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| UpscaleError::InvalidImage(e.to_string()))
}

fn check_limits(
    width: u32,
    height: u32,
    factor: ScaleFactor,
    limits: &ImageLimits,
) -> Result<(), UpscaleError> {
    if width == 0 || height == 0 {
        return Err(UpscaleError::InvalidImage(format!(
            "image has no pixels ({width}x{height})"
        )));
    }
    let input_pixels = u64::from(width) * u64::from(height);
    if input_pixels > limits.max_input_pixels {
        return Err(UpscaleError::PayloadTooLarge(format!(
            "{width}x{height} exceeds the {} pixel input limit",
            limits.max_input_pixels
        )));
    }
    let scale = u64::from(factor.get());
    let output_pixels = input_pixels * scale * scale;
    if output_pixels > limits.max_output_pixels {
        return Err(UpscaleError::PayloadTooLarge(format!(
            "{width}x{height} at {factor} exceeds the {} pixel output limit",
            limits.max_output_pixels
        )));
    }
    Ok(())
}

fn map_image_error(err: ImageError) -> UpscaleError {
    match err {
        ImageError::Limits(e) => UpscaleError::PayloadTooLarge(e.to_string()),
        other => UpscaleError::InvalidImage(other.to_string()),
    }
}

/// Identify format and dimensions and apply `limits` for the given output factor.
pub fn probe(
    bytes: &[u8],
    limits: &ImageLimits,
    factor: ScaleFactor,
) -> Result<ProbedImage, UpscaleError> {
    let reader = reader(bytes)?;
    let format = reader
        .format()
        .ok_or_else(|| UpscaleError::InvalidImage("unrecognised image format".to_string()))?;
    let (width, height) = reader.into_dimensions().map_err(map_image_error)?;
    check_limits(width, height, factor, limits)?;
    Ok(ProbedImage {
        format,
        width,
        height,
    })
}

/// Fully decode `bytes`, re-checking `limits` first.
pub fn decode(
    bytes: &[u8],
    limits: &ImageLimits,
    factor: ScaleFactor,
) -> Result<DynamicImage, UpscaleError> {
    probe(bytes, limits, factor)?;
    reader(bytes)?.decode().map_err(map_image_error)
}

/// Encode `image` in `source` format when this build can write it, PNG otherwise.
pub fn encode(image: &DynamicImage, source: ImageFormat) -> Result<EncodedImage, UpscaleError> {
    let (format, prepared) = match source {
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => (ImageFormat::Jpeg, DynamicImage::ImageRgb8(image.to_rgb8())),
        ImageFormat::WebP => match image.color() {
            ColorType::Rgb8 | ColorType::Rgba8 => (ImageFormat::WebP, image.clone()),
            _ => (ImageFormat::WebP, DynamicImage::ImageRgba8(image.to_rgba8())),
        },
        _ => match image.color() {
            ColorType::Rgb32F | ColorType::Rgba32F => {
                (ImageFormat::Png, DynamicImage::ImageRgba8(image.to_rgba8()))
            }
            _ => (ImageFormat::Png, image.clone()),
        },
    };

    let mut bytes = Vec::new();
    prepared
        .write_to(&mut Cursor::new(&mut bytes), format)
        .map_err(|e| UpscaleError::Processing(format!("encoding {format:?} failed: {e}")))?;

    Ok(EncodedImage {
        bytes,
        content_type: format.to_mime_type(),
    })
}
