use crate::config::{OutputFormat, ResizeConfig};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageEncoder, RgbImage};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Codec failure for one item
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("working file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a transcode
#[derive(Debug, Clone)]
pub struct Transcoded {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode, normalize, downscale and re-encode an image.
///
/// All operations are synchronous and CPU-bound; callers on the async
/// runtime wrap this in `spawn_blocking`.
pub fn transcode(input: &[u8], config: &ResizeConfig) -> Result<Transcoded, CodecError> {
    let decoded = image::load_from_memory(input).map_err(CodecError::Decode)?;
    let flat = flatten_onto_white(decoded);
    let resized = downscale(flat, config.max_width, config.max_height);
    let (width, height) = resized.dimensions();

    let mut bytes = Vec::new();
    match config.output_format {
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut bytes, config.output_quality);
            encoder
                .write_image(resized.as_raw(), width, height, image::ColorType::Rgb8)
                .map_err(CodecError::Encode)?;
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new(&mut bytes);
            encoder
                .write_image(resized.as_raw(), width, height, image::ColorType::Rgb8)
                .map_err(CodecError::Encode)?;
        }
    }

    debug!(width, height, size_bytes = bytes.len(), "Image transcoded");

    Ok(Transcoded { bytes, width, height })
}

/// Transcode between files inside the item's working area
pub fn transcode_file(
    source: &Path,
    dest: &Path,
    config: &ResizeConfig,
) -> Result<(u32, u32), CodecError> {
    let input = std::fs::read(source)?;
    let out = transcode(&input, config)?;
    std::fs::write(dest, &out.bytes)?;
    Ok((out.width, out.height))
}

/// Normalize color representation: composite any transparency onto an
/// opaque white background. All non-opaque modes are handled uniformly
/// through RGBA; already-opaque images are converted to RGB directly.
fn flatten_onto_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let alpha = src[3] as u32;
        for channel in 0..3 {
            dst[channel] = ((src[channel] as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        }
    }
    out
}

/// Downscale so neither dimension exceeds the bounding box, preserving
/// aspect ratio. Images already inside the box are returned unchanged;
/// there is never an upscale.
fn downscale(img: RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width <= max_width && height <= max_height {
        return img;
    }
    DynamicImage::ImageRgb8(img)
        .resize(max_width, max_height, FilterType::Lanczos3)
        .to_rgb8()
}
