use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};

use crate::configuration::CompressionOptions;
use crate::error::ImageError;
use crate::workspace::{Dimensions, Segment, Workspace};

/// An image normalized to the canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    /// The JPEG encoded payload.
    pub data: Vec<u8>,
    pub dimensions: Dimensions,
}

/// An image of the workspace that could not be compressed. The image keeps its original payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionFailure {
    pub segment: Segment,
    pub index: usize,
    pub reason: String,
}

/// Decodes any supported payload into pixels.
pub fn decode(data: &[u8]) -> Result<DynamicImage, ImageError> {
    Ok(image::load_from_memory(data)?)
}

/// Encodes the pixels in the canonical format, which is an 8-bit RGB JPEG. Transparency is dropped.
pub fn encode_canonical(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut encoded_image = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut encoded_image, quality);
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|error| ImageError::Encode {
            detail: error.to_string(),
        })?;

    Ok(encoded_image)
}

/// Computes the largest size not exceeding the limits while preserving the aspect ratio.
/// Sizes already within the limits are returned unchanged: images are never upscaled.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let scaled_width = ((width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let scaled_height = ((height as f64 * scale).round() as u32).clamp(1, max_height.max(1));

    (scaled_width, scaled_height)
}

/// Normalizes the payload to the canonical encoding, scaling it down with a Lanczos filter if
/// it exceeds the limits. The input is never modified.
pub fn compress(data: &[u8], options: &CompressionOptions) -> Result<CompressedImage, ImageError> {
    let image = decode(data)?;
    let (width, height) = fit_within(
        image.width(),
        image.height(),
        options.max_width,
        options.max_height,
    );

    let image = if (width, height) != (image.width(), image.height()) {
        log::debug!(
            "Scaling an image from {}x{} down to {}x{}",
            image.width(),
            image.height(),
            width,
            height
        );
        image.resize_exact(width, height, FilterType::Lanczos3)
    } else {
        image
    };

    Ok(CompressedImage {
        data: encode_canonical(&image, options.jpeg_quality)?,
        dimensions: Dimensions { width, height },
    })
}

/// Compresses every image of the workspace that is not already in the canonical encoding.
///
/// Compressed images replace their raw payload and get flagged so that later saves pass them
/// through untouched. A failure is recorded and the remaining images are still processed.
pub fn compress_workspace(
    workspace: &mut Workspace,
    options: &CompressionOptions,
) -> Vec<CompressionFailure> {
    let mut compression_failures = Vec::new();

    for segment in Segment::all() {
        for index in 0..workspace.images(segment).len() {
            let Some(image) = workspace.image_mut(segment, index) else {
                continue;
            };
            if image.compressed {
                continue;
            }

            match compress(&image.data, options) {
                Ok(compressed_image) => {
                    image.data = compressed_image.data;
                    image.dimensions = Some(compressed_image.dimensions);
                    image.compressed = true;
                }
                Err(error) => {
                    log::warn!(
                        "Unable to compress image {} of segment {}: {}",
                        index + 1,
                        segment,
                        error
                    );
                    compression_failures.push(CompressionFailure {
                        segment,
                        index,
                        reason: error.to_string(),
                    });
                }
            }
        }
    }

    compression_failures
}
