//! Still screenshot resizing and compression.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use tracing::{debug, instrument, warn};

use crate::error::CaptureError;
use crate::frame::CapturedFrame;
use crate::CaptureResult;

/// Longer side of a resized screenshot.
pub const MAX_SIDE_SIZE: u32 = 960;

/// Screenshots with both sides at or below this size keep their size.
pub const MIN_SIDE_SIZE: u32 = 240;

/// JPEG qualities tried in order until one succeeds.
pub const COMPRESSION_QUALITIES: [u8; 3] = [50, 30, 10];

/// Compute screenshot output dimensions.
///
/// The longer side becomes [`MAX_SIDE_SIZE`] with the aspect ratio kept,
/// then each side is rounded up to an even number of at least 2. Images
/// whose sides are both within [`MIN_SIDE_SIZE`] are returned unchanged.
pub fn resized_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width <= MIN_SIDE_SIZE && height <= MIN_SIDE_SIZE {
        return (width, height);
    }

    let ratio = width as f32 / height as f32;
    let (mut scaled_width, mut scaled_height) = if ratio > 1.0 {
        (MAX_SIDE_SIZE, (MAX_SIDE_SIZE as f32 / ratio) as u32)
    } else {
        ((MAX_SIDE_SIZE as f32 * ratio) as u32, MAX_SIDE_SIZE)
    };

    scaled_width = (scaled_width + scaled_width % 2).max(2);
    scaled_height = (scaled_height + scaled_height % 2).max(2);
    (scaled_width, scaled_height)
}

/// Resize a captured frame and compress it to JPEG.
#[instrument(name = "screenshot_process", skip_all, fields(width = frame.width, height = frame.height))]
pub fn process(frame: &CapturedFrame) -> CaptureResult<Vec<u8>> {
    if !frame.is_valid() {
        return Err(CaptureError::InvalidFrame(format!(
            "{}x{} frame with {} bytes",
            frame.width,
            frame.height,
            frame.data.len()
        )));
    }

    let rgb = to_rgb(frame);
    let (width, height) = resized_dimensions(frame.width, frame.height);
    let resized = if (width, height) == (frame.width, frame.height) {
        rgb
    } else {
        imageops::resize(&rgb, width, height, FilterType::Triangle)
    };
    debug!(width, height, "Resized screenshot");

    compress(&resized)
}

fn to_rgb(frame: &CapturedFrame) -> RgbImage {
    RgbImage::from_fn(frame.width, frame.height, |x, y| {
        let [b, g, r, _] = frame.pixel(x, y);
        image::Rgb([r, g, b])
    })
}

fn compress(image: &RgbImage) -> CaptureResult<Vec<u8>> {
    let mut last_error = String::from("no quality attempted");

    for quality in COMPRESSION_QUALITIES {
        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, quality);
        match encoder.write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        ) {
            Ok(()) => {
                debug!(quality, bytes = out.len(), "Compressed screenshot");
                return Ok(out);
            }
            Err(e) => {
                warn!(quality, "JPEG compression failed: {}", e);
                last_error = e.to_string();
            }
        }
    }

    Err(CaptureError::Compression(last_error))
}
