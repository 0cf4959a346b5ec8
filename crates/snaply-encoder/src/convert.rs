//! Pixel format conversion for surface input.

use snaply_capture::{CapturedFrame, BYTES_PER_PIXEL};

use crate::error::EncoderError;
use crate::EncoderResult;

/// Calculate the NV12 buffer size for given dimensions.
pub fn nv12_buffer_size(width: u32, height: u32) -> usize {
    let y_size = width as usize * height as usize;
    y_size + y_size / 2
}

/// Scale a BGRA frame to `width`x`height` and convert it to NV12.
///
/// Scaling is nearest-neighbour. Colour conversion is BT.601 with chroma
/// sampled from the top-left pixel of each 2x2 block.
pub fn scale_bgra_to_nv12(frame: &CapturedFrame, width: u32, height: u32) -> EncoderResult<Vec<u8>> {
    if !frame.is_valid() {
        return Err(EncoderError::InvalidInput(format!(
            "{}x{} frame with {} bytes, stride {}",
            frame.width,
            frame.height,
            frame.data.len(),
            frame.stride
        )));
    }
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(EncoderError::InvalidInput(format!(
            "target {}x{} must be even and non-empty",
            width, height
        )));
    }

    let w = width as usize;
    let h = height as usize;
    let src_w = frame.width as usize;
    let src_h = frame.height as usize;
    let bgra = &frame.data[..];

    let y_size = w * h;
    let mut nv12 = vec![0u8; nv12_buffer_size(width, height)];

    let source_offset = |x: usize, y: usize| -> usize {
        let sx = x * src_w / w;
        let sy = y * src_h / h;
        sy * frame.stride + sx * BYTES_PER_PIXEL
    };

    // Y plane
    for y in 0..h {
        for x in 0..w {
            let src = source_offset(x, y);
            let b = bgra[src] as f32;
            let g = bgra[src + 1] as f32;
            let r = bgra[src + 2] as f32;

            nv12[y * w + x] = (0.299 * r + 0.587 * g + 0.114 * b) as u8;
        }
    }

    // UV plane (subsampled 2x2)
    for y in (0..h).step_by(2) {
        for x in (0..w).step_by(2) {
            let src = source_offset(x, y);
            let b = bgra[src] as f32;
            let g = bgra[src + 1] as f32;
            let r = bgra[src + 2] as f32;

            let u = ((-0.169 * r - 0.331 * g + 0.500 * b) + 128.0).clamp(0.0, 255.0) as u8;
            let v = ((0.500 * r - 0.419 * g - 0.081 * b) + 128.0).clamp(0.0, 255.0) as u8;

            let uv_idx = y_size + (y / 2) * w + x;
            nv12[uv_idx] = u;
            nv12[uv_idx + 1] = v;
        }
    }

    Ok(nv12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use snaply_capture::CaptureTimestamp;
    use std::time::Instant;

    fn solid(width: u32, height: u32, bgra: [u8; 4]) -> CapturedFrame {
        let data: Vec<u8> = bgra
            .iter()
            .copied()
            .cycle()
            .take(CapturedFrame::bgra_buffer_size(width, height))
            .collect();
        CapturedFrame::new(
            Bytes::from(data),
            width,
            height,
            CaptureTimestamp::now(Instant::now()),
            0,
        )
    }

    #[test]
    fn test_black_frame_converts_to_neutral_chroma() {
        let nv12 = scale_bgra_to_nv12(&solid(8, 8, [0, 0, 0, 255]), 4, 4).unwrap();
        assert_eq!(nv12.len(), nv12_buffer_size(4, 4));
        assert!(nv12[..16].iter().all(|&y| y == 0));
        assert!(nv12[16..].iter().all(|&c| c == 128));
    }

    #[test]
    fn test_red_luma() {
        let nv12 = scale_bgra_to_nv12(&solid(4, 4, [0, 0, 255, 255]), 4, 4).unwrap();
        assert_eq!(nv12[0], 76);
    }

    #[test]
    fn test_upscale_reads_inside_source() {
        let nv12 = scale_bgra_to_nv12(&solid(3, 3, [255, 255, 255, 255]), 10, 6).unwrap();
        assert_eq!(nv12.len(), nv12_buffer_size(10, 6));
        assert!(nv12[..60].iter().all(|&y| y >= 254));
    }

    #[test]
    fn test_rejects_odd_target() {
        assert!(matches!(
            scale_bgra_to_nv12(&solid(4, 4, [0; 4]), 3, 4),
            Err(EncoderError::InvalidInput(_))
        ));
    }
}
