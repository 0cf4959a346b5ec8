//! Captured frame types.

use bytes::Bytes;
use std::time::Instant;

/// Bytes per pixel of captured frames (BGRA, 8 bits per channel).
pub const BYTES_PER_PIXEL: usize = 4;

/// Timestamp for a captured frame.
#[derive(Debug, Clone, Copy)]
pub struct CaptureTimestamp {
    /// Monotonic timestamp when the frame was captured.
    pub capture_time: Instant,

    /// Presentation timestamp in microseconds since the session started.
    pub pts_us: u64,
}

impl CaptureTimestamp {
    /// Create a new capture timestamp.
    pub fn now(start_time: Instant) -> Self {
        let capture_time = Instant::now();
        let elapsed = capture_time.duration_since(start_time);

        Self {
            capture_time,
            pts_us: elapsed.as_micros() as u64,
        }
    }

    /// Get the presentation timestamp in milliseconds.
    pub fn pts_ms(&self) -> u64 {
        self.pts_us / 1_000
    }
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// BGRA pixel data, `stride` bytes per row.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Bytes per row.
    pub stride: usize,

    /// Capture timestamp.
    pub timestamp: CaptureTimestamp,

    /// Monotonically increasing sequence number.
    pub sequence: u64,
}

impl CapturedFrame {
    /// Create a new tightly packed captured frame.
    pub fn new(
        data: Bytes,
        width: u32,
        height: u32,
        timestamp: CaptureTimestamp,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            stride: width as usize * BYTES_PER_PIXEL,
            timestamp,
            sequence,
        }
    }

    /// Calculate the tightly packed BGRA buffer size for given dimensions.
    pub fn bgra_buffer_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Validate that the frame data covers its declared dimensions.
    pub fn is_valid(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let row = self.width as usize * BYTES_PER_PIXEL;
        self.stride >= row && self.data.len() >= self.stride * (self.height as usize - 1) + row
    }

    /// Returns the BGRA bytes of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.stride + x as usize * BYTES_PER_PIXEL;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, len: usize) -> CapturedFrame {
        CapturedFrame::new(
            Bytes::from(vec![0u8; len]),
            width,
            height,
            CaptureTimestamp::now(Instant::now()),
            0,
        )
    }

    #[test]
    fn test_frame_validity() {
        assert!(frame(4, 2, CapturedFrame::bgra_buffer_size(4, 2)).is_valid());
        assert!(!frame(4, 2, 10).is_valid());
        assert!(!frame(0, 2, 0).is_valid());
    }

    #[test]
    fn test_pixel_respects_stride() {
        let mut data = vec![0u8; 2 * 12];
        // Row 1 starts at byte 12 even though only 8 bytes are pixels.
        data[12..16].copy_from_slice(&[1, 2, 3, 4]);
        let mut f = frame(2, 2, 0);
        f.data = Bytes::from(data);
        f.stride = 12;
        assert!(f.is_valid());
        assert_eq!(f.pixel(0, 1), [1, 2, 3, 4]);
    }
}
