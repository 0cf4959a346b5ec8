//! x264 software video codec.

use bytes::Bytes;
use tracing::{debug, instrument, trace};

use crate::convert::nv12_buffer_size;
use crate::error::EncoderError;
use crate::software::{CodecPacket, FrameCodec};
use crate::{EncoderResult, EncoderSettings};

/// x264 encoder wrapper.
pub struct X264Codec {
    encoder: Option<x264::Encoder>,
    width: u32,
    height: u32,
    fps: u32,
    frame_count: u64,
    /// Last pts handed to x264, in 1/fps units.
    last_pts: Option<i64>,
    /// Cached SPS/PPS header data.
    headers: Bytes,
}

impl X264Codec {
    /// Create a new x264 codec.
    #[instrument(name = "x264_new", skip_all)]
    pub fn new(settings: &EncoderSettings) -> EncoderResult<Self> {
        debug!(
            width = settings.width,
            height = settings.height,
            fps = settings.frame_rate,
            bitrate = settings.bitrate,
            "Initializing x264 encoder"
        );

        let bitrate_kbps = (settings.bitrate / 1000).max(1);

        let setup = x264::Setup::preset(
            x264::Preset::Veryfast,
            x264::Tune::None,
            false, // fast_decode
            true,  // zero_latency
        )
        .fps(settings.frame_rate, 1)
        .bitrate(bitrate_kbps as i32)
        .max_keyframe_interval(settings.keyframe_interval_frames() as i32)
        .scenecut_threshold(0)
        .baseline();

        let mut encoder = setup
            .build(
                x264::Colorspace::NV12,
                settings.width as i32,
                settings.height as i32,
            )
            .map_err(|e| EncoderError::Initialization(format!("x264 setup failed: {:?}", e)))?;

        let headers = encoder
            .headers()
            .map_or_else(|_| Bytes::new(), |h| Bytes::from(h.entirety().to_vec()));

        debug!(header_size = headers.len(), "x264 encoder initialized");

        Ok(Self {
            encoder: Some(encoder),
            width: settings.width,
            height: settings.height,
            fps: settings.frame_rate,
            frame_count: 0,
            last_pts: None,
            headers,
        })
    }

    fn pts_to_us(&self, pts: i64) -> u64 {
        (pts.max(0) as u64 * 1_000_000) / self.fps as u64
    }
}

impl FrameCodec for X264Codec {
    #[instrument(name = "x264_encode", skip(self, nv12))]
    fn encode(&mut self, nv12: &[u8], pts_us: u64) -> EncoderResult<Option<CodecPacket>> {
        let expected_size = nv12_buffer_size(self.width, self.height);
        if nv12.len() != expected_size {
            return Err(EncoderError::InvalidInput(format!(
                "Expected {} bytes ({}x{} NV12), got {}",
                expected_size,
                self.width,
                self.height,
                nv12.len()
            )));
        }

        trace!(frame = self.frame_count, "Encoding frame");

        let y_size = (self.width * self.height) as usize;
        let stride = self.width as i32;
        let image = x264::Image::new(
            x264::Colorspace::NV12,
            self.width as i32,
            self.height as i32,
            &[
                x264::Plane {
                    data: &nv12[..y_size],
                    stride,
                },
                x264::Plane {
                    data: &nv12[y_size..],
                    stride,
                },
            ],
        );

        let pts = timebase_pts(pts_us, self.fps, self.last_pts);
        self.last_pts = Some(pts);

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| EncoderError::Encoding("Encoder has been flushed".to_string()))?;
        let (data, picture) = encoder
            .encode(pts, image)
            .map_err(|e| EncoderError::Encoding(format!("x264 encode failed: {:?}", e)))?;

        self.frame_count += 1;
        if data.len() == 0 {
            return Ok(None);
        }

        Ok(Some(CodecPacket {
            data: Bytes::from(data.entirety().to_vec()),
            pts_us: self.pts_to_us(picture.pts()),
            is_keyframe: picture.keyframe(),
        }))
    }

    fn flush(&mut self) -> EncoderResult<Vec<CodecPacket>> {
        debug!("Flushing x264 encoder");

        let mut packets = Vec::new();
        let encoder = match self.encoder.take() {
            Some(e) => e,
            None => return Ok(packets),
        };
        let mut flush = encoder.flush();

        while let Some(result) = flush.next() {
            match result {
                Ok((data, picture)) => {
                    if data.len() > 0 {
                        packets.push(CodecPacket {
                            data: Bytes::from(data.entirety().to_vec()),
                            pts_us: self.pts_to_us(picture.pts()),
                            is_keyframe: picture.keyframe(),
                        });
                    }
                }
                Err(e) => {
                    debug!("Flush iteration ended: {:?}", e);
                    break;
                }
            }
        }

        Ok(packets)
    }

    fn headers(&self) -> Bytes {
        self.headers.clone()
    }

    fn name(&self) -> &'static str {
        "x264"
    }
}

/// Convert microseconds to the 1/fps encoder timebase, strictly after `last`.
fn timebase_pts(pts_us: u64, fps: u32, last: Option<i64>) -> i64 {
    let pts = ((pts_us * fps as u64) / 1_000_000) as i64;
    match last {
        Some(last) if pts <= last => last + 1,
        _ => pts,
    }
}

// SAFETY: x264::Encoder holds raw pointers but is only used from the thread
// that currently owns the codec; access is serialized by the software core.
unsafe impl Send for X264Codec {}
