//! Surface-input encoder adapter for frame codecs.
//!
//! Software codecs take one NV12 picture and hand back a packet. This module
//! wraps such a codec so it behaves like a surface-input encoder: frames are
//! drawn into a [`SoftwareSurface`], and encoded output is polled from the
//! paired [`SoftwareEncoder`], starting with a format-changed event.
//!
//! The newest packet is held back until the next one arrives or input ends,
//! so the end-of-stream flag always lands on a real packet even when the
//! codec has nothing left to flush.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use snaply_capture::CapturedFrame;
use tracing::{debug, trace};

use crate::convert::scale_bgra_to_nv12;
use crate::error::EncoderError;
use crate::{
    BufferFlags, EncoderOutput, EncoderResult, EncoderSettings, InputSurface, OutputBuffer,
    OutputFormat, VideoEncoder, MIME_TYPE_AVC,
};

/// A packet produced by a [`FrameCodec`].
#[derive(Debug, Clone)]
pub struct CodecPacket {
    /// Encoded NAL data (Annex B).
    pub data: Bytes,

    /// Presentation timestamp in microseconds.
    pub pts_us: u64,

    /// Whether this is a keyframe.
    pub is_keyframe: bool,
}

/// Frame-at-a-time video codec.
pub trait FrameCodec: Send {
    /// Encode an NV12 picture. `None` means the picture is buffered.
    fn encode(&mut self, nv12: &[u8], pts_us: u64) -> EncoderResult<Option<CodecPacket>>;

    /// Flush buffered pictures.
    fn flush(&mut self) -> EncoderResult<Vec<CodecPacket>>;

    /// Codec configuration (SPS/PPS).
    fn headers(&self) -> Bytes;

    /// Get codec name for diagnostics.
    fn name(&self) -> &'static str;
}

struct Core {
    codec: Option<Box<dyn FrameCodec>>,
    settings: EncoderSettings,
    output: VecDeque<EncoderOutput>,
    held: Option<CodecPacket>,
    format_announced: bool,
    next_index: usize,
    end_of_input: bool,
    released: bool,
}

impl Core {
    fn state_name(&self) -> &'static str {
        if self.released {
            "released"
        } else if self.codec.is_none() {
            "stopped"
        } else if self.end_of_input {
            "end_of_input"
        } else {
            "running"
        }
    }

    fn announce_format(&mut self) {
        if self.format_announced {
            return;
        }
        let codec_config = self
            .codec
            .as_ref()
            .map(|codec| codec.headers())
            .unwrap_or_default();
        self.output.push_back(EncoderOutput::FormatChanged(OutputFormat {
            mime: MIME_TYPE_AVC,
            width: self.settings.width,
            height: self.settings.height,
            frame_rate: self.settings.frame_rate,
            codec_config,
        }));
        self.format_announced = true;
    }

    /// Queue the previously held packet and hold `packet` in its place.
    fn hold(&mut self, packet: CodecPacket) {
        self.announce_format();
        if let Some(previous) = self.held.replace(packet) {
            self.push_buffer(previous.data, previous.pts_us, previous.is_keyframe, false);
        }
    }

    fn push_buffer(&mut self, data: Bytes, pts_us: u64, key_frame: bool, end_of_stream: bool) {
        let index = self.next_index;
        self.next_index += 1;
        self.output.push_back(EncoderOutput::Buffer(OutputBuffer {
            index,
            data,
            pts_us,
            flags: BufferFlags {
                key_frame,
                codec_config: false,
                end_of_stream,
            },
        }));
    }
}

/// Encoder half of a wrapped [`FrameCodec`].
pub struct SoftwareEncoder {
    core: Arc<Mutex<Core>>,
    name: &'static str,
}

/// Input surface half of a wrapped [`FrameCodec`].
pub struct SoftwareSurface {
    core: Arc<Mutex<Core>>,
}

/// Wrap a frame codec into a surface-input encoder pair.
pub fn software_encoder(
    codec: Box<dyn FrameCodec>,
    settings: EncoderSettings,
) -> (SoftwareEncoder, SoftwareSurface) {
    let name = codec.name();
    let core = Arc::new(Mutex::new(Core {
        codec: Some(codec),
        settings,
        output: VecDeque::new(),
        held: None,
        format_announced: false,
        next_index: 0,
        end_of_input: false,
        released: false,
    }));

    (
        SoftwareEncoder {
            core: Arc::clone(&core),
            name,
        },
        SoftwareSurface { core },
    )
}

impl VideoEncoder for SoftwareEncoder {
    fn dequeue_output(&mut self) -> EncoderResult<EncoderOutput> {
        let mut core = self.core.lock();
        if core.released {
            return Err(EncoderError::InvalidState {
                expected: "running",
                actual: "released",
            });
        }
        Ok(core.output.pop_front().unwrap_or(EncoderOutput::TryAgainLater))
    }

    fn release_output_buffer(&mut self, index: usize) -> EncoderResult<()> {
        trace!(index, "Released output buffer");
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> EncoderResult<()> {
        let mut core = self.core.lock();
        if core.end_of_input {
            return Ok(());
        }
        if core.codec.is_none() {
            return Err(EncoderError::InvalidState {
                expected: "running",
                actual: core.state_name(),
            });
        }
        core.end_of_input = true;

        let flushed = match core.codec.as_mut() {
            Some(codec) => codec.flush()?,
            None => Vec::new(),
        };
        debug!(flushed = flushed.len(), "Signalled end of input");

        for packet in flushed {
            core.hold(packet);
        }
        match core.held.take() {
            Some(last) => core.push_buffer(last.data, last.pts_us, last.is_keyframe, true),
            None => core.push_buffer(Bytes::new(), 0, false, true),
        }
        Ok(())
    }

    fn stop(&mut self) -> EncoderResult<()> {
        let mut core = self.core.lock();
        if core.codec.take().is_some() {
            debug!(encoder = self.name, "Encoder stopped");
        }
        Ok(())
    }

    fn release(&mut self) -> EncoderResult<()> {
        let mut core = self.core.lock();
        core.codec = None;
        core.held = None;
        core.output.clear();
        core.released = true;
        Ok(())
    }

    fn is_hardware_accelerated(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl InputSurface for SoftwareSurface {
    fn draw(&mut self, frame: &CapturedFrame) -> EncoderResult<()> {
        let mut core = self.core.lock();
        if core.end_of_input || core.codec.is_none() {
            return Err(EncoderError::InvalidState {
                expected: "running",
                actual: core.state_name(),
            });
        }

        let nv12 = scale_bgra_to_nv12(frame, core.settings.width, core.settings.height)?;
        let pts_us = frame.timestamp.pts_us;
        let packet = match core.codec.as_mut() {
            Some(codec) => codec.encode(&nv12, pts_us)?,
            None => None,
        };
        if let Some(packet) = packet {
            core.hold(packet);
        }
        Ok(())
    }

    fn release(&mut self) -> EncoderResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snaply_capture::CaptureTimestamp;
    use std::time::Instant;

    /// Emits one packet per picture after buffering the first one.
    struct DelayCodec {
        buffered: Option<u64>,
    }

    impl FrameCodec for DelayCodec {
        fn encode(&mut self, _nv12: &[u8], pts_us: u64) -> EncoderResult<Option<CodecPacket>> {
            Ok(self.buffered.replace(pts_us).map(|pts| CodecPacket {
                data: Bytes::from_static(b"pic"),
                pts_us: pts,
                is_keyframe: pts == 0,
            }))
        }

        fn flush(&mut self) -> EncoderResult<Vec<CodecPacket>> {
            Ok(self
                .buffered
                .take()
                .map(|pts| CodecPacket {
                    data: Bytes::from_static(b"tail"),
                    pts_us: pts,
                    is_keyframe: false,
                })
                .into_iter()
                .collect())
        }

        fn headers(&self) -> Bytes {
            Bytes::from_static(b"sps-pps")
        }

        fn name(&self) -> &'static str {
            "delay"
        }
    }

    /// Emits a packet for every picture and has nothing to flush.
    struct ImmediateCodec;

    impl FrameCodec for ImmediateCodec {
        fn encode(&mut self, _nv12: &[u8], pts_us: u64) -> EncoderResult<Option<CodecPacket>> {
            Ok(Some(CodecPacket {
                data: Bytes::from_static(b"pic"),
                pts_us,
                is_keyframe: pts_us == 0,
            }))
        }

        fn flush(&mut self) -> EncoderResult<Vec<CodecPacket>> {
            Ok(Vec::new())
        }

        fn headers(&self) -> Bytes {
            Bytes::from_static(b"sps-pps")
        }

        fn name(&self) -> &'static str {
            "immediate"
        }
    }

    fn settings() -> EncoderSettings {
        EncoderSettings {
            width: 4,
            height: 4,
            bitrate: 64,
            frame_rate: 24,
            keyframe_interval_secs: 1,
        }
    }

    fn frame(pts_us: u64) -> CapturedFrame {
        let mut timestamp = CaptureTimestamp::now(Instant::now());
        timestamp.pts_us = pts_us;
        CapturedFrame::new(
            Bytes::from(vec![0u8; CapturedFrame::bgra_buffer_size(4, 4)]),
            4,
            4,
            timestamp,
            0,
        )
    }

    fn pair() -> (SoftwareEncoder, SoftwareSurface) {
        software_encoder(Box::new(DelayCodec { buffered: None }), settings())
    }

    #[test]
    fn test_format_announced_before_first_buffer() {
        let (mut encoder, mut surface) = pair();
        surface.draw(&frame(0)).unwrap();
        assert!(matches!(encoder.dequeue_output().unwrap(), EncoderOutput::TryAgainLater));

        surface.draw(&frame(41_666)).unwrap();
        match encoder.dequeue_output().unwrap() {
            EncoderOutput::FormatChanged(format) => {
                assert_eq!(format.mime, MIME_TYPE_AVC);
                assert_eq!(format.codec_config.as_ref(), b"sps-pps");
            }
            other => panic!("expected format change, got {:?}", other),
        }
        // Newest packet stays held until the next one arrives
        assert!(matches!(encoder.dequeue_output().unwrap(), EncoderOutput::TryAgainLater));

        surface.draw(&frame(83_333)).unwrap();
        match encoder.dequeue_output().unwrap() {
            EncoderOutput::Buffer(buffer) => {
                assert_eq!(buffer.pts_us, 0);
                assert!(buffer.flags.key_frame);
                assert!(!buffer.flags.end_of_stream);
            }
            other => panic!("expected buffer, got {:?}", other),
        }
    }

    #[test]
    fn test_end_of_input_marks_last_flushed_packet() {
        let (mut encoder, mut surface) = pair();
        surface.draw(&frame(0)).unwrap();
        encoder.signal_end_of_input().unwrap();

        assert!(matches!(encoder.dequeue_output().unwrap(), EncoderOutput::FormatChanged(_)));
        match encoder.dequeue_output().unwrap() {
            EncoderOutput::Buffer(buffer) => {
                assert_eq!(buffer.data.as_ref(), b"tail");
                assert!(buffer.flags.end_of_stream);
            }
            other => panic!("expected buffer, got {:?}", other),
        }
        assert!(surface.draw(&frame(1)).is_err());
    }

    #[test]
    fn test_end_of_input_flags_held_packet_when_flush_is_empty() {
        let (mut encoder, mut surface) =
            software_encoder(Box::new(ImmediateCodec), settings());
        surface.draw(&frame(0)).unwrap();
        surface.draw(&frame(41_666)).unwrap();

        assert!(matches!(encoder.dequeue_output().unwrap(), EncoderOutput::FormatChanged(_)));
        match encoder.dequeue_output().unwrap() {
            EncoderOutput::Buffer(buffer) => {
                assert_eq!(buffer.pts_us, 0);
                assert!(!buffer.flags.end_of_stream);
            }
            other => panic!("expected buffer, got {:?}", other),
        }
        assert!(matches!(encoder.dequeue_output().unwrap(), EncoderOutput::TryAgainLater));

        encoder.signal_end_of_input().unwrap();
        match encoder.dequeue_output().unwrap() {
            EncoderOutput::Buffer(buffer) => {
                assert_eq!(buffer.pts_us, 41_666);
                assert_eq!(buffer.data.as_ref(), b"pic");
                assert!(buffer.flags.end_of_stream);
            }
            other => panic!("expected buffer, got {:?}", other),
        }
        assert!(matches!(encoder.dequeue_output().unwrap(), EncoderOutput::TryAgainLater));
    }

    #[test]
    fn test_end_of_input_without_frames_yields_empty_eos() {
        let (mut encoder, _surface) = pair();
        encoder.signal_end_of_input().unwrap();
        match encoder.dequeue_output().unwrap() {
            EncoderOutput::Buffer(buffer) => {
                assert!(buffer.data.is_empty());
                assert!(buffer.flags.end_of_stream);
            }
            other => panic!("expected buffer, got {:?}", other),
        }
    }

    #[test]
    fn test_released_encoder_rejects_polling() {
        let (mut encoder, _surface) = pair();
        encoder.stop().unwrap();
        encoder.release().unwrap();
        assert!(matches!(
            encoder.dequeue_output(),
            Err(EncoderError::InvalidState { .. })
        ));
    }
}
