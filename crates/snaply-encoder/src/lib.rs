//! H.264 encoder pipeline and MP4 container writing.
//!
//! The pipeline drives a surface-input video encoder the way platform codecs
//! work: frames are drawn into the encoder's [`InputSurface`], encoded output
//! is polled with [`VideoEncoder::dequeue_output`], and the container track is
//! only created once the encoder announces its output format.
//!
//! Backends plug in through [`EncoderBackend`]. The software backend pairs
//! x264 with an MP4 writer and is enabled with the `software` feature.

mod convert;
mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
#[cfg(feature = "mp4")]
mod mp4;
mod pipeline;
mod software;
#[cfg(feature = "x264")]
mod x264;

pub use convert::{nv12_buffer_size, scale_bgra_to_nv12};
pub use error::EncoderError;
#[cfg(feature = "mp4")]
pub use mp4::Mp4Container;
pub use pipeline::{DrainReport, EncoderPipeline, FinalizeReport, PipelineState};
pub use software::{software_encoder, CodecPacket, FrameCodec, SoftwareEncoder, SoftwareSurface};
#[cfg(feature = "x264")]
pub use x264::X264Codec;

use std::path::Path;

use bytes::Bytes;
use snaply_capture::CapturedFrame;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// MIME type of the only supported output codec.
pub const MIME_TYPE_AVC: &str = "video/avc";

/// Largest supported side in pixels.
pub const MAX_DIMENSION: u32 = 4096;

/// Video encoder settings for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Width in pixels (even).
    pub width: u32,

    /// Height in pixels (even).
    pub height: u32,

    /// Target bitrate in bits per second.
    pub bitrate: u32,

    /// Declared frames per second.
    pub frame_rate: u32,

    /// Keyframe interval in seconds.
    pub keyframe_interval_secs: u32,
}

impl EncoderSettings {
    /// Check settings every backend requires.
    ///
    /// Even dimensions are needed for 4:2:0 chroma subsampling.
    pub fn validate(&self) -> EncoderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::UnsupportedConfig(format!(
                "{}x{} has an empty side",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(EncoderError::UnsupportedConfig(format!(
                "{}x{} is not even",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(EncoderError::UnsupportedConfig(format!(
                "{}x{} exceeds {}px",
                self.width, self.height, MAX_DIMENSION
            )));
        }
        if self.bitrate == 0 || self.frame_rate == 0 {
            return Err(EncoderError::UnsupportedConfig(
                "bitrate and frame rate must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Keyframe interval in frames.
    pub fn keyframe_interval_frames(&self) -> u32 {
        (self.frame_rate * self.keyframe_interval_secs).max(1)
    }
}

/// Output format negotiated by the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    /// Codec MIME type.
    pub mime: &'static str,

    /// Encoded width.
    pub width: u32,

    /// Encoded height.
    pub height: u32,

    /// Declared frame rate.
    pub frame_rate: u32,

    /// Codec configuration (SPS/PPS in Annex B form).
    pub codec_config: Bytes,
}

/// Flags attached to an encoder output buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// The buffer holds a keyframe.
    pub key_frame: bool,

    /// The buffer holds codec configuration rather than media data.
    pub codec_config: bool,

    /// The buffer is the last one the encoder will produce.
    pub end_of_stream: bool,
}

/// An encoder output buffer, borrowed from the encoder until released.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    /// Encoder-assigned buffer index.
    pub index: usize,

    /// Valid byte range of the buffer.
    pub data: Bytes,

    /// Presentation timestamp in microseconds.
    pub pts_us: u64,

    /// Buffer flags.
    pub flags: BufferFlags,
}

/// Result of polling the encoder output queue.
#[derive(Debug, Clone)]
pub enum EncoderOutput {
    /// Nothing available yet.
    TryAgainLater,

    /// The output format is now known. Emitted once, before any media buffer.
    FormatChanged(OutputFormat),

    /// An encoded buffer is ready.
    Buffer(OutputBuffer),
}

/// An encoded sample forwarded to the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    /// Container track the sample belongs to.
    pub track_index: usize,

    /// Presentation timestamp in microseconds.
    pub pts_us: u64,

    /// Encoded bytes.
    pub data: Bytes,

    /// Sample carries codec configuration.
    pub is_config_sample: bool,

    /// Sample is a keyframe.
    pub is_key_frame: bool,

    /// Sample is the last of the stream.
    pub is_end_of_stream: bool,
}

/// Container health as reported by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Writes may continue.
    Writing,

    /// The writer cannot accept more data.
    Failed,
}

/// Surface-input video encoder.
pub trait VideoEncoder: Send {
    /// Poll the output queue without blocking.
    fn dequeue_output(&mut self) -> EncoderResult<EncoderOutput>;

    /// Return a buffer obtained from [`dequeue_output`](Self::dequeue_output).
    fn release_output_buffer(&mut self, index: usize) -> EncoderResult<()>;

    /// No more input will be drawn; flush and finish with an end-of-stream buffer.
    fn signal_end_of_input(&mut self) -> EncoderResult<()>;

    /// Stop encoding.
    fn stop(&mut self) -> EncoderResult<()>;

    /// Release the native encoder.
    fn release(&mut self) -> EncoderResult<()>;

    /// Check if the encoder runs on dedicated hardware.
    fn is_hardware_accelerated(&self) -> bool;

    /// Get encoder name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Drawing surface that feeds an encoder.
pub trait InputSurface: Send {
    /// Draw a frame, scaled to the encoder input size.
    fn draw(&mut self, frame: &CapturedFrame) -> EncoderResult<()>;

    /// Release the surface.
    fn release(&mut self) -> EncoderResult<()>;
}

/// Container (multiplexer) writer.
pub trait ContainerWriter: Send {
    /// Add a track for the given format and return its index.
    fn add_track(&mut self, format: &OutputFormat) -> EncoderResult<usize>;

    /// Start the container. Samples may only be written afterwards.
    fn start(&mut self) -> EncoderResult<()>;

    /// Write an encoded sample.
    fn write_sample(&mut self, sample: &EncodedSample) -> EncoderResult<()>;

    /// Current writer status.
    fn status(&self) -> ContainerStatus;

    /// Stop a started container, finishing the file.
    fn stop(&mut self) -> EncoderResult<()>;

    /// Release the writer.
    fn release(&mut self) -> EncoderResult<()>;
}

/// Factory for the native encoder and container of a platform.
pub trait EncoderBackend: Send {
    /// Check the settings without creating anything.
    fn validate(&self, settings: &EncoderSettings) -> EncoderResult<()> {
        settings.validate()
    }

    /// Create an encoder and its input surface.
    fn create_encoder(
        &mut self,
        settings: &EncoderSettings,
    ) -> EncoderResult<(Box<dyn VideoEncoder>, Box<dyn InputSurface>)>;

    /// Create a container writer bound to `path`, not yet started.
    fn create_container(
        &mut self,
        path: &Path,
        settings: &EncoderSettings,
    ) -> EncoderResult<Box<dyn ContainerWriter>>;
}

/// x264 encoder paired with the MP4 writer.
#[cfg(all(feature = "x264", feature = "mp4"))]
#[derive(Debug, Default)]
pub struct SoftwareBackend;

#[cfg(all(feature = "x264", feature = "mp4"))]
impl EncoderBackend for SoftwareBackend {
    fn create_encoder(
        &mut self,
        settings: &EncoderSettings,
    ) -> EncoderResult<(Box<dyn VideoEncoder>, Box<dyn InputSurface>)> {
        let codec = X264Codec::new(settings)?;
        let (encoder, surface) = software_encoder(Box::new(codec), settings.clone());
        tracing::info!("Using x264 software encoder");
        Ok((Box::new(encoder), Box::new(surface)))
    }

    fn create_container(
        &mut self,
        path: &Path,
        _settings: &EncoderSettings,
    ) -> EncoderResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(Mp4Container::create(path)?))
    }
}
