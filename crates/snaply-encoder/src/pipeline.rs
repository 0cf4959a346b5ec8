//! Encoder pipeline: surface input, output draining and container lifecycle.

use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use snaply_capture::CapturedFrame;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::EncoderError;
use crate::{
    ContainerStatus, ContainerWriter, EncodedSample, EncoderBackend, EncoderOutput,
    EncoderResult, EncoderSettings, InputSurface, OutputBuffer, OutputFormat, VideoEncoder,
};

/// Poll interval while waiting for the end-of-stream buffer.
const EOS_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Pipeline lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created, no native resources yet.
    Unconfigured,

    /// Encoder, surface and container exist; no frame submitted.
    Configured,

    /// Frames submitted, waiting for the output format.
    TrackPending,

    /// Container started, samples are being written.
    Muxing,

    /// End of input signalled, draining the remaining output.
    Draining,

    /// All resources released.
    Finalized,

    /// The container failed; only finalization remains.
    Failed,
}

impl PipelineState {
    /// Returns a short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::TrackPending => "track_pending",
            Self::Muxing => "muxing",
            Self::Draining => "draining",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        }
    }

    /// Returns true if frames may be submitted.
    pub fn accepts_frames(&self) -> bool {
        matches!(self, Self::Configured | Self::TrackPending | Self::Muxing)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A container that has a track and has been started.
///
/// Only this type can write samples, so a sample can never reach a container
/// before its track exists.
struct StartedContainer {
    writer: Box<dyn ContainerWriter>,
    track_index: usize,
}

impl StartedContainer {
    fn start(mut writer: Box<dyn ContainerWriter>, format: &OutputFormat) -> Result<Self, (Box<dyn ContainerWriter>, EncoderError)> {
        let track_index = match writer.add_track(format) {
            Ok(index) => index,
            Err(e) => return Err((writer, e)),
        };
        if let Err(e) = writer.start() {
            return Err((writer, e));
        }
        Ok(Self {
            writer,
            track_index,
        })
    }

    fn write(&mut self, buffer: &OutputBuffer) -> EncoderResult<()> {
        self.writer.write_sample(&EncodedSample {
            track_index: self.track_index,
            pts_us: buffer.pts_us,
            data: buffer.data.clone(),
            is_config_sample: buffer.flags.codec_config,
            is_key_frame: buffer.flags.key_frame,
            is_end_of_stream: buffer.flags.end_of_stream,
        })
    }
}

enum ContainerSlot {
    /// Created, waiting for the output format.
    Pending(Box<dyn ContainerWriter>),

    /// Track added and container started.
    Started(StartedContainer),

    /// Not created yet, or already released.
    Released,
}

impl ContainerSlot {
    fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Samples written during this pass.
    pub samples_written: u64,

    /// The end-of-stream buffer was seen.
    pub end_of_stream: bool,

    /// Waiting for end of stream gave up.
    pub timed_out: bool,
}

/// Outcome of finalization.
#[derive(Debug, Default)]
pub struct FinalizeReport {
    /// Frames drawn into the encoder.
    pub frames_submitted: u64,

    /// Samples written to the container.
    pub samples_written: u64,

    /// Sample writes that failed.
    pub write_failures: u64,

    /// The container was started.
    pub container_started: bool,

    /// Release steps that failed, by step name.
    pub release_failures: Vec<(&'static str, String)>,
}

impl FinalizeReport {
    /// Returns true if at least one sample reached the container.
    pub fn has_samples(&self) -> bool {
        self.samples_written > 0
    }

    /// Returns true if every release step succeeded.
    pub fn is_clean(&self) -> bool {
        self.release_failures.is_empty()
    }
}

/// Drives one encoder session from configuration to finalization.
pub struct EncoderPipeline {
    settings: EncoderSettings,
    output_path: PathBuf,
    eos_timeout: Duration,
    state: PipelineState,
    encoder: Option<Box<dyn VideoEncoder>>,
    surface: Option<Box<dyn InputSurface>>,
    container: ContainerSlot,
    end_of_input_signalled: bool,
    frames_submitted: u64,
    samples_written: u64,
    write_failures: u64,
    released: bool,
}

impl EncoderPipeline {
    /// Create an unconfigured pipeline.
    pub fn new(settings: EncoderSettings, output_path: impl Into<PathBuf>, eos_timeout: Duration) -> Self {
        Self {
            settings,
            output_path: output_path.into(),
            eos_timeout,
            state: PipelineState::Unconfigured,
            encoder: None,
            surface: None,
            container: ContainerSlot::Released,
            end_of_input_signalled: false,
            frames_submitted: 0,
            samples_written: 0,
            write_failures: 0,
            released: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Encoder settings.
    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Container output path.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Frames drawn into the encoder so far.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Samples written so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Failed sample writes so far.
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Encoder name, once configured.
    pub fn encoder_name(&self) -> Option<&'static str> {
        self.encoder.as_ref().map(|e| e.name())
    }

    fn invalid_state(&self, expected: &'static str) -> EncoderError {
        EncoderError::InvalidState {
            expected,
            actual: self.state.name(),
        }
    }

    /// Create the encoder, its input surface and the container.
    ///
    /// On error nothing stays allocated and the pipeline remains unconfigured.
    #[instrument(name = "pipeline_configure", skip_all, fields(width = self.settings.width, height = self.settings.height))]
    pub fn configure(&mut self, backend: &mut dyn EncoderBackend) -> EncoderResult<()> {
        if self.state != PipelineState::Unconfigured {
            return Err(self.invalid_state("unconfigured"));
        }

        backend.validate(&self.settings)?;
        let (mut encoder, mut surface) = backend.create_encoder(&self.settings)?;

        let container = match backend.create_container(&self.output_path, &self.settings) {
            Ok(container) => container,
            Err(e) => {
                if let Err(release) = encoder.release() {
                    warn!("Encoder release after container failure: {}", release);
                }
                if let Err(release) = surface.release() {
                    warn!("Surface release after container failure: {}", release);
                }
                return Err(e);
            }
        };

        info!(
            encoder = encoder.name(),
            hardware = encoder.is_hardware_accelerated(),
            bitrate = self.settings.bitrate,
            "Encoder pipeline configured"
        );

        self.encoder = Some(encoder);
        self.surface = Some(surface);
        self.container = ContainerSlot::Pending(container);
        self.state = PipelineState::Configured;
        Ok(())
    }

    /// Draw a frame into the encoder input surface.
    pub fn submit_frame(&mut self, frame: &CapturedFrame) -> EncoderResult<()> {
        if !self.state.accepts_frames() {
            return Err(self.invalid_state("configured"));
        }
        let surface = self
            .surface
            .as_mut()
            .ok_or(EncoderError::InvalidState {
                expected: "configured",
                actual: "no_surface",
            })?;

        surface.draw(frame)?;
        self.frames_submitted += 1;
        trace!(sequence = frame.sequence, pts_us = frame.timestamp.pts_us, "Frame submitted");

        if self.state == PipelineState::Configured {
            self.state = PipelineState::TrackPending;
        }
        Ok(())
    }

    /// Move available encoder output into the container.
    ///
    /// With `end_of_stream` the encoder is told that input has ended and the
    /// pass keeps polling until the end-of-stream buffer arrives or the
    /// timeout elapses. Without it the pass stops at the first empty poll.
    pub fn drain(&mut self, end_of_stream: bool) -> EncoderResult<DrainReport> {
        match self.state {
            PipelineState::Configured
            | PipelineState::TrackPending
            | PipelineState::Muxing
            | PipelineState::Draining => {}
            _ => return Err(self.invalid_state("configured")),
        }

        let mut report = DrainReport::default();
        let Some(mut encoder) = self.encoder.take() else {
            return Err(self.invalid_state("configured"));
        };

        let result = self.drain_encoder(encoder.as_mut(), end_of_stream, &mut report);
        self.encoder = Some(encoder);
        result.map(|()| report)
    }

    fn drain_encoder(
        &mut self,
        encoder: &mut dyn VideoEncoder,
        end_of_stream: bool,
        report: &mut DrainReport,
    ) -> EncoderResult<()> {
        if end_of_stream && !self.end_of_input_signalled {
            encoder.signal_end_of_input()?;
            self.end_of_input_signalled = true;
            self.state = PipelineState::Draining;
            debug!("End of input signalled");
        }

        let deadline = Instant::now() + self.eos_timeout;
        loop {
            match encoder.dequeue_output()? {
                EncoderOutput::TryAgainLater => {
                    if !end_of_stream {
                        break;
                    }
                    if Instant::now() >= deadline {
                        warn!(
                            timeout_ms = self.eos_timeout.as_millis() as u64,
                            "Timed out waiting for end of stream"
                        );
                        report.timed_out = true;
                        break;
                    }
                    thread::sleep(EOS_POLL_INTERVAL);
                }
                EncoderOutput::FormatChanged(format) => self.start_container(&format)?,
                EncoderOutput::Buffer(buffer) => {
                    let is_eos = buffer.flags.end_of_stream;
                    let written = self.write_buffer(&buffer);
                    if let Err(e) = encoder.release_output_buffer(buffer.index) {
                        warn!(index = buffer.index, "Output buffer release failed: {}", e);
                    }
                    if written? {
                        report.samples_written += 1;
                    }
                    if is_eos {
                        report.end_of_stream = true;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn start_container(&mut self, format: &OutputFormat) -> EncoderResult<()> {
        match mem::replace(&mut self.container, ContainerSlot::Released) {
            ContainerSlot::Pending(writer) => match StartedContainer::start(writer, format) {
                Ok(started) => {
                    info!(
                        track = started.track_index,
                        width = format.width,
                        height = format.height,
                        "Container started"
                    );
                    self.container = ContainerSlot::Started(started);
                    if self.state != PipelineState::Draining {
                        self.state = PipelineState::Muxing;
                    }
                    Ok(())
                }
                Err((writer, e)) => {
                    self.container = ContainerSlot::Pending(writer);
                    self.state = PipelineState::Failed;
                    Err(EncoderError::Container(format!("container start failed: {}", e)))
                }
            },
            ContainerSlot::Started(started) => {
                warn!("Output format changed again; keeping the existing track");
                self.container = ContainerSlot::Started(started);
                Ok(())
            }
            ContainerSlot::Released => Err(self.invalid_state("configured")),
        }
    }

    /// Write one buffer. Returns whether a sample was written.
    fn write_buffer(&mut self, buffer: &OutputBuffer) -> EncoderResult<bool> {
        if buffer.data.is_empty() || buffer.flags.codec_config {
            trace!(index = buffer.index, "Skipping empty or config buffer");
            return Ok(false);
        }

        let ContainerSlot::Started(container) = &mut self.container else {
            warn!(index = buffer.index, "Dropping buffer that arrived before the output format");
            return Ok(false);
        };

        match container.write(buffer) {
            Ok(()) => {
                self.samples_written += 1;
                Ok(true)
            }
            Err(e) => {
                self.write_failures += 1;
                warn!(pts_us = buffer.pts_us, "Sample write failed: {}", e);
                if container.writer.status() == ContainerStatus::Failed {
                    self.state = PipelineState::Failed;
                    return Err(EncoderError::ContainerFailed(e.to_string()));
                }
                Ok(false)
            }
        }
    }

    /// Stop and release everything, in order, and report what happened.
    ///
    /// Each step runs even when an earlier one failed.
    #[instrument(name = "pipeline_finalize", skip_all)]
    pub fn finalize(mut self) -> FinalizeReport {
        let container_started = self.container.is_started();
        let release_failures = self.release_all();
        self.state = PipelineState::Finalized;

        let report = FinalizeReport {
            frames_submitted: self.frames_submitted,
            samples_written: self.samples_written,
            write_failures: self.write_failures,
            container_started,
            release_failures,
        };
        info!(
            frames = report.frames_submitted,
            samples = report.samples_written,
            write_failures = report.write_failures,
            "Encoder pipeline finalized"
        );
        report
    }

    fn release_all(&mut self) -> Vec<(&'static str, String)> {
        if self.released {
            return Vec::new();
        }
        self.released = true;

        let mut failures = Vec::new();
        let mut record = |step: &'static str, result: EncoderResult<()>| {
            if let Err(e) = result {
                warn!(step, "Release step failed: {}", e);
                failures.push((step, e.to_string()));
            }
        };

        let mut encoder = self.encoder.take();
        if let Some(encoder) = encoder.as_mut() {
            record("encoder.stop", encoder.stop());
        }

        match mem::replace(&mut self.container, ContainerSlot::Released) {
            ContainerSlot::Started(mut started) => {
                record("container.stop", started.writer.stop());
                record("container.release", started.writer.release());
            }
            ContainerSlot::Pending(mut writer) => {
                record("container.release", writer.release());
            }
            ContainerSlot::Released => {}
        }

        if let Some(mut encoder) = encoder {
            record("encoder.release", encoder.release());
        }
        if let Some(mut surface) = self.surface.take() {
            record("surface.release", surface.release());
        }

        failures
    }
}

impl Drop for EncoderPipeline {
    fn drop(&mut self) {
        if !self.released {
            debug!("Releasing encoder pipeline on drop");
            self.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBackend, FakeConfig};
    use bytes::Bytes;
    use snaply_capture::CaptureTimestamp;

    fn settings() -> EncoderSettings {
        EncoderSettings {
            width: 16,
            height: 16,
            bitrate: 1024,
            frame_rate: 24,
            keyframe_interval_secs: 1,
        }
    }

    fn frame(sequence: u64) -> CapturedFrame {
        let mut timestamp = CaptureTimestamp::now(Instant::now());
        timestamp.pts_us = sequence * 50_000;
        CapturedFrame::new(
            Bytes::from(vec![0u8; CapturedFrame::bgra_buffer_size(16, 16)]),
            16,
            16,
            timestamp,
            sequence,
        )
    }

    fn pipeline(backend: &mut FakeBackend) -> EncoderPipeline {
        let path = std::env::temp_dir().join("snaply_pipeline_test.mp4");
        let mut pipeline = EncoderPipeline::new(settings(), path, Duration::from_millis(50));
        pipeline.configure(backend).unwrap();
        pipeline
    }

    #[test]
    fn test_drain_before_format_writes_nothing() {
        let mut backend = FakeBackend::with_config(FakeConfig {
            format_after_frames: Some(3),
            ..FakeConfig::default()
        });
        let handle = backend.handle();
        let mut pipeline = pipeline(&mut backend);

        pipeline.submit_frame(&frame(0)).unwrap();
        let report = pipeline.drain(false).unwrap();

        assert_eq!(report.samples_written, 0);
        assert_eq!(pipeline.state(), PipelineState::TrackPending);
        assert_eq!(handle.count("container.add_track"), 0);
        assert_eq!(handle.count("container.write"), 0);
    }

    #[test]
    fn test_one_track_even_if_format_repeats() {
        let mut backend = FakeBackend::with_config(FakeConfig {
            repeat_format: true,
            ..FakeConfig::default()
        });
        let handle = backend.handle();
        let mut pipeline = pipeline(&mut backend);

        for i in 0..3 {
            pipeline.submit_frame(&frame(i)).unwrap();
            pipeline.drain(false).unwrap();
        }

        assert_eq!(pipeline.state(), PipelineState::Muxing);
        assert_eq!(handle.count("container.add_track"), 1);
        assert_eq!(handle.count("container.start"), 1);
        assert_eq!(handle.samples().len(), 3);
    }

    #[test]
    fn test_last_sample_is_end_of_stream() {
        let mut backend = FakeBackend::new();
        let handle = backend.handle();
        let mut pipeline = pipeline(&mut backend);

        pipeline.submit_frame(&frame(0)).unwrap();
        pipeline.submit_frame(&frame(1)).unwrap();
        pipeline.drain(false).unwrap();
        let report = pipeline.drain(true).unwrap();
        assert!(report.end_of_stream);

        let samples = handle.samples();
        let last = samples.last().unwrap();
        assert!(last.is_end_of_stream);
        assert!(samples[..samples.len() - 1].iter().all(|s| !s.is_end_of_stream));
        assert!(samples.iter().all(|s| s.track_index == 0));
    }

    /// Codec that has nothing buffered at flush time.
    struct ImmediateCodec;

    impl crate::FrameCodec for ImmediateCodec {
        fn encode(
            &mut self,
            _nv12: &[u8],
            pts_us: u64,
        ) -> EncoderResult<Option<crate::CodecPacket>> {
            Ok(Some(crate::CodecPacket {
                data: Bytes::from_static(b"pic"),
                pts_us,
                is_keyframe: pts_us == 0,
            }))
        }

        fn flush(&mut self) -> EncoderResult<Vec<crate::CodecPacket>> {
            Ok(Vec::new())
        }

        fn headers(&self) -> Bytes {
            Bytes::from_static(b"sps-pps")
        }

        fn name(&self) -> &'static str {
            "immediate"
        }
    }

    /// Software encoder over [`ImmediateCodec`], fake container.
    struct ImmediateBackend(FakeBackend);

    impl EncoderBackend for ImmediateBackend {
        fn create_encoder(
            &mut self,
            settings: &EncoderSettings,
        ) -> EncoderResult<(Box<dyn VideoEncoder>, Box<dyn InputSurface>)> {
            let (encoder, surface) =
                crate::software_encoder(Box::new(ImmediateCodec), settings.clone());
            Ok((Box::new(encoder), Box::new(surface)))
        }

        fn create_container(
            &mut self,
            path: &Path,
            settings: &EncoderSettings,
        ) -> EncoderResult<Box<dyn ContainerWriter>> {
            self.0.create_container(path, settings)
        }
    }

    #[test]
    fn test_software_encoder_last_sample_is_end_of_stream() {
        let fake = FakeBackend::new();
        let handle = fake.handle();
        let mut backend = ImmediateBackend(fake);
        let path = std::env::temp_dir().join("snaply_pipeline_immediate.mp4");
        let mut pipeline = EncoderPipeline::new(settings(), path, Duration::from_millis(50));
        pipeline.configure(&mut backend).unwrap();

        pipeline.submit_frame(&frame(0)).unwrap();
        pipeline.submit_frame(&frame(1)).unwrap();
        pipeline.drain(false).unwrap();
        let report = pipeline.drain(true).unwrap();
        assert!(report.end_of_stream);
        pipeline.finalize();

        let flags: Vec<_> = handle.samples().iter().map(|s| s.is_end_of_stream).collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn test_finalize_order() {
        let mut backend = FakeBackend::new();
        let handle = backend.handle();
        let mut pipeline = pipeline(&mut backend);

        pipeline.submit_frame(&frame(0)).unwrap();
        pipeline.drain(true).unwrap();
        let report = pipeline.finalize();
        assert!(report.is_clean());
        assert!(report.container_started);

        let calls: Vec<_> = handle
            .calls()
            .into_iter()
            .filter(|c| c.ends_with(".stop") || c.ends_with(".release"))
            .collect();
        assert_eq!(
            calls,
            vec![
                "encoder.stop",
                "container.stop",
                "container.release",
                "encoder.release",
                "surface.release",
            ]
        );
    }

    #[test]
    fn test_never_started_container_is_only_released() {
        let mut backend = FakeBackend::with_config(FakeConfig {
            format_after_frames: None,
            ..FakeConfig::default()
        });
        let handle = backend.handle();
        let mut pipeline = pipeline(&mut backend);

        let report = pipeline.drain(true).unwrap();
        assert!(report.end_of_stream);
        let report = pipeline.finalize();

        assert!(!report.container_started);
        assert!(!report.has_samples());
        assert!(report.is_clean());
        assert_eq!(handle.count("container.stop"), 0);
        assert_eq!(handle.count("container.release"), 1);
    }

    #[test]
    fn test_release_failures_do_not_stop_later_steps() {
        let mut backend = FakeBackend::with_config(FakeConfig {
            failing_steps: vec!["encoder.stop", "container.stop"],
            ..FakeConfig::default()
        });
        let handle = backend.handle();
        let mut pipeline = pipeline(&mut backend);

        pipeline.submit_frame(&frame(0)).unwrap();
        pipeline.drain(true).unwrap();
        let report = pipeline.finalize();

        assert_eq!(report.release_failures.len(), 2);
        assert_eq!(handle.count("container.release"), 1);
        assert_eq!(handle.count("encoder.release"), 1);
        assert_eq!(handle.count("surface.release"), 1);
    }

    #[test]
    fn test_container_failure_stops_draining() {
        let mut backend = FakeBackend::with_config(FakeConfig {
            failing_writes: 10,
            fail_status_after: Some(2),
            ..FakeConfig::default()
        });
        let mut pipeline = pipeline(&mut backend);

        pipeline.submit_frame(&frame(0)).unwrap();
        // First write fails, container still writable
        assert!(pipeline.drain(false).is_ok());
        assert_eq!(pipeline.write_failures(), 1);

        pipeline.submit_frame(&frame(1)).unwrap();
        assert!(matches!(
            pipeline.drain(false),
            Err(EncoderError::ContainerFailed(_))
        ));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        assert!(pipeline.submit_frame(&frame(2)).is_err());
    }

    #[test]
    fn test_eos_timeout() {
        let mut backend = FakeBackend::with_config(FakeConfig {
            withhold_eos: true,
            ..FakeConfig::default()
        });
        let mut pipeline = pipeline(&mut backend);

        pipeline.submit_frame(&frame(0)).unwrap();
        let report = pipeline.drain(true).unwrap();
        assert!(report.timed_out);
        assert!(!report.end_of_stream);
    }

    #[test]
    fn test_configure_failure_releases_encoder() {
        let mut backend = FakeBackend::with_config(FakeConfig {
            failing_steps: vec!["container.create"],
            ..FakeConfig::default()
        });
        let handle = backend.handle();
        let mut pipeline =
            EncoderPipeline::new(settings(), "unused.mp4", Duration::from_millis(50));

        assert!(pipeline.configure(&mut backend).is_err());
        assert_eq!(pipeline.state(), PipelineState::Unconfigured);
        assert_eq!(handle.count("encoder.release"), 1);
        assert_eq!(handle.count("surface.release"), 1);
    }

    #[test]
    fn test_rejected_config_creates_nothing() {
        let mut backend = FakeBackend::with_config(FakeConfig {
            reject_config: true,
            ..FakeConfig::default()
        });
        let handle = backend.handle();
        let mut pipeline =
            EncoderPipeline::new(settings(), "unused.mp4", Duration::from_millis(50));

        let err = pipeline.configure(&mut backend).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(handle.count("encoder.create"), 0);
    }

    #[test]
    fn test_drop_releases_resources() {
        let mut backend = FakeBackend::new();
        let handle = backend.handle();
        {
            let mut pipeline = pipeline(&mut backend);
            pipeline.submit_frame(&frame(0)).unwrap();
        }
        assert_eq!(handle.count("encoder.release"), 1);
        assert_eq!(handle.count("container.release"), 1);
        assert_eq!(handle.count("surface.release"), 1);
    }
}
