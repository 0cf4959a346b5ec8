//! In-memory encoder backend for tests.
//!
//! Every native call is appended to a shared log so tests can assert on
//! ordering, and individual steps can be made to fail.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use snaply_capture::CapturedFrame;

use crate::error::EncoderError;
use crate::{
    BufferFlags, ContainerStatus, ContainerWriter, EncodedSample, EncoderBackend, EncoderOutput,
    EncoderResult, EncoderSettings, InputSurface, OutputBuffer, OutputFormat, VideoEncoder,
    MIME_TYPE_AVC,
};

/// Behaviour knobs for [`FakeBackend`].
#[derive(Debug, Clone)]
pub struct FakeConfig {
    /// `validate` rejects every configuration.
    pub reject_config: bool,

    /// Call names (as logged) that return an error.
    pub failing_steps: Vec<&'static str>,

    /// The output format is announced once this many frames were drawn.
    /// `None` never announces it.
    pub format_after_frames: Option<u64>,

    /// Announce the output format again after every later frame.
    pub repeat_format: bool,

    /// Number of sample writes that fail, counted from the first.
    pub failing_writes: u64,

    /// Container status turns failed after this many failed writes.
    pub fail_status_after: Option<u64>,

    /// End of input never produces an end-of-stream buffer.
    pub withhold_eos: bool,

    /// The container creates its output file like a real writer.
    pub create_files: bool,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            reject_config: false,
            failing_steps: Vec::new(),
            format_after_frames: Some(1),
            repeat_format: false,
            failing_writes: 0,
            fail_status_after: None,
            withhold_eos: false,
            create_files: true,
        }
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<&'static str>,
    samples: Vec<EncodedSample>,
    output: VecDeque<EncoderOutput>,
    frames_drawn: u64,
    format_announced: bool,
    next_index: usize,
    write_attempts: u64,
    write_failures: u64,
}

#[derive(Clone)]
struct Shared {
    config: Arc<FakeConfig>,
    state: Arc<Mutex<FakeState>>,
}

impl Shared {
    fn step(&self, name: &'static str) -> EncoderResult<()> {
        self.state.lock().calls.push(name);
        if self.config.failing_steps.contains(&name) {
            return Err(EncoderError::Release(format!("{} failed", name)));
        }
        Ok(())
    }
}

impl FakeState {
    fn announce_format(&mut self, settings: &EncoderSettings) {
        self.output.push_back(EncoderOutput::FormatChanged(OutputFormat {
            mime: MIME_TYPE_AVC,
            width: settings.width,
            height: settings.height,
            frame_rate: settings.frame_rate,
            codec_config: Bytes::from_static(b"config"),
        }));
        self.format_announced = true;
    }

    fn push_buffer(&mut self, data: Bytes, pts_us: u64, flags: BufferFlags) {
        let index = self.next_index;
        self.next_index += 1;
        self.output.push_back(EncoderOutput::Buffer(OutputBuffer {
            index,
            data,
            pts_us,
            flags,
        }));
    }
}

/// Read-only view of a fake backend's log, kept by tests after the backend
/// has been handed off.
#[derive(Clone)]
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHandle {
    /// All logged calls, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    /// Number of times `name` was called.
    pub fn count(&self, name: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == name).count()
    }

    /// Samples accepted by the container.
    pub fn samples(&self) -> Vec<EncodedSample> {
        self.state.lock().samples.clone()
    }

    /// Frames drawn into the surface.
    pub fn frames_drawn(&self) -> u64 {
        self.state.lock().frames_drawn
    }
}

/// Encoder backend that records calls instead of encoding.
pub struct FakeBackend {
    shared: Shared,
}

impl FakeBackend {
    /// Create a backend with default behaviour.
    pub fn new() -> Self {
        Self::with_config(FakeConfig::default())
    }

    /// Create a backend with the given behaviour.
    pub fn with_config(config: FakeConfig) -> Self {
        Self {
            shared: Shared {
                config: Arc::new(config),
                state: Arc::new(Mutex::new(FakeState::default())),
            },
        }
    }

    /// Handle for inspecting the call log.
    pub fn handle(&self) -> FakeHandle {
        FakeHandle {
            state: Arc::clone(&self.shared.state),
        }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for FakeBackend {
    fn validate(&self, settings: &EncoderSettings) -> EncoderResult<()> {
        if self.shared.config.reject_config {
            return Err(EncoderError::UnsupportedConfig(format!(
                "{}x{} rejected",
                settings.width, settings.height
            )));
        }
        settings.validate()
    }

    fn create_encoder(
        &mut self,
        settings: &EncoderSettings,
    ) -> EncoderResult<(Box<dyn VideoEncoder>, Box<dyn InputSurface>)> {
        self.shared
            .step("encoder.create")
            .map_err(|e| EncoderError::Initialization(e.to_string()))?;
        Ok((
            Box::new(FakeEncoder {
                shared: self.shared.clone(),
                settings: settings.clone(),
            }),
            Box::new(FakeSurface {
                shared: self.shared.clone(),
                settings: settings.clone(),
            }),
        ))
    }

    fn create_container(
        &mut self,
        path: &Path,
        _settings: &EncoderSettings,
    ) -> EncoderResult<Box<dyn ContainerWriter>> {
        self.shared
            .step("container.create")
            .map_err(|e| EncoderError::Container(e.to_string()))?;
        if self.shared.config.create_files {
            File::create(path)?;
        }
        Ok(Box::new(FakeContainer {
            shared: self.shared.clone(),
            started: false,
        }))
    }
}

struct FakeEncoder {
    shared: Shared,
    settings: EncoderSettings,
}

impl VideoEncoder for FakeEncoder {
    fn dequeue_output(&mut self) -> EncoderResult<EncoderOutput> {
        Ok(self
            .shared
            .state
            .lock()
            .output
            .pop_front()
            .unwrap_or(EncoderOutput::TryAgainLater))
    }

    fn release_output_buffer(&mut self, _index: usize) -> EncoderResult<()> {
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> EncoderResult<()> {
        self.shared.step("encoder.signal_eos")?;
        if self.shared.config.withhold_eos {
            return Ok(());
        }

        let mut state = self.shared.state.lock();
        let eos = BufferFlags {
            end_of_stream: true,
            ..BufferFlags::default()
        };
        if state.frames_drawn > 0 && self.shared.config.format_after_frames.is_some() {
            if !state.format_announced {
                state.announce_format(&self.settings);
            }
            let pts_us = state.frames_drawn * 1_000;
            state.push_buffer(Bytes::from_static(b"end"), pts_us, eos);
        } else {
            state.push_buffer(Bytes::new(), 0, eos);
        }
        Ok(())
    }

    fn stop(&mut self) -> EncoderResult<()> {
        self.shared.step("encoder.stop")
    }

    fn release(&mut self) -> EncoderResult<()> {
        self.shared.step("encoder.release")
    }

    fn is_hardware_accelerated(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

struct FakeSurface {
    shared: Shared,
    settings: EncoderSettings,
}

impl InputSurface for FakeSurface {
    fn draw(&mut self, frame: &CapturedFrame) -> EncoderResult<()> {
        self.shared.step("surface.draw")?;

        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        state.frames_drawn += 1;

        let ready = config
            .format_after_frames
            .map_or(false, |n| state.frames_drawn >= n);
        if !ready {
            return Ok(());
        }
        if !state.format_announced || config.repeat_format {
            state.announce_format(&self.settings);
        }
        let key_frame = state.frames_drawn == 1;
        state.push_buffer(
            Bytes::from_static(b"frame"),
            frame.timestamp.pts_us,
            BufferFlags {
                key_frame,
                ..BufferFlags::default()
            },
        );
        Ok(())
    }

    fn release(&mut self) -> EncoderResult<()> {
        self.shared.step("surface.release")
    }
}

struct FakeContainer {
    shared: Shared,
    started: bool,
}

impl ContainerWriter for FakeContainer {
    fn add_track(&mut self, _format: &OutputFormat) -> EncoderResult<usize> {
        self.shared.step("container.add_track")?;
        Ok(0)
    }

    fn start(&mut self) -> EncoderResult<()> {
        self.shared.step("container.start")?;
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, sample: &EncodedSample) -> EncoderResult<()> {
        self.shared.step("container.write")?;
        if !self.started {
            return Err(EncoderError::Container("write before start".into()));
        }

        let mut state = self.shared.state.lock();
        state.write_attempts += 1;
        if state.write_attempts <= self.shared.config.failing_writes {
            state.write_failures += 1;
            return Err(EncoderError::Container("write failed".into()));
        }
        state.samples.push(sample.clone());
        Ok(())
    }

    fn status(&self) -> ContainerStatus {
        let failures = self.shared.state.lock().write_failures;
        match self.shared.config.fail_status_after {
            Some(limit) if failures >= limit => ContainerStatus::Failed,
            _ => ContainerStatus::Writing,
        }
    }

    fn stop(&mut self) -> EncoderResult<()> {
        self.shared.step("container.stop")
    }

    fn release(&mut self) -> EncoderResult<()> {
        self.shared.step("container.release")
    }
}
