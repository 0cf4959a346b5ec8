//! MP4 container writer backed by muxide.

use std::fs::File;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use muxide::api::{Muxer, MuxerBuilder, VideoCodec};
use tracing::{debug, info, instrument, warn};

use crate::error::EncoderError;
use crate::{ContainerStatus, ContainerWriter, EncodedSample, EncoderResult, OutputFormat};

/// Consecutive write failures after which the container reports itself failed.
const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 5;

/// Single-track H.264 MP4 writer.
///
/// The file is created up front; the muxer itself is built on
/// [`start`](ContainerWriter::start) once the track format is known.
pub struct Mp4Container {
    path: PathBuf,
    file: Option<File>,
    format: Option<OutputFormat>,
    muxer: Option<Muxer<File>>,
    /// Codec configuration not yet sent in front of a keyframe.
    pending_config: Option<Bytes>,
    consecutive_failures: u32,
    samples_written: u64,
    status: ContainerStatus,
}

impl Mp4Container {
    /// Create the output file.
    #[instrument(name = "mp4_create", skip_all, fields(path = %path.display()))]
    pub fn create(path: &Path) -> EncoderResult<Self> {
        let file = File::create(path)?;
        debug!("Created MP4 output file");

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            format: None,
            muxer: None,
            pending_config: None,
            consecutive_failures: 0,
            samples_written: 0,
            status: ContainerStatus::Writing,
        })
    }

    /// Output file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_failure(&mut self, message: String) -> EncoderError {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
            warn!(
                failures = self.consecutive_failures,
                "MP4 writer giving up after repeated failures"
            );
            self.status = ContainerStatus::Failed;
        }
        EncoderError::Container(message)
    }
}

impl ContainerWriter for Mp4Container {
    fn add_track(&mut self, format: &OutputFormat) -> EncoderResult<usize> {
        if self.format.is_some() {
            return Err(EncoderError::Container("MP4 writer holds one video track".into()));
        }
        self.pending_config = Some(format.codec_config.clone()).filter(|c| !c.is_empty());
        self.format = Some(format.clone());
        Ok(0)
    }

    fn start(&mut self) -> EncoderResult<()> {
        let format = self
            .format
            .as_ref()
            .ok_or_else(|| EncoderError::Container("start before add_track".into()))?;
        let file = self
            .file
            .take()
            .ok_or_else(|| EncoderError::Container("MP4 writer already started".into()))?;

        let muxer = MuxerBuilder::new(file)
            .video(
                VideoCodec::H264,
                format.width,
                format.height,
                format.frame_rate as f64,
            )
            .build()
            .map_err(|e| EncoderError::Container(format!("muxer setup failed: {:?}", e)))?;

        info!(width = format.width, height = format.height, "MP4 writer started");
        self.muxer = Some(muxer);
        Ok(())
    }

    fn write_sample(&mut self, sample: &EncodedSample) -> EncoderResult<()> {
        if self.status == ContainerStatus::Failed {
            return Err(EncoderError::ContainerFailed(
                "MP4 writer stopped accepting samples".into(),
            ));
        }

        let data = match self.pending_config.take() {
            Some(config) if sample.is_key_frame => {
                let mut buf = BytesMut::with_capacity(config.len() + sample.data.len());
                buf.put_slice(&config);
                buf.put_slice(&sample.data);
                buf.freeze()
            }
            config => {
                self.pending_config = config;
                sample.data.clone()
            }
        };

        let pts_secs = sample.pts_us as f64 / 1_000_000.0;
        let result = match self.muxer.as_mut() {
            Some(muxer) => muxer
                .write_video(pts_secs, &data, sample.is_key_frame)
                .map_err(|e| format!("{:?}", e)),
            None => Err("MP4 writer not started".to_string()),
        };

        match result {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.samples_written += 1;
                Ok(())
            }
            Err(message) => Err(self.record_failure(message)),
        }
    }

    fn status(&self) -> ContainerStatus {
        self.status
    }

    fn stop(&mut self) -> EncoderResult<()> {
        let muxer = self
            .muxer
            .take()
            .ok_or_else(|| EncoderError::Container("MP4 writer not started".into()))?;
        let stats = muxer
            .finish_with_stats()
            .map_err(|e| EncoderError::Container(format!("finish failed: {:?}", e)))?;
        info!(
            samples = self.samples_written,
            path = %self.path.display(),
            "MP4 file finished: {:?}",
            stats
        );
        Ok(())
    }

    fn release(&mut self) -> EncoderResult<()> {
        self.file = None;
        if self.muxer.take().is_some() {
            debug!("Released MP4 writer without finishing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> OutputFormat {
        OutputFormat {
            mime: crate::MIME_TYPE_AVC,
            width: 64,
            height: 64,
            frame_rate: 24,
            codec_config: Bytes::from_static(&[0, 0, 0, 1, 0x67]),
        }
    }

    #[test]
    fn test_single_track_only() {
        let path = std::env::temp_dir().join("snaply_mp4_single_track.mp4");
        let mut container = Mp4Container::create(&path).unwrap();
        assert_eq!(container.add_track(&format()).unwrap(), 0);
        assert!(container.add_track(&format()).is_err());
        container.release().unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_write_before_start_fails_then_marks_failed() {
        let path = std::env::temp_dir().join("snaply_mp4_unstarted.mp4");
        let mut container = Mp4Container::create(&path).unwrap();
        let sample = EncodedSample {
            track_index: 0,
            pts_us: 0,
            data: Bytes::from_static(b"x"),
            is_config_sample: false,
            is_key_frame: false,
            is_end_of_stream: false,
        };
        for _ in 0..MAX_CONSECUTIVE_WRITE_FAILURES {
            assert!(container.write_sample(&sample).is_err());
        }
        assert_eq!(container.status(), ContainerStatus::Failed);
        container.release().unwrap();
        let _ = std::fs::remove_file(path);
    }
}
