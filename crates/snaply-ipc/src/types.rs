//! Common types shared across the recorder crates.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Recorder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Period between captured frames in milliseconds (default: 50, i.e. 20 fps).
    pub frame_interval_ms: u64,

    /// Frame rate declared to the encoder and container (default: 24).
    pub declared_frame_rate: u32,

    /// Keyframe interval in seconds (default: 1).
    pub keyframe_interval_secs: u32,

    /// How the target bitrate is derived.
    pub bitrate: BitrateProfile,

    /// Consecutive frame acquisition failures tolerated before the session fails.
    pub max_consecutive_failures: u32,

    /// Upper bound for the end-of-stream drain in milliseconds.
    pub eos_timeout_ms: u64,

    /// Name of the output directory inside the host cache directory.
    pub files_dir_name: String,

    /// File name of the recording inside the output directory.
    pub recording_file_name: String,

    /// Capacity of the channel a mirroring capture source pushes frames into.
    pub mirror_channel_capacity: usize,
}

impl RecorderConfig {
    /// Period between captured frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    /// Upper bound for the end-of-stream drain.
    pub fn eos_timeout(&self) -> Duration {
        Duration::from_millis(self.eos_timeout_ms)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 50,
            declared_frame_rate: 24,
            keyframe_interval_secs: 1,
            bitrate: BitrateProfile::default(),
            max_consecutive_failures: 10,
            eos_timeout_ms: 2000,
            files_dir_name: "snaply_files".to_string(),
            recording_file_name: "screen_recording.mp4".to_string(),
            mirror_channel_capacity: 3,
        }
    }
}

/// Bitrate derivation for the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitrateProfile {
    /// `width * height * bits_per_pixel` bits per second.
    PerPixel { bits_per_pixel: u32 },

    /// A fixed bitrate in bits per second.
    Fixed { bits_per_second: u32 },
}

impl Default for BitrateProfile {
    fn default() -> Self {
        Self::PerPixel { bits_per_pixel: 4 }
    }
}

impl BitrateProfile {
    /// Bitrate in bits per second for the given output size.
    pub fn bitrate_for(self, width: u32, height: u32) -> u32 {
        match self {
            Self::PerPixel { bits_per_pixel } => width
                .saturating_mul(height)
                .saturating_mul(bits_per_pixel),
            Self::Fixed { bits_per_second } => bits_per_second,
        }
    }
}

/// Counters for a recording session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatsSnapshot {
    /// Frames drawn into the encoder surface.
    pub frames_submitted: u64,

    /// Ticks where no frame could be acquired.
    pub frames_skipped: u64,

    /// Encoded samples written to the container.
    pub samples_written: u64,

    /// Sample writes that failed and were dropped.
    pub write_failures: u64,

    /// Session uptime in milliseconds.
    pub uptime_ms: u64,
}

/// Device information grouped by section (`device`, `system`, `screen`, `network`, ...).
pub type DeviceInfo = BTreeMap<String, BTreeMap<String, String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_per_pixel() {
        let profile = BitrateProfile::default();
        assert_eq!(profile.bitrate_for(576, 1280), 576 * 1280 * 4);
    }

    #[test]
    fn test_bitrate_fixed() {
        let profile = BitrateProfile::Fixed {
            bits_per_second: 2_000_000,
        };
        assert_eq!(profile.bitrate_for(576, 1280), 2_000_000);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: RecorderConfig =
            serde_json::from_str(r#"{"frame_interval_ms": 100}"#).unwrap();
        assert_eq!(config.frame_interval(), Duration::from_millis(100));
        assert_eq!(config.declared_frame_rate, 24);
        assert_eq!(config.recording_file_name, "screen_recording.mp4");
    }
}
