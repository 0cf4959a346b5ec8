//! Remote-callable methods exposed to the host bridge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Methods the host bridge can invoke.
///
/// The serialized names match the method-channel names used by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "arguments")]
pub enum MethodCall {
    /// Capture the current UI as a compressed still image.
    #[serde(rename = "takeScreenshotMethod")]
    TakeScreenshot,

    /// Request consent and start recording the screen.
    #[serde(rename = "startScreenRecordingMethod")]
    StartScreenRecording,

    /// Stop the active recording and return the file path.
    #[serde(rename = "stopScreenRecordingMethod")]
    StopScreenRecording,

    /// Hand files to the platform share sheet.
    #[serde(rename = "shareFilesMethod")]
    ShareFiles {
        #[serde(rename = "filePaths")]
        file_paths: Vec<String>,
    },

    /// Return the directory holding Snaply output files.
    #[serde(rename = "getSnaplyDirectoryMethod")]
    GetSnaplyDirectory,

    /// Return device, system, screen and network details.
    #[serde(rename = "getDeviceInfoMethod")]
    GetDeviceInfo,
}

impl MethodCall {
    /// Wire name of the method.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TakeScreenshot => "takeScreenshotMethod",
            Self::StartScreenRecording => "startScreenRecordingMethod",
            Self::StopScreenRecording => "stopScreenRecordingMethod",
            Self::ShareFiles { .. } => "shareFilesMethod",
            Self::GetSnaplyDirectory => "getSnaplyDirectoryMethod",
            Self::GetDeviceInfo => "getDeviceInfoMethod",
        }
    }
}

/// Successful results of a [`MethodCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodResponse {
    /// Compressed image bytes.
    Bytes(Vec<u8>),

    /// Recording started.
    Started(bool),

    /// A filesystem path.
    Path(String),

    /// Nested device information sections.
    DeviceInfo(BTreeMap<String, BTreeMap<String, String>>),

    /// Call completed without a value.
    Unit,
}

/// Result of dispatching a method call.
pub type MethodResult = Result<MethodResponse, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_call_wire_names() {
        let json = serde_json::to_string(&MethodCall::StopScreenRecording).unwrap();
        assert_eq!(json, r#"{"method":"stopScreenRecordingMethod"}"#);

        let call: MethodCall = serde_json::from_str(
            r#"{"method":"shareFilesMethod","arguments":{"filePaths":["/tmp/a.mp4"]}}"#,
        )
        .unwrap();
        assert_eq!(
            call,
            MethodCall::ShareFiles {
                file_paths: vec!["/tmp/a.mp4".to_string()]
            }
        );
        assert_eq!(call.name(), "shareFilesMethod");
    }
}
