//! Method dispatch for the host bridge.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use snaply_capture::{screenshot, CaptureError, DisplayMetricsProvider, FrameSource};
use snaply_engine::{FilesDir, Recorder, RecordingError};
use snaply_ipc::{ErrorCode, MethodCall, MethodResponse, MethodResult, PluginError};

use crate::device::{collect_device_info, DeviceInfoProvider};
use crate::error::HostError;
use crate::share::{FileSharer, ShareRequest};

/// Host collaborators used by [`SnaplyPlugin`].
pub struct PluginParts {
    /// Handle to a running recorder engine.
    pub recorder: Recorder,

    /// Output directory.
    pub files: FilesDir,

    /// Display metrics, queried at every recording start.
    pub metrics: Arc<dyn DisplayMetricsProvider + Sync>,

    /// Visual buffer of the host UI, used for screenshots.
    pub ui: Box<dyn FrameSource>,

    /// Share sheet.
    pub sharer: Box<dyn FileSharer>,

    /// Device information.
    pub device_info: Box<dyn DeviceInfoProvider>,
}

/// Dispatches [`MethodCall`]s from the host bridge.
pub struct SnaplyPlugin {
    recorder: Recorder,
    files: FilesDir,
    metrics: Arc<dyn DisplayMetricsProvider + Sync>,
    ui: Mutex<Box<dyn FrameSource>>,
    sharer: Box<dyn FileSharer>,
    device_info: Box<dyn DeviceInfoProvider>,
}

impl SnaplyPlugin {
    /// Create a plugin over the given collaborators.
    pub fn new(parts: PluginParts) -> Self {
        Self {
            recorder: parts.recorder,
            files: parts.files,
            metrics: parts.metrics,
            ui: Mutex::new(parts.ui),
            sharer: parts.sharer,
            device_info: parts.device_info,
        }
    }

    /// Recorder handle, for delivering consent answers.
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Handle one method call.
    #[instrument(skip(self, call), fields(method = call.name()))]
    pub async fn handle(&self, call: MethodCall) -> MethodResult {
        debug!("Method call");

        let result = match call {
            MethodCall::TakeScreenshot => self.take_screenshot().await.map(MethodResponse::Bytes),
            MethodCall::StartScreenRecording => {
                self.start_recording().await.map(MethodResponse::Started)
            }
            MethodCall::StopScreenRecording => {
                self.stop_recording().await.map(MethodResponse::Path)
            }
            MethodCall::ShareFiles { file_paths } => {
                self.share_files(&file_paths).map(|()| MethodResponse::Unit)
            }
            MethodCall::GetSnaplyDirectory => self.snaply_directory().map(MethodResponse::Path),
            MethodCall::GetDeviceInfo => Ok(MethodResponse::DeviceInfo(collect_device_info(
                self.device_info.as_ref(),
            ))),
        };

        if let Err(e) = &result {
            warn!(code = %e.code, "Method failed: {}", e.message);
        }
        result
    }

    async fn take_screenshot(&self) -> Result<Vec<u8>, PluginError> {
        let frame = self.ui.lock().acquire_frame().map_err(capture_error)?;
        tokio::task::spawn_blocking(move || screenshot::process(&frame))
            .await
            .map_err(|e| {
                PluginError::new(ErrorCode::CaptureError, format!("Screenshot task failed: {e}"))
            })?
            .map_err(capture_error)
    }

    async fn start_recording(&self) -> Result<bool, PluginError> {
        let metrics = Arc::clone(&self.metrics);
        let completion = self
            .recorder
            .start(move || metrics.display_metrics(), self.files.clone())?;

        let started = completion
            .await
            .map_err(|_| RecordingError::EngineUnavailable)??;
        Ok(started)
    }

    async fn stop_recording(&self) -> Result<String, PluginError> {
        let recorder = self.recorder.clone();
        let path = tokio::task::spawn_blocking(move || recorder.stop())
            .await
            .map_err(|e| {
                PluginError::new(ErrorCode::EngineUnavailable, format!("Stop task failed: {e}"))
            })??;
        Ok(path.display().to_string())
    }

    fn share_files(&self, paths: &[String]) -> Result<(), PluginError> {
        let request = ShareRequest::build(paths)?;
        debug!(files = request.files.len(), mime = %request.mime_type, "Sharing files");
        self.sharer.share(&request).map_err(|e| match e {
            HostError::UiUnavailable(_) => PluginError::new(ErrorCode::UiUnavailable, e.to_string()),
            HostError::SectionUnavailable(_) => {
                PluginError::new(ErrorCode::InvalidState, e.to_string())
            }
        })
    }

    fn snaply_directory(&self) -> Result<String, PluginError> {
        self.files
            .ensure()
            .map(|dir| dir.display().to_string())
            .map_err(|e| PluginError::new(ErrorCode::DirectoryUnavailable, e.to_string()))
    }
}

fn capture_error(err: CaptureError) -> PluginError {
    match err {
        CaptureError::Compression(_) => PluginError::new(ErrorCode::CompressionError, err.to_string()),
        e => RecordingError::from(e).into(),
    }
}
