//! Records a synthetic screen through the full Snaply stack.
//!
//! Usage: `snaply-demo [config.json] [seconds]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tracing::info;

use snaply::{
    init_logging, poll_events, FileSharer, HostError, LocalDeviceInfo, PluginParts, ShareRequest,
    SnaplyPlugin,
};
use snaply_capture::{
    BindRequest, CaptureResult, CaptureSource, CaptureTimestamp, CapturedFrame, ConsentRequest,
    ConsentTicket, ConsentToken, DisplayMetrics, FrameSource, PermissionGate,
};
use snaply_encoder::SoftwareBackend;
use snaply_engine::{spawn_recorder, EngineParts, FilesDir};
use snaply_ipc::{MethodCall, MethodResponse, RecorderConfig, RecorderEvent};

const DISPLAY: DisplayMetrics = DisplayMetrics {
    width_px: 1080,
    height_px: 2400,
    density_dpi: 420,
};

/// Moving colour bars.
struct SyntheticScreen {
    width: u32,
    height: u32,
    started: Instant,
    sequence: u64,
}

impl SyntheticScreen {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started: Instant::now(),
            sequence: 0,
        }
    }
}

impl FrameSource for SyntheticScreen {
    fn acquire_frame(&mut self) -> CaptureResult<CapturedFrame> {
        let offset = (self.started.elapsed().as_millis() / 10) as u32;
        let mut data = Vec::with_capacity(CapturedFrame::bgra_buffer_size(self.width, self.height));
        for y in 0..self.height {
            for x in 0..self.width {
                let band = ((x + offset) / 64) % 4;
                let shade = (y * 255 / self.height.max(1)) as u8;
                let pixel = match band {
                    0 => [shade, 0, 0, 255],
                    1 => [0, shade, 0, 255],
                    2 => [0, 0, shade, 255],
                    _ => [shade, shade, shade, 255],
                };
                data.extend_from_slice(&pixel);
            }
        }

        self.sequence += 1;
        Ok(CapturedFrame::new(
            Bytes::from(data),
            self.width,
            self.height,
            CaptureTimestamp::now(self.started),
            self.sequence,
        ))
    }
}

/// Grants consent without prompting and samples the synthetic screen.
struct AutoGrant;

impl PermissionGate for AutoGrant {
    fn request_capture(&mut self, ticket: ConsentTicket) -> ConsentRequest {
        ConsentRequest::Granted(ticket.grant(Bytes::from_static(b"demo")))
    }

    fn bind_token(
        &mut self,
        _token: ConsentToken,
        request: BindRequest,
    ) -> CaptureResult<CaptureSource> {
        Ok(CaptureSource::Pull(Box::new(SyntheticScreen::new(
            request.width,
            request.height,
        ))))
    }
}

/// Logs share requests instead of showing a share sheet.
struct LogSharer;

impl FileSharer for LogSharer {
    fn share(&self, request: &ShareRequest) -> Result<(), HostError> {
        info!(files = ?request.files, mime = %request.mime_type, subject = %request.subject, "Share requested");
        Ok(())
    }
}

fn load_config(path: Option<&str>) -> Result<RecorderConfig> {
    let Some(path) = path else {
        return Ok(RecorderConfig::default());
    };
    let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {path}"))
}

fn log_events(rx: &crossbeam_channel::Receiver<RecorderEvent>) {
    for event in poll_events(rx).unwrap_or_default() {
        match event {
            RecorderEvent::StateChanged { previous, current } => {
                info!("State: {} -> {}", previous.name(), current.name())
            }
            RecorderEvent::Stats(stats) => info!(
                "Stats: submitted={}, written={}, uptime={}ms",
                stats.frames_submitted, stats.samples_written, stats.uptime_ms
            ),
            other => info!(?other, "Event"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args: Vec<String> = std::env::args().collect();
    let config = load_config(args.get(1).map(String::as_str))?;
    let seconds: u64 = match args.get(2) {
        Some(s) => s.parse().with_context(|| format!("invalid duration {s}"))?,
        None => 3,
    };
    info!(?config, seconds, "Snaply demo starting");

    let cache = std::env::temp_dir().join("snaply-demo");
    let (event_tx, event_rx) = snaply_ipc::event_channel();
    let parts = EngineParts {
        gate: Box::new(AutoGrant),
        backend: Box::new(SoftwareBackend),
        host: Box::new(|| false),
    };
    let (recorder, engine) = spawn_recorder(parts, config.clone(), event_tx)?;

    let plugin = SnaplyPlugin::new(PluginParts {
        recorder,
        files: FilesDir::new(&cache, &config),
        metrics: Arc::new(|| -> CaptureResult<DisplayMetrics> { Ok(DISPLAY) }),
        ui: Box::new(SyntheticScreen::new(DISPLAY.width_px as u32, DISPLAY.height_px as u32)),
        sharer: Box::new(LogSharer),
        device_info: Box::new(LocalDeviceInfo::new(Some(DISPLAY))),
    });

    let directory = plugin.handle(MethodCall::GetSnaplyDirectory).await?;
    info!(?directory, "Output directory");

    let screenshot_path = match plugin.handle(MethodCall::TakeScreenshot).await? {
        MethodResponse::Bytes(jpeg) => {
            let path = cache.join("snaply_files").join("screenshot.jpg");
            std::fs::write(&path, &jpeg).context("writing screenshot")?;
            info!(bytes = jpeg.len(), path = %path.display(), "Screenshot saved");
            path
        }
        other => bail!("unexpected screenshot response: {other:?}"),
    };

    plugin.handle(MethodCall::StartScreenRecording).await?;
    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(500)).await;
        log_events(&event_rx);
    }

    let recording = match plugin.handle(MethodCall::StopScreenRecording).await? {
        MethodResponse::Path(path) => PathBuf::from(path),
        other => bail!("unexpected stop response: {other:?}"),
    };
    log_events(&event_rx);
    let size = std::fs::metadata(&recording)
        .with_context(|| format!("reading {}", recording.display()))?
        .len();
    info!(path = %recording.display(), size, "Recording finished");

    plugin
        .handle(MethodCall::ShareFiles {
            file_paths: vec![
                recording.display().to_string(),
                screenshot_path.display().to_string(),
            ],
        })
        .await?;

    if let MethodResponse::DeviceInfo(info) = plugin.handle(MethodCall::GetDeviceInfo).await? {
        info!("Device info: {}", serde_json::to_string_pretty(&info)?);
    }

    plugin.recorder().shutdown()?;
    if engine.join().is_err() {
        bail!("engine thread panicked");
    }
    log_events(&event_rx);
    Ok(())
}
