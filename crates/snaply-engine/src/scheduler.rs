//! Fixed-period frame scheduler.
//!
//! The scheduler thread owns the encoder pipeline and the capture source for
//! the lifetime of a session. Each tick it acquires frames, draws them into
//! the encoder and drains whatever output is ready. Stopping lets the
//! in-flight tick finish and hands the pipeline back for the end-of-stream
//! drain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, info, warn};

use snaply_capture::{CaptureSource, CaptureTimestamp, CapturedFrame};
use snaply_encoder::{EncoderError, EncoderPipeline};

use crate::error::RecordingError;
use crate::stats::RecordingStats;
use crate::RecordingResult;

/// Scheduler timing and failure limits.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Tick period.
    pub frame_interval: Duration,

    /// Consecutive acquisition failures that fail the session.
    pub max_consecutive_failures: u32,

    /// Frame channel capacity for mirroring sources.
    pub mirror_capacity: usize,
}

/// Why the scheduler gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerFault {
    /// Frame acquisition kept failing.
    CaptureFailed(String),

    /// The mirroring source went away.
    PermissionRevoked,

    /// The container can no longer accept samples.
    ContainerFailed(String),

    /// The encoder returned a fatal error.
    EncoderFailed(String),
}

/// Fault raised by the scheduler of a given session.
#[derive(Debug, Clone)]
pub struct FaultNotice {
    /// Session the fault belongs to.
    pub session_id: u64,

    /// What went wrong.
    pub fault: SchedulerFault,
}

/// What the scheduler thread hands back when it exits.
pub struct SchedulerExit {
    /// The session pipeline, ready for the end-of-stream drain.
    pub pipeline: EncoderPipeline,

    /// The capture source, still bound.
    pub source: CaptureSource,

    /// Fault that ended the loop, if any.
    pub fault: Option<SchedulerFault>,
}

/// Scheduler start failure.
pub struct SpawnFailure {
    /// What went wrong.
    pub error: RecordingError,

    /// Pipeline and source, when they could be handed back.
    pub parts: Option<(EncoderPipeline, CaptureSource)>,
}

/// Handle to a running scheduler thread.
pub struct FrameScheduler {
    should_stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<SchedulerExit>>,
}

impl FrameScheduler {
    /// Start the scheduler thread.
    ///
    /// A mirroring source is started here so a failure reaches the caller
    /// together with the still-owned pipeline and source. If the thread
    /// itself cannot be created both are dropped, and the pipeline's drop
    /// guard releases the encoder.
    pub fn spawn(
        session_id: u64,
        mut pipeline: EncoderPipeline,
        mut source: CaptureSource,
        config: SchedulerConfig,
        stats: Arc<RecordingStats>,
        fault_tx: Sender<FaultNotice>,
    ) -> Result<Self, SpawnFailure> {
        let started = match &mut source {
            CaptureSource::Mirror(mirror) => Some(mirror.start(config.mirror_capacity.max(1))),
            CaptureSource::Pull(_) => None,
        };
        let mirror_rx = match started.transpose() {
            Ok(rx) => rx,
            Err(e) => {
                return Err(SpawnFailure {
                    error: e.into(),
                    parts: Some((pipeline, source)),
                })
            }
        };

        let should_stop = Arc::new(AtomicBool::new(false));
        let loop_stop = Arc::clone(&should_stop);
        let handle = thread::Builder::new()
            .name(format!("snaply-scheduler-{session_id}"))
            .spawn(move || {
                let fault = run_loop(
                    &mut pipeline,
                    &mut source,
                    mirror_rx,
                    config,
                    &stats,
                    &loop_stop,
                );
                if let Some(fault) = &fault {
                    let notice = FaultNotice {
                        session_id,
                        fault: fault.clone(),
                    };
                    if let Err(e) = fault_tx.try_send(notice) {
                        warn!("Failed to report scheduler fault: {}", e);
                    }
                }
                SchedulerExit {
                    pipeline,
                    source,
                    fault,
                }
            });

        match handle {
            Ok(thread) => Ok(Self {
                should_stop,
                thread: Some(thread),
            }),
            Err(e) => Err(SpawnFailure {
                error: RecordingError::Resource(format!("scheduler thread: {e}")),
                parts: None,
            }),
        }
    }

    /// Returns true if the loop has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop the loop and take back the pipeline and source.
    pub fn stop(mut self) -> RecordingResult<SchedulerExit> {
        self.should_stop.store(true, Ordering::SeqCst);
        let thread = self
            .thread
            .take()
            .ok_or_else(|| RecordingError::InvalidState("scheduler already stopped".into()))?;
        thread
            .join()
            .map_err(|_| RecordingError::Resource("scheduler thread panicked".into()))
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_loop(
    pipeline: &mut EncoderPipeline,
    source: &mut CaptureSource,
    mirror_rx: Option<Receiver<CapturedFrame>>,
    config: SchedulerConfig,
    stats: &RecordingStats,
    should_stop: &AtomicBool,
) -> Option<SchedulerFault> {
    info!(
        interval_ms = config.frame_interval.as_millis() as u64,
        source = source.kind(),
        "Frame scheduler starting"
    );

    let start_time = Instant::now();
    let mut consecutive_failures: u32 = 0;
    let mut last_pts_us = None;
    let mut last_log_time = Instant::now();
    let mut fault = None;

    while !should_stop.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        if last_log_time.elapsed() >= Duration::from_secs(5) {
            let snapshot = stats.snapshot();
            info!(
                "Recording stats: submitted={}, skipped={}, written={}, uptime={:.1}s",
                snapshot.frames_submitted,
                snapshot.frames_skipped,
                snapshot.samples_written,
                start_time.elapsed().as_secs_f32()
            );
            last_log_time = Instant::now();
        }

        let frames = match acquire(source, mirror_rx.as_ref()) {
            Ok(frames) => {
                consecutive_failures = 0;
                frames
            }
            Err(Acquire::Revoked) => {
                warn!("Mirroring source disconnected");
                fault = Some(SchedulerFault::PermissionRevoked);
                break;
            }
            Err(Acquire::Failed(message)) => {
                consecutive_failures += 1;
                stats.record_skip();
                warn!(consecutive_failures, "Frame acquisition failed: {}", message);
                if consecutive_failures >= config.max_consecutive_failures {
                    fault = Some(SchedulerFault::CaptureFailed(message));
                    break;
                }
                Vec::new()
            }
        };

        for mut frame in frames {
            frame.timestamp = session_timestamp(frame.timestamp.capture_time, start_time, last_pts_us);
            last_pts_us = Some(frame.timestamp.pts_us);
            match pipeline.submit_frame(&frame) {
                Ok(()) => {
                    stats.record_frame();
                    let submitted = stats.frames_submitted();
                    if submitted <= 3 || submitted % 100 == 0 {
                        debug!(submitted, width = frame.width, height = frame.height, "Frame submitted");
                    }
                }
                Err(e) if e.is_fatal() => {
                    fault = Some(SchedulerFault::EncoderFailed(e.to_string()));
                    break;
                }
                Err(e) => {
                    stats.record_skip();
                    warn!("Frame dropped: {}", e);
                }
            }
        }
        if fault.is_some() {
            break;
        }

        let drained = pipeline.drain(false);
        stats.update_pipeline(pipeline.samples_written(), pipeline.write_failures());
        match drained {
            Ok(_) => {}
            Err(EncoderError::ContainerFailed(message)) => {
                fault = Some(SchedulerFault::ContainerFailed(message));
                break;
            }
            Err(e) if e.is_fatal() => {
                fault = Some(SchedulerFault::EncoderFailed(e.to_string()));
                break;
            }
            Err(e) => warn!("Drain failed: {}", e),
        }

        let elapsed = tick_start.elapsed();
        if elapsed < config.frame_interval {
            thread::sleep(config.frame_interval - elapsed);
        }
    }

    info!(
        submitted = stats.frames_submitted(),
        fault = ?fault,
        "Frame scheduler stopped"
    );
    fault
}

/// Rebase a capture instant onto the session clock.
///
/// Frames drained together from a mirroring queue keep their own capture
/// instants; the pts is forced strictly past the previous one.
fn session_timestamp(
    capture_time: Instant,
    start_time: Instant,
    last_pts_us: Option<u64>,
) -> CaptureTimestamp {
    let pts_us = capture_time.saturating_duration_since(start_time).as_micros() as u64;
    let pts_us = match last_pts_us {
        Some(last) if pts_us <= last => last + 1,
        _ => pts_us,
    };
    CaptureTimestamp {
        capture_time,
        pts_us,
    }
}

enum Acquire {
    Failed(String),
    Revoked,
}

fn acquire(
    source: &mut CaptureSource,
    mirror_rx: Option<&Receiver<CapturedFrame>>,
) -> Result<Vec<CapturedFrame>, Acquire> {
    match (source, mirror_rx) {
        (CaptureSource::Pull(source), _) => source
            .acquire_frame()
            .map(|frame| vec![frame])
            .map_err(|e| Acquire::Failed(e.to_string())),
        (CaptureSource::Mirror(_), Some(rx)) => {
            let mut frames = Vec::new();
            loop {
                match rx.try_recv() {
                    Ok(frame) => frames.push(frame),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if frames.is_empty() {
                            return Err(Acquire::Revoked);
                        }
                        break;
                    }
                }
            }
            Ok(frames)
        }
        (CaptureSource::Mirror(_), None) => Err(Acquire::Revoked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU64;

    use bytes::Bytes;
    use snaply_capture::{CaptureError, CaptureResult, FrameSource};
    use snaply_encoder::fake::{FakeBackend, FakeHandle};
    use snaply_encoder::EncoderSettings;

    /// Follows a script of outcomes, then succeeds forever.
    struct ScriptedSource {
        script: VecDeque<bool>,
        acquired: Arc<AtomicU64>,
    }

    impl FrameSource for ScriptedSource {
        fn acquire_frame(&mut self) -> CaptureResult<CapturedFrame> {
            if !self.script.pop_front().unwrap_or(true) {
                return Err(CaptureError::FrameUnavailable("no buffer".into()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(CapturedFrame::new(
                Bytes::from(vec![0u8; CapturedFrame::bgra_buffer_size(16, 16)]),
                16,
                16,
                CaptureTimestamp::now(Instant::now()),
                0,
            ))
        }
    }

    struct Fixture {
        scheduler: Option<FrameScheduler>,
        stats: Arc<RecordingStats>,
        acquired: Arc<AtomicU64>,
        fake: FakeHandle,
        faults: Receiver<FaultNotice>,
        path: PathBuf,
    }

    impl Fixture {
        fn new(name: &str, script: &[bool]) -> Self {
            let mut backend = FakeBackend::new();
            let fake = backend.handle();
            let settings = EncoderSettings {
                width: 16,
                height: 16,
                bitrate: 1024,
                frame_rate: 24,
                keyframe_interval_secs: 1,
            };
            let path = std::env::temp_dir().join(format!(
                "snaply_scheduler_{}_{}.mp4",
                name,
                std::process::id()
            ));
            let mut pipeline =
                EncoderPipeline::new(settings, path.clone(), Duration::from_millis(100));
            pipeline.configure(&mut backend).unwrap();

            let acquired = Arc::new(AtomicU64::new(0));
            let source = CaptureSource::Pull(Box::new(ScriptedSource {
                script: script.iter().copied().collect(),
                acquired: Arc::clone(&acquired),
            }));
            let config = SchedulerConfig {
                frame_interval: Duration::from_millis(5),
                max_consecutive_failures: 3,
                mirror_capacity: 4,
            };
            let stats = Arc::new(RecordingStats::new());
            let (fault_tx, faults) = crossbeam_channel::bounded(4);

            let scheduler = match FrameScheduler::spawn(
                1,
                pipeline,
                source,
                config,
                Arc::clone(&stats),
                fault_tx,
            ) {
                Ok(scheduler) => scheduler,
                Err(failure) => panic!("scheduler spawn failed: {}", failure.error),
            };

            Self {
                scheduler: Some(scheduler),
                stats,
                acquired,
                fake,
                faults,
                path,
            }
        }

        fn wait_for_frames(&self, count: u64) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.stats.frames_submitted() < count {
                assert!(Instant::now() < deadline, "timed out waiting for {count} frames");
                thread::sleep(Duration::from_millis(2));
            }
        }

        fn stop(&mut self) -> SchedulerExit {
            self.scheduler.take().unwrap().stop().unwrap()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            drop(self.scheduler.take());
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[test]
    fn test_intermittent_failures_keep_recording() {
        let mut f = Fixture::new("intermittent", &[false, false, true, false, false]);

        f.wait_for_frames(3);
        assert!(!f.scheduler.as_ref().unwrap().is_finished());
        assert!(f.faults.try_recv().is_err());

        let exit = f.stop();
        assert!(exit.fault.is_none());
        assert_eq!(f.stats.snapshot().frames_skipped, 4);
        exit.pipeline.finalize();
    }

    #[test]
    fn test_failures_at_limit_raise_fault() {
        let mut f = Fixture::new("limit", &[true, false, false, false]);

        let notice = f.faults.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(notice.session_id, 1);
        assert!(matches!(notice.fault, SchedulerFault::CaptureFailed(_)));

        let exit = f.stop();
        assert!(matches!(exit.fault, Some(SchedulerFault::CaptureFailed(_))));
        exit.pipeline.finalize();
    }

    #[test]
    fn test_stop_hands_back_pipeline_after_last_tick() {
        let mut f = Fixture::new("stop", &[]);
        f.wait_for_frames(2);

        let SchedulerExit {
            mut pipeline,
            mut source,
            fault,
        } = f.stop();
        assert!(fault.is_none());

        // Every acquired frame reached the encoder before the loop exited
        let submitted = f.stats.frames_submitted();
        assert_eq!(f.acquired.load(Ordering::SeqCst), submitted);
        assert_eq!(f.fake.frames_drawn(), submitted);

        assert!(pipeline.drain(true).unwrap().end_of_stream);
        let report = pipeline.finalize();
        assert!(report.has_samples());
        assert!(f.fake.samples().last().unwrap().is_end_of_stream);
        source.release().unwrap();
    }

    #[test]
    fn test_session_timestamp_keeps_capture_instants() {
        let start = Instant::now();
        let captured = start + Duration::from_millis(10);

        let first = session_timestamp(captured, start, None);
        assert_eq!(first.pts_us, 10_000);
        assert_eq!(first.capture_time, captured);

        // Same instant drained in the same tick
        let second = session_timestamp(captured, start, Some(first.pts_us));
        assert_eq!(second.pts_us, 10_001);

        let later = session_timestamp(start + Duration::from_millis(30), start, Some(second.pts_us));
        assert_eq!(later.pts_us, 30_000);

        let queued_before_start = session_timestamp(start, start + Duration::from_millis(5), None);
        assert_eq!(queued_before_start.pts_us, 0);
    }
}
