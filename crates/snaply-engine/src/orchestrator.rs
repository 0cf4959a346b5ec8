//! Capture orchestrator.
//!
//! A single engine thread owns the session. Start requests, consent answers,
//! stop requests and scheduler faults all reach it through channels and are
//! handled one at a time, so no lock is held across a session transition.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use snaply_capture::{
    CaptureSource, ConsentRequest, ConsentResult, ConsentTicket, ConsentToken,
    DisplayMetrics, DisplayMetricsProvider, PermissionGate,
};
use snaply_encoder::{EncoderBackend, EncoderPipeline, FinalizeReport, PipelineState};
use snaply_ipc::{RecorderConfig, RecorderEvent, RecorderState, StopReason};

use crate::error::RecordingError;
use crate::files::{remove_file_if_exists, OutputPathProvider};
use crate::scaling::{scale_for, ScaledOutput};
use crate::scheduler::{FaultNotice, FrameScheduler, SchedulerConfig, SchedulerExit, SchedulerFault};
use crate::session::{RecordingSession, StartCompletion};
use crate::RecordingResult;

/// Channel capacity for commands (handle → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Scheduler faults are rare; one per session at most.
const FAULT_CHANNEL_CAPACITY: usize = 4;

/// Period of stats events while recording.
const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// Host surface the recorder is attached to.
pub trait HostSurface: Send {
    /// Returns true while the host surface is being torn down.
    fn is_finishing(&self) -> bool;
}

impl<F> HostSurface for F
where
    F: Fn() -> bool + Send,
{
    fn is_finishing(&self) -> bool {
        self()
    }
}

/// Host collaborators the engine needs.
pub struct EngineParts {
    /// Consent prompt and capture source factory.
    pub gate: Box<dyn PermissionGate>,

    /// Encoder and container factory.
    pub backend: Box<dyn EncoderBackend>,

    /// Host surface lifecycle.
    pub host: Box<dyn HostSurface>,
}

/// Commands sent from a [`Recorder`] to the engine thread.
pub enum EngineCommand {
    /// Request consent and start a session.
    Start {
        metrics: Box<dyn DisplayMetricsProvider>,
        output: Box<dyn OutputPathProvider>,
        completion: oneshot::Sender<RecordingResult<bool>>,
    },

    /// Answer to a pending consent prompt.
    PermissionResult(ConsentResult),

    /// Stop the active session.
    Stop {
        reply: Sender<RecordingResult<PathBuf>>,
    },

    /// Stop any session and exit the engine loop.
    Shutdown,
}

impl fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { .. } => f.write_str("Start"),
            Self::PermissionResult(result) => f
                .debug_struct("PermissionResult")
                .field("generation", &result.ticket.generation())
                .field("granted", &result.is_granted())
                .finish(),
            Self::Stop { .. } => f.write_str("Stop"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Cloneable handle to the engine thread. Callable from any thread.
#[derive(Clone)]
pub struct Recorder {
    command_tx: Sender<EngineCommand>,
    state: Arc<RwLock<RecorderState>>,
}

impl Recorder {
    /// Request a new recording.
    ///
    /// Returns at once; the completion resolves when frames start flowing or
    /// the session fails to start. An active session is stopped first.
    pub fn start<M, O>(&self, metrics: M, output: O) -> RecordingResult<StartCompletion>
    where
        M: DisplayMetricsProvider + 'static,
        O: OutputPathProvider + 'static,
    {
        let (completion, rx) = oneshot::channel();
        self.send(EngineCommand::Start {
            metrics: Box::new(metrics),
            output: Box::new(output),
            completion,
        })?;
        Ok(rx)
    }

    /// Deliver the answer to a consent prompt.
    pub fn on_permission_result(&self, result: ConsentResult) -> RecordingResult<()> {
        self.send(EngineCommand::PermissionResult(result))
    }

    /// Stop the active recording and return its file.
    ///
    /// Blocks for the end-of-stream drain and finalization.
    pub fn stop(&self) -> RecordingResult<PathBuf> {
        let (reply, reply_rx) = crossbeam_channel::bounded(1);
        self.send(EngineCommand::Stop { reply })?;
        reply_rx.recv().map_err(|_| RecordingError::EngineUnavailable)?
    }

    /// Ask the engine thread to exit.
    pub fn shutdown(&self) -> RecordingResult<()> {
        self.send(EngineCommand::Shutdown)
    }

    /// Current recorder state.
    pub fn state(&self) -> RecorderState {
        self.state.read().clone()
    }

    fn send(&self, command: EngineCommand) -> RecordingResult<()> {
        self.command_tx
            .send(command)
            .map_err(|_| RecordingError::EngineUnavailable)
    }
}

/// Create a recorder handle and the engine it drives.
///
/// The engine does nothing until [`Engine::run`] is called.
pub fn create_recorder(
    parts: EngineParts,
    config: RecorderConfig,
    event_tx: Sender<RecorderEvent>,
) -> (Recorder, Engine) {
    let (command_tx, command_rx) = command_channel();
    let engine = Engine::new(command_rx, event_tx, parts, config);
    let recorder = Recorder {
        command_tx,
        state: Arc::clone(&engine.state),
    };
    (recorder, engine)
}

/// Create a recorder and run its engine on a dedicated thread.
pub fn spawn_recorder(
    parts: EngineParts,
    config: RecorderConfig,
    event_tx: Sender<RecorderEvent>,
) -> RecordingResult<(Recorder, JoinHandle<()>)> {
    let (recorder, mut engine) = create_recorder(parts, config, event_tx);
    let handle = thread::Builder::new()
        .name("snaply-engine".into())
        .spawn(move || engine.run())?;
    Ok((recorder, handle))
}

/// The recording engine.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<RecorderEvent>,
    config: RecorderConfig,
    gate: Box<dyn PermissionGate>,
    backend: Box<dyn EncoderBackend>,
    host: Box<dyn HostSurface>,
    state: Arc<RwLock<RecorderState>>,
    session: Option<RecordingSession>,
    last_session_id: u64,
    fault_tx: Sender<FaultNotice>,
    fault_rx: Receiver<FaultNotice>,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<RecorderEvent>,
        parts: EngineParts,
        config: RecorderConfig,
    ) -> Self {
        let (fault_tx, fault_rx) = crossbeam_channel::bounded(FAULT_CHANNEL_CAPACITY);
        Self {
            command_rx,
            event_tx,
            config,
            gate: parts.gate,
            backend: parts.backend,
            host: parts.host,
            state: Arc::new(RwLock::new(RecorderState::Idle)),
            session: None,
            last_session_id: 0,
            fault_tx,
            fault_rx,
        }
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Recorder engine starting");
        self.send_event(RecorderEvent::Ready);

        let command_rx = self.command_rx.clone();
        let fault_rx = self.fault_rx.clone();

        loop {
            crossbeam_channel::select! {
                recv(command_rx) -> command => match command {
                    Ok(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    Err(_) => {
                        info!("Command channel disconnected, shutting down");
                        self.shutdown_session();
                        break;
                    }
                },
                recv(fault_rx) -> notice => {
                    if let Ok(notice) = notice {
                        self.handle_fault(notice);
                    }
                },
                default(STATS_INTERVAL) => {
                    if self.state.read().is_recording() {
                        self.emit_stats();
                    }
                },
            }
        }

        info!("Recorder engine stopped");
    }

    /// Handle a command. Returns false if the engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::Start {
                metrics,
                output,
                completion,
            } => self.start_session(metrics.as_ref(), output.as_ref(), completion),
            EngineCommand::PermissionResult(result) => self.on_permission_result(result),
            EngineCommand::Stop { reply } => {
                let result = self.stop_session();
                if reply.send(result).is_err() {
                    warn!("Stop caller went away before the reply");
                }
            }
            EngineCommand::Shutdown => {
                self.shutdown_session();
                self.send_event(RecorderEvent::Shutdown);
                return false;
            }
        }

        true
    }

    #[instrument(name = "start_recording", skip_all)]
    fn start_session(
        &mut self,
        metrics: &dyn DisplayMetricsProvider,
        output: &dyn OutputPathProvider,
        completion: oneshot::Sender<RecordingResult<bool>>,
    ) {
        if self.host.is_finishing() {
            warn!("Host is finishing, recording not started");
            if completion.send(Err(RecordingError::AlreadyFinishing)).is_err() {
                debug!("Start completion receiver dropped");
            }
            return;
        }

        if self.session.is_some() {
            info!("Replacing the active session");
            if let Err(e) = self.end_session(StopReason::Replaced) {
                debug!("Previous session ended: {}", e);
            }
        }

        self.last_session_id += 1;
        let session_id = self.last_session_id;

        let (metrics, target, output_path) = match self.prepare_session(metrics, output) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.fail(session_id, &e);
                if completion.send(Err(e)).is_err() {
                    debug!("Start completion receiver dropped");
                }
                return;
            }
        };

        info!(
            session_id,
            width = target.width,
            height = target.height,
            scale = target.scale,
            bitrate = target.bitrate,
            "Requesting capture consent"
        );

        self.session = Some(RecordingSession::new(
            session_id,
            output_path,
            target,
            metrics,
            self.config.frame_interval(),
            self.config.declared_frame_rate,
            self.config.keyframe_interval_secs,
            completion,
        ));
        self.transition_to(RecorderState::AwaitingPermission { session_id });

        match self.gate.request_capture(ConsentTicket::new(session_id)) {
            ConsentRequest::Granted(token) => self.begin_recording(token),
            ConsentRequest::Denied => self.deny(true),
            ConsentRequest::Pending => debug!(session_id, "Waiting for consent"),
        }
    }

    /// Snapshot the display, pick the target and claim the output path.
    fn prepare_session(
        &mut self,
        metrics: &dyn DisplayMetricsProvider,
        output: &dyn OutputPathProvider,
    ) -> RecordingResult<(DisplayMetrics, ScaledOutput, PathBuf)> {
        let metrics = metrics.display_metrics()?;
        let target = scale_for(&metrics, self.config.bitrate);

        let settings = snaply_encoder::EncoderSettings {
            width: target.width,
            height: target.height,
            bitrate: target.bitrate,
            frame_rate: self.config.declared_frame_rate,
            keyframe_interval_secs: self.config.keyframe_interval_secs,
        };
        self.backend.validate(&settings)?;

        let output_path = output.output_path()?;
        remove_file_if_exists(&output_path)?;
        Ok((metrics, target, output_path))
    }

    fn on_permission_result(&mut self, result: ConsentResult) {
        let generation = result.ticket.generation();
        let current = self.session.as_ref().map(|s| s.id);
        if current != Some(generation) || !self.state.read().is_awaiting_permission() {
            debug!(generation, ?current, "Ignoring stale consent result");
            return;
        }

        match result.token {
            Some(token) => self.begin_recording(token),
            None => self.deny(false),
        }
    }

    fn deny(&mut self, immediate: bool) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        info!(session_id = session.id, "Capture consent denied");

        let err = RecordingError::PermissionDenied;
        self.send_event(RecorderEvent::RecordingFailed {
            session_id: session.id,
            code: err.code(),
            message: err.to_string(),
        });
        if immediate {
            self.transition_to(RecorderState::Failed {
                code: err.code(),
                message: err.to_string(),
            });
        } else {
            self.transition_to(RecorderState::Idle);
        }
        session.complete(Err(err));
    }

    fn begin_recording(&mut self, token: ConsentToken) {
        let Some(mut session) = self.session.take() else {
            debug!("Consent granted without a session");
            return;
        };
        if token.generation() != session.id {
            warn!(
                token = token.generation(),
                session = session.id,
                "Ignoring consent token of another session"
            );
            self.session = Some(session);
            return;
        }

        let session_id = session.id;
        self.transition_to(RecorderState::Starting { session_id });

        match self.launch(&session, token) {
            Ok(scheduler) => {
                session.attach_scheduler(scheduler);
                let output_path = session.output_path.display().to_string();
                self.transition_to(RecorderState::Recording {
                    session_id,
                    output_path: output_path.clone(),
                });
                self.send_event(RecorderEvent::RecordingStarted {
                    session_id,
                    output_path,
                    width: session.target.width,
                    height: session.target.height,
                });
                session.complete(Ok(true));
                self.session = Some(session);
                info!(session_id, "Recording started");
            }
            Err(e) => {
                discard_output(session.output_path());
                self.fail(session_id, &e);
                session.complete(Err(e));
            }
        }
    }

    /// Bind the capture source, configure the pipeline and start the
    /// scheduler. Everything acquired is released again on failure.
    fn launch(
        &mut self,
        session: &RecordingSession,
        token: ConsentToken,
    ) -> RecordingResult<FrameScheduler> {
        let mut source = self.gate.bind_token(token, session.bind_request())?;
        debug!(kind = source.kind(), "Capture source bound");

        let mut pipeline = EncoderPipeline::new(
            session.encoder_settings(),
            session.output_path.clone(),
            self.config.eos_timeout(),
        );
        if let Err(e) = pipeline.configure(self.backend.as_mut()) {
            release_source(&mut source);
            return Err(e.into());
        }

        let config = SchedulerConfig {
            frame_interval: session.frame_interval,
            max_consecutive_failures: self.config.max_consecutive_failures.max(1),
            mirror_capacity: self.config.mirror_channel_capacity,
        };

        FrameScheduler::spawn(
            session.id,
            pipeline,
            source,
            config,
            Arc::clone(&session.stats),
            self.fault_tx.clone(),
        )
        .map_err(|failure| {
            if let Some((pipeline, mut source)) = failure.parts {
                pipeline.finalize();
                release_source(&mut source);
            }
            failure.error
        })
    }

    #[instrument(name = "stop_recording", skip(self))]
    fn stop_session(&mut self) -> RecordingResult<PathBuf> {
        if self.state.read().is_awaiting_permission() {
            // Any later consent answer no longer matches a session
            return self.end_session(StopReason::UserRequested);
        }
        if !self.state.read().is_recording() {
            debug!("No active recording to stop");
            return Err(RecordingError::NoActiveSession);
        }
        self.end_session(StopReason::UserRequested)
    }

    /// End the current session without a fault.
    fn end_session(&mut self, reason: StopReason) -> RecordingResult<PathBuf> {
        let Some(mut session) = self.session.take() else {
            return Err(RecordingError::NoActiveSession);
        };
        let session_id = session.id;

        if !self.state.read().is_recording() {
            // Never got past consent: nothing was created.
            info!(session_id, ?reason, "Abandoning session before recording");
            session.complete(Err(RecordingError::InvalidState(reason.message())));
            self.transition_to(RecorderState::Idle);
            return Err(RecordingError::NoActiveSession);
        }

        info!(session_id, ?reason, "Stopping recording");
        self.transition_to(RecorderState::Stopping {
            session_id,
            reason,
        });

        let report = teardown(&mut session);
        let stats = session.stats.snapshot();
        if let Some(report) = &report {
            if !report.is_clean() {
                warn!(failures = ?report.release_failures, "Release finished with failures");
            }
        }

        let output_path = session.output_path.display().to_string();
        self.send_event(RecorderEvent::RecordingFinished {
            session_id,
            output_path,
            stats,
        });
        self.transition_to(RecorderState::Idle);
        info!(session_id, frames = session.frame_count(), "Recording stopped");

        Ok(session.output_path)
    }

    fn handle_fault(&mut self, notice: FaultNotice) {
        let current = self.session.as_ref().map(|s| s.id);
        if current != Some(notice.session_id) || !self.state.read().is_recording() {
            debug!(session_id = notice.session_id, "Ignoring fault of a finished session");
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };

        let (reason, err) = match notice.fault {
            SchedulerFault::CaptureFailed(message) => (
                StopReason::CaptureFailed {
                    message: message.clone(),
                },
                RecordingError::Capture(message),
            ),
            SchedulerFault::PermissionRevoked => {
                (StopReason::PermissionRevoked, RecordingError::PermissionRevoked)
            }
            SchedulerFault::ContainerFailed(message) => (
                StopReason::ContainerFailed {
                    message: message.clone(),
                },
                RecordingError::Container(message),
            ),
            SchedulerFault::EncoderFailed(message) => (
                StopReason::EncoderFailed {
                    message: message.clone(),
                },
                RecordingError::Resource(message),
            ),
        };

        self.transition_to(RecorderState::Stopping {
            session_id: session.id,
            reason,
        });

        let report = teardown(&mut session);
        if !report.as_ref().is_some_and(FinalizeReport::has_samples) {
            discard_output(session.output_path());
        }
        self.fail(session.id, &err);
    }

    fn shutdown_session(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.end_session(StopReason::Shutdown) {
                debug!("Session ended on shutdown: {}", e);
            }
        }
    }

    fn fail(&self, session_id: u64, err: &RecordingError) {
        error!(session_id, code = %err.code(), "Recording failed: {}", err);
        self.send_event(RecorderEvent::RecordingFailed {
            session_id,
            code: err.code(),
            message: err.to_string(),
        });
        self.transition_to(RecorderState::Failed {
            code: err.code(),
            message: err.to_string(),
        });
    }

    fn emit_stats(&self) {
        if let Some(session) = &self.session {
            self.send_event(RecorderEvent::Stats(session.stats.snapshot()));
        }
    }

    fn transition_to(&self, new_state: RecorderState) {
        let previous = {
            let mut state = self.state.write();
            let prev = state.clone();
            *state = new_state.clone();
            prev
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(RecorderEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: RecorderEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_session();
    }
}

/// Stop the scheduler, drain to end of stream, finalize the pipeline and
/// release the capture source, in that order.
fn teardown(session: &mut RecordingSession) -> Option<FinalizeReport> {
    let scheduler = session.take_scheduler()?;
    let SchedulerExit {
        mut pipeline,
        mut source,
        fault,
    } = match scheduler.stop() {
        Ok(exit) => exit,
        Err(e) => {
            error!("Scheduler stop failed: {}", e);
            return None;
        }
    };
    if let Some(fault) = fault {
        debug!(?fault, "Scheduler exited with a fault");
    }

    if pipeline.state() != PipelineState::Failed {
        match pipeline.drain(true) {
            Ok(drain) if !drain.end_of_stream => warn!("End of stream not reached before finalize"),
            Ok(_) => {}
            Err(e) => warn!("End-of-stream drain failed: {}", e),
        }
    }

    let report = pipeline.finalize();
    release_source(&mut source);
    session
        .stats
        .update_pipeline(report.samples_written, report.write_failures);
    Some(report)
}

fn release_source(source: &mut CaptureSource) {
    if let Err(e) = source.release() {
        warn!(kind = source.kind(), "Capture source release failed: {}", e);
    }
}

fn discard_output(path: &Path) {
    match remove_file_if_exists(path) {
        Ok(true) => info!(path = %path.display(), "Removed recording without samples"),
        Ok(false) => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove output file: {}", e),
    }
}
