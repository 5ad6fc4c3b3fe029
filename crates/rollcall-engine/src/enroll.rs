//! Enrollment capture runner.
//!
//! Opens a backend enrollment job, submits one frame per tick until the
//! backend reports the quota, then finalizes exactly once. Resource effects
//! returned by each state transition (start/stop polling, release camera)
//! are applied here; a tick reaching the quota stops its own loop.

use crate::error::EngineError;
use crate::media::{self, SharedCamera};
use crate::scheduler::{self, PollHandle, PollStats, TickControl, TickGuard, ENROLL_INTERVAL};
use rollcall_client::{AttendanceBackend, ClientError, FrameSubmission};
use rollcall_core::enrollment::{Effect, Transition};
use rollcall_core::{EnrollmentPhase, EnrollmentSession, FaceBox, ProgressUpdate, TransitionError};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Frames requested when the caller does not say otherwise.
pub const DEFAULT_NUM_IMAGES: u32 = 20;

#[derive(Debug, Clone)]
pub struct EnrollmentOptions {
    pub num_images: u32,
    pub interval: Duration,
}

impl Default for EnrollmentOptions {
    fn default() -> Self {
        Self {
            num_images: DEFAULT_NUM_IMAGES,
            interval: ENROLL_INTERVAL,
        }
    }
}

/// Observable enrollment state, published after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentSnapshot {
    pub phase: EnrollmentPhase,
    pub current: u32,
    pub target: u32,
    pub fraction: f32,
    pub last_box: Option<FaceBox>,
    pub error: Option<String>,
}

impl EnrollmentSnapshot {
    fn of(session: &EnrollmentSession) -> Self {
        Self {
            phase: session.phase(),
            current: session.current_count(),
            target: session.target_count(),
            fraction: session.fraction(),
            last_box: session.last_box(),
            error: session.error().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub phase: EnrollmentPhase,
    pub session_id: Option<String>,
    pub captured: u32,
    pub target: u32,
    pub stats: PollStats,
}

type SharedState = Arc<Mutex<EnrollmentSession>>;
type Snapshots = Arc<watch::Sender<EnrollmentSnapshot>>;
type FatalSlot = Arc<Mutex<Option<EngineError>>>;

fn lock(state: &SharedState) -> MutexGuard<'_, EnrollmentSession> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn set_fatal(slot: &FatalSlot, error: EngineError) {
    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_none() {
        *slot = Some(error);
    }
}

fn publish(snapshots: &Snapshots, session: &EnrollmentSession) {
    snapshots.send_replace(EnrollmentSnapshot::of(session));
}

pub struct EnrollmentRunner {
    backend: Arc<dyn AttendanceBackend>,
    camera: SharedCamera,
    options: EnrollmentOptions,
    state: SharedState,
    snapshots: Snapshots,
    fatal: FatalSlot,
}

impl EnrollmentRunner {
    pub fn new(backend: Arc<dyn AttendanceBackend>, camera: SharedCamera, options: EnrollmentOptions) -> Self {
        let session = EnrollmentSession::new(options.num_images);
        let (tx, _) = watch::channel(EnrollmentSnapshot::of(&session));
        Self {
            backend,
            camera,
            options,
            state: Arc::new(Mutex::new(session)),
            snapshots: Arc::new(tx),
            fatal: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<EnrollmentSnapshot> {
        self.snapshots.subscribe()
    }

    /// Run the capture session to a terminal phase.
    ///
    /// Cancelling `abort` while idle or capturing ends in `aborted`. The
    /// camera is released and the poll loop stopped on every exit path.
    pub async fn run(self, abort: CancellationToken) -> Result<EnrollmentReport, EngineError> {
        let span = tracing::info_span!("enrollment", run_id = %Uuid::new_v4());
        async move {
            let mut poll = None;
            let result = self.drive(&mut poll, &abort).await;

            if let Some(handle) = poll.as_mut() {
                handle.stop();
            }
            self.camera.release();
            let stats = match poll.as_mut() {
                Some(handle) => handle.join().await,
                None => PollStats::default(),
            };

            let report = {
                let session = lock(&self.state);
                publish(&self.snapshots, &session);
                EnrollmentReport {
                    phase: session.phase(),
                    session_id: session.session_token().map(str::to_string),
                    captured: session.current_count(),
                    target: session.target_count(),
                    stats,
                }
            };
            tracing::info!(
                phase = ?report.phase,
                captured = report.captured,
                target = report.target,
                skipped = stats.skipped,
                "enrollment finished"
            );
            result.map(|_| report)
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, poll: &mut Option<PollHandle>, abort: &CancellationToken) -> Result<(), EngineError> {
        let started = tokio::select! {
            biased;
            _ = abort.cancelled() => None,
            r = self.backend.start_enrollment(self.options.num_images) => Some(r),
        };
        let ticket = match started {
            None => return self.abort(poll),
            Some(Ok(ticket)) => ticket,
            Some(Err(e)) => {
                self.fail(e.to_string(), poll);
                return Err(e.into());
            }
        };

        let begun = self.update(|s| s.begin(ticket.session_id.clone(), ticket.num_images));
        match begun {
            Ok(t) => self.apply(&t, poll),
            Err(e) => {
                self.fail(e.to_string(), poll);
                return Err(e.into());
            }
        }

        let Some(handle) = poll.as_mut() else {
            return Ok(());
        };
        let loop_ended = tokio::select! {
            biased;
            _ = abort.cancelled() => false,
            _ = handle.join() => true,
        };
        if !loop_ended && self.abort(poll).is_ok() {
            return Ok(());
        }

        let (phase, error) = {
            let s = lock(&self.state);
            (s.phase(), s.error().map(str::to_string))
        };
        match phase {
            EnrollmentPhase::Completing => self.finalize(poll).await,
            EnrollmentPhase::Errored => Err(self
                .take_fatal()
                .unwrap_or_else(|| EngineError::CaptureLost(error.unwrap_or_default()))),
            EnrollmentPhase::Capturing => {
                let reason = "capture loop ended before the quota was reached";
                self.fail(reason.to_string(), poll);
                Err(EngineError::CaptureLost(reason.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn finalize(&self, poll: &mut Option<PollHandle>) -> Result<(), EngineError> {
        let token = lock(&self.state).session_token().map(str::to_string);
        let Some(token) = token else {
            return Err(EngineError::Finalize("no enrollment job".to_string()));
        };
        tracing::info!(session_id = %token, "quota reached; finalizing");

        match self.backend.finalize_enrollment(&token).await {
            Ok(outcome) if outcome.success => {
                let t = self.update(|s| s.finalize_succeeded())?;
                self.apply(&t, poll);
                Ok(())
            }
            Ok(outcome) => {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "backend declined to build the face template".to_string());
                let t = self.update(|s| s.finalize_failed(reason.clone()))?;
                self.apply(&t, poll);
                Err(EngineError::Finalize(reason))
            }
            Err(e) => {
                let t = self.update(|s| s.finalize_failed(e.to_string()))?;
                self.apply(&t, poll);
                Err(e.into())
            }
        }
    }

    fn abort(&self, poll: &mut Option<PollHandle>) -> Result<(), EngineError> {
        let t = self.update(|s| s.abort())?;
        tracing::info!("enrollment aborted");
        self.apply(&t, poll);
        Ok(())
    }

    fn fail(&self, reason: String, poll: &mut Option<PollHandle>) {
        tracing::error!(%reason, "enrollment failed");
        if let Ok(t) = self.update(|s| s.fail(reason)) {
            self.apply(&t, poll);
        }
    }

    fn take_fatal(&self) -> Option<EngineError> {
        self.fatal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut EnrollmentSession) -> Result<T, TransitionError>,
    ) -> Result<T, TransitionError> {
        let mut session = lock(&self.state);
        let out = f(&mut session);
        publish(&self.snapshots, &session);
        out
    }

    fn apply(&self, transition: &Transition, poll: &mut Option<PollHandle>) {
        for effect in transition.effects {
            match effect {
                Effect::StartPolling => {
                    if poll.is_none() {
                        *poll = Some(self.start_polling());
                    }
                }
                Effect::StopPolling => {
                    if let Some(handle) = poll.as_mut() {
                        handle.stop();
                    }
                }
                Effect::ReleaseCamera => self.camera.release(),
                // Awaited by `drive` once the loop has drained.
                Effect::Finalize => {}
            }
        }
    }

    fn start_polling(&self) -> PollHandle {
        let token = lock(&self.state).session_token().unwrap_or_default().to_string();
        let backend = Arc::clone(&self.backend);
        let camera = self.camera.clone();
        let state = Arc::clone(&self.state);
        let snapshots = Arc::clone(&self.snapshots);
        let fatal = Arc::clone(&self.fatal);
        let span = tracing::Span::current();

        scheduler::start(self.options.interval, move |guard| {
            enrollment_tick(
                guard,
                Arc::clone(&backend),
                camera.clone(),
                Arc::clone(&state),
                Arc::clone(&snapshots),
                Arc::clone(&fatal),
                token.clone(),
            )
            .instrument(span.clone())
        })
    }
}

async fn enrollment_tick(
    guard: TickGuard,
    backend: Arc<dyn AttendanceBackend>,
    camera: SharedCamera,
    state: SharedState,
    snapshots: Snapshots,
    fatal: FatalSlot,
    token: String,
) -> TickControl {
    let sample = match camera.capture().await {
        Ok(Some(sample)) => sample,
        Ok(None) => {
            tracing::debug!(tick = guard.sequence(), "camera not ready; no frame this tick");
            return TickControl::Continue;
        }
        Err(e) if media::is_fatal(&e) => return fail_from_tick(&guard, &state, &snapshots, e.to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "frame capture failed");
            return TickControl::Continue;
        }
    };

    let submission = match backend.submit_enrollment_frame(&token, &sample.payload).await {
        Ok(submission) => submission,
        Err(ClientError::Unauthorized) => {
            if guard.is_current() {
                set_fatal(&fatal, ClientError::Unauthorized.into());
            }
            return fail_from_tick(&guard, &state, &snapshots, ClientError::Unauthorized.to_string());
        }
        Err(e) => {
            tracing::warn!(error = %e, "frame submission failed; next tick retries");
            return TickControl::Continue;
        }
    };

    if !guard.is_current() {
        tracing::debug!(tick = guard.sequence(), "discarding late submission");
        return TickControl::Continue;
    }
    record_submission(&state, &snapshots, &submission)
}

fn record_submission(state: &SharedState, snapshots: &Snapshots, submission: &FrameSubmission) -> TickControl {
    let mut session = lock(state);
    let update = if submission.success {
        session.record_progress(submission.progress, submission.total, submission.bbox)
    } else {
        session.record_miss()
    };
    publish(snapshots, &session);

    match update {
        Ok(ProgressUpdate::Advanced { current, target }) => {
            tracing::debug!(current, target, "frame accepted");
            TickControl::Continue
        }
        Ok(ProgressUpdate::NoFace) => {
            tracing::debug!(reason = ?submission.error, "no usable face in frame");
            TickControl::Continue
        }
        Ok(ProgressUpdate::QuotaReached(_)) => TickControl::Stop,
        Err(e) => {
            tracing::debug!(error = %e, "submission ignored");
            TickControl::Stop
        }
    }
}

fn fail_from_tick(guard: &TickGuard, state: &SharedState, snapshots: &Snapshots, reason: String) -> TickControl {
    if guard.is_current() {
        let mut session = lock(state);
        if session.fail(reason.clone()).is_ok() {
            tracing::error!(%reason, "enrollment capture lost");
            publish(snapshots, &session);
        }
    }
    TickControl::Stop
}
