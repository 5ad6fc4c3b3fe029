//! Live verification runner for camera-mode sessions.
//!
//! One verify request per tick, never more than one in flight. Results feed
//! [`LiveVerificationState`]; the runner also refreshes the HUD and overlay
//! between polls so display windows lapse on time.

use crate::context::SessionContext;
use crate::error::EngineError;
use crate::media::{self, SharedCamera};
use crate::scheduler::{self, PollHandle, PollStats, TickControl, TickGuard, VERIFY_INTERVAL};
use chrono::Utc;
use rollcall_client::{AttendanceBackend, ClientError, SessionMode};
use rollcall_core::{HudStatus, LiveSettings, LiveVerificationState, OverlayStatus, RecentMatch};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Cadence of time-based HUD and overlay updates between polls.
const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub interval: Duration,
    pub settings: LiveSettings,
    /// End the session on the backend when the runner stops cleanly.
    pub end_on_stop: bool,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            interval: VERIFY_INTERVAL,
            settings: LiveSettings::default(),
            end_on_stop: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlaySnapshot {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: String,
    pub status: OverlayStatus,
}

/// Observable live state, published whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub session_id: String,
    pub present_count: u32,
    pub total_students: u32,
    pub hud: HudStatus,
    pub last_matched: Option<String>,
    pub recent: Vec<RecentMatch>,
    pub overlay: Option<OverlaySnapshot>,
}

impl LiveSnapshot {
    fn of(session_id: &str, state: &LiveVerificationState) -> Self {
        Self {
            session_id: session_id.to_string(),
            present_count: state.present_count(),
            total_students: state.total_students(),
            hud: state.hud(),
            last_matched: state.last_matched().map(str::to_string),
            recent: state.recent().cloned().collect(),
            overlay: state.overlay().map(|o| OverlaySnapshot {
                x: o.x,
                y: o.y,
                width: o.width,
                height: o.height,
                label: o.label.clone(),
                status: o.status,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveReport {
    pub present_count: u32,
    /// Marks made by this runner.
    pub marked: u32,
    pub stats: PollStats,
    pub ended: bool,
}

#[derive(Clone)]
struct Shared {
    context: Arc<SessionContext>,
    state: Arc<Mutex<LiveVerificationState>>,
    snapshots: Arc<watch::Sender<LiveSnapshot>>,
    fatal: Arc<Mutex<Option<EngineError>>>,
    marked: Arc<AtomicU32>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LiveVerificationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &LiveVerificationState) {
        let next = LiveSnapshot::of(&self.context.session_id, state);
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn set_fatal(&self, error: EngineError) {
        let mut slot = self.fatal.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            tracing::error!(error = %error, "live verification cannot continue");
            *slot = Some(error);
        }
    }

    fn take_fatal(&self) -> Option<EngineError> {
        self.fatal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

pub struct LiveRunner {
    backend: Arc<dyn AttendanceBackend>,
    camera: SharedCamera,
    options: LiveOptions,
    shared: Shared,
}

impl LiveRunner {
    pub fn new(
        backend: Arc<dyn AttendanceBackend>,
        camera: SharedCamera,
        context: SessionContext,
        options: LiveOptions,
    ) -> Self {
        let state = LiveVerificationState::new(options.settings.clone());
        let (tx, _) = watch::channel(LiveSnapshot::of(&context.session_id, &state));
        Self {
            backend,
            camera,
            options,
            shared: Shared {
                context: Arc::new(context),
                state: Arc::new(Mutex::new(state)),
                snapshots: Arc::new(tx),
                fatal: Arc::new(Mutex::new(None)),
                marked: Arc::new(AtomicU32::new(0)),
            },
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Verify until `stop` is cancelled or the session becomes unusable.
    ///
    /// The poll loop is stopped and the camera released on every exit path.
    pub async fn run(self, stop: CancellationToken) -> Result<LiveReport, EngineError> {
        let span = tracing::info_span!("live", session_id = %self.shared.context.session_id);
        async move {
            let mut poll = None;
            let result = self.drive(&mut poll, &stop).await;

            if let Some(handle) = poll.as_mut() {
                handle.stop();
            }
            self.camera.release();
            let stats = match poll.as_mut() {
                Some(handle) => handle.join().await,
                None => PollStats::default(),
            };
            result?;

            let mut ended = false;
            if self.options.end_on_stop {
                self.backend.end_session(&self.shared.context.session_id).await?;
                ended = true;
            }

            let report = LiveReport {
                present_count: self.shared.state().present_count(),
                marked: self.shared.marked.load(Ordering::Relaxed),
                stats,
                ended,
            };
            tracing::info!(
                present = report.present_count,
                marked = report.marked,
                ticks = stats.started,
                skipped = stats.skipped,
                "live verification stopped"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, poll: &mut Option<PollHandle>, stop: &CancellationToken) -> Result<(), EngineError> {
        let session_id = self.shared.context.session_id.clone();
        let session = tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            r = self.backend.get_session(&session_id) => r?,
        };
        if session.mode == SessionMode::Mobile {
            return Err(EngineError::MobileSession(session_id));
        }
        {
            let mut state = self.shared.state();
            state.seed(session.present_count, session.total_students);
            self.shared.publish(&state);
        }
        tracing::info!(
            subject = ?session.subject,
            present = session.present_count,
            total = session.total_students,
            "live verification started"
        );

        let handle = poll.insert(self.start_polling());
        let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return Ok(()),
                _ = handle.join() => {
                    return Err(self
                        .shared
                        .take_fatal()
                        .unwrap_or_else(|| EngineError::CaptureLost("poll loop ended".to_string())));
                }
                _ = refresh.tick() => {
                    let mut state = self.shared.state();
                    state.refresh(scheduler::now());
                    self.shared.publish(&state);
                }
            }
        }
    }

    fn start_polling(&self) -> PollHandle {
        let backend = Arc::clone(&self.backend);
        let camera = self.camera.clone();
        let shared = self.shared.clone();
        let span = tracing::Span::current();

        scheduler::start(self.options.interval, move |guard| {
            live_tick(guard, Arc::clone(&backend), camera.clone(), shared.clone()).instrument(span.clone())
        })
    }
}

async fn live_tick(
    guard: TickGuard,
    backend: Arc<dyn AttendanceBackend>,
    camera: SharedCamera,
    shared: Shared,
) -> TickControl {
    {
        let mut state = shared.state();
        if !state.begin_tick() {
            return TickControl::Continue;
        }
        shared.publish(&state);
    }

    let sample = match camera.capture().await {
        Ok(Some(sample)) => sample,
        Ok(None) => {
            let mut state = shared.state();
            state.tick_skipped();
            shared.publish(&state);
            return TickControl::Continue;
        }
        Err(e) if media::is_fatal(&e) => {
            if guard.is_current() {
                shared.set_fatal(e.into());
            }
            return TickControl::Stop;
        }
        Err(e) => {
            tracing::warn!(error = %e, "frame capture failed");
            let mut state = shared.state();
            state.tick_failed(scheduler::now());
            shared.publish(&state);
            return TickControl::Continue;
        }
    };

    let request = shared.context.verify_request(&sample);
    let result = backend.verify_frame(&request).await;

    if !guard.is_current() {
        tracing::debug!(tick = guard.sequence(), "discarding late verification");
        return TickControl::Continue;
    }

    match result {
        Ok(result) => {
            if let Some(reason) = &result.rejection {
                tracing::info!(name = result.display_name(), %reason, "match rejected by backend");
            }
            let mut state = shared.state();
            let summary = state.apply(&result, sample.source_size(), scheduler::now(), Utc::now());
            shared.publish(&state);
            if summary.marked {
                shared.marked.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!(hud = ?summary.hud, overlay = ?summary.overlay, "tick applied");
            TickControl::Continue
        }
        Err(ClientError::Unauthorized) => {
            shared.set_fatal(ClientError::Unauthorized.into());
            TickControl::Stop
        }
        Err(e) => {
            tracing::warn!(error = %e, "verification request failed");
            let mut state = shared.state();
            state.tick_failed(scheduler::now());
            shared.publish(&state);
            TickControl::Continue
        }
    }
}
