//! Enrollment capture session state machine.
//!
//! ```text
//! idle ──begin──▶ capturing ──quota──▶ completing ──ok──▶ done
//!   │                 │                     └──err──▶ errored
//!   └──abort──▶ aborted ◀──abort──┘
//! ```
//!
//! Progress is mirrored from the backend job; the client never counts frames
//! on its own. Every transition returns the resources it tears down or starts
//! so the runner can apply them in order.

use crate::types::FaceBox;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentPhase {
    Idle,
    Capturing,
    Completing,
    Done,
    Aborted,
    Errored,
}

impl EnrollmentPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EnrollmentPhase::Done | EnrollmentPhase::Aborted | EnrollmentPhase::Errored
        )
    }
}

/// Resource action a transition requires of the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartPolling,
    StopPolling,
    Finalize,
    ReleaseCamera,
}

/// A completed transition and the effects it requires, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: EnrollmentPhase,
    pub to: EnrollmentPhase,
    pub effects: &'static [Effect],
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} while {phase:?}")]
    Invalid {
        action: &'static str,
        phase: EnrollmentPhase,
    },
    #[error("backend reported an invalid quota: {0}")]
    InvalidQuota(u32),
}

/// Outcome of mirroring one frame submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// Still capturing; progress mirrored.
    Advanced { current: u32, target: u32 },
    /// Backend reported no usable face; nothing changed.
    NoFace,
    /// Quota reached: the session moved to `completing`.
    QuotaReached(Transition),
}

const BEGIN: &[Effect] = &[Effect::StartPolling];
const QUOTA: &[Effect] = &[Effect::StopPolling, Effect::Finalize];
const FINISH: &[Effect] = &[Effect::ReleaseCamera];
const ABORT: &[Effect] = &[Effect::StopPolling, Effect::ReleaseCamera];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentSession {
    session_token: Option<String>,
    target_count: u32,
    current_count: u32,
    phase: EnrollmentPhase,
    last_box: Option<FaceBox>,
    error: Option<String>,
}

impl EnrollmentSession {
    /// A session that will request `target_count` frames once started.
    pub fn new(target_count: u32) -> Self {
        Self {
            session_token: None,
            target_count,
            current_count: 0,
            phase: EnrollmentPhase::Idle,
            last_box: None,
            error: None,
        }
    }

    pub fn phase(&self) -> EnrollmentPhase {
        self.phase
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn current_count(&self) -> u32 {
        self.current_count
    }

    pub fn target_count(&self) -> u32 {
        self.target_count
    }

    pub fn last_box(&self) -> Option<FaceBox> {
        self.last_box
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Fraction of the quota captured, in [0, 1].
    pub fn fraction(&self) -> f32 {
        if self.target_count == 0 {
            return 0.0;
        }
        self.current_count as f32 / self.target_count as f32
    }

    fn transition(&mut self, to: EnrollmentPhase, effects: &'static [Effect]) -> Transition {
        let from = self.phase;
        self.phase = to;
        tracing::info!(?from, ?to, token = ?self.session_token, "enrollment transition");
        Transition { from, to, effects }
    }

    /// `idle → capturing` once the backend has opened a job.
    ///
    /// The backend's quota replaces the requested one.
    pub fn begin(&mut self, token: String, target_count: u32) -> Result<Transition, TransitionError> {
        if self.phase != EnrollmentPhase::Idle {
            return Err(TransitionError::Invalid {
                action: "begin",
                phase: self.phase,
            });
        }
        if target_count == 0 {
            return Err(TransitionError::InvalidQuota(target_count));
        }
        self.session_token = Some(token);
        self.target_count = target_count;
        self.current_count = 0;
        Ok(self.transition(EnrollmentPhase::Capturing, BEGIN))
    }

    /// Mirror the backend's cumulative progress for one submitted frame.
    ///
    /// `capturing → completing` fires exactly once, on the first report with
    /// `progress >= total`. Reports arriving after that are rejected.
    pub fn record_progress(
        &mut self,
        progress: u32,
        total: u32,
        bbox: Option<FaceBox>,
    ) -> Result<ProgressUpdate, TransitionError> {
        if self.phase != EnrollmentPhase::Capturing {
            return Err(TransitionError::Invalid {
                action: "record progress",
                phase: self.phase,
            });
        }
        if total > 0 && total != self.target_count {
            tracing::debug!(old = self.target_count, new = total, "backend revised quota");
            self.target_count = total;
        }
        if progress < self.current_count {
            tracing::warn!(
                previous = self.current_count,
                reported = progress,
                "backend progress went backwards; mirroring it"
            );
        }
        self.current_count = progress.min(self.target_count);
        self.last_box = bbox;

        if progress >= self.target_count {
            Ok(ProgressUpdate::QuotaReached(
                self.transition(EnrollmentPhase::Completing, QUOTA),
            ))
        } else {
            Ok(ProgressUpdate::Advanced {
                current: self.current_count,
                target: self.target_count,
            })
        }
    }

    /// The backend saw no usable face in the last frame.
    pub fn record_miss(&mut self) -> Result<ProgressUpdate, TransitionError> {
        if self.phase != EnrollmentPhase::Capturing {
            return Err(TransitionError::Invalid {
                action: "record miss",
                phase: self.phase,
            });
        }
        self.last_box = None;
        Ok(ProgressUpdate::NoFace)
    }

    /// `completing → done`.
    pub fn finalize_succeeded(&mut self) -> Result<Transition, TransitionError> {
        if self.phase != EnrollmentPhase::Completing {
            return Err(TransitionError::Invalid {
                action: "finish",
                phase: self.phase,
            });
        }
        Ok(self.transition(EnrollmentPhase::Done, FINISH))
    }

    /// `completing → errored`. Captured frames are a sunk cost; no retry.
    pub fn finalize_failed(&mut self, reason: impl Into<String>) -> Result<Transition, TransitionError> {
        if self.phase != EnrollmentPhase::Completing {
            return Err(TransitionError::Invalid {
                action: "fail finalize",
                phase: self.phase,
            });
        }
        self.error = Some(reason.into());
        Ok(self.transition(EnrollmentPhase::Errored, FINISH))
    }

    /// User cancel from `idle` or `capturing`.
    pub fn abort(&mut self) -> Result<Transition, TransitionError> {
        match self.phase {
            EnrollmentPhase::Idle | EnrollmentPhase::Capturing => {
                Ok(self.transition(EnrollmentPhase::Aborted, ABORT))
            }
            phase => Err(TransitionError::Invalid {
                action: "abort",
                phase,
            }),
        }
    }

    /// Session-fatal failure from any non-terminal phase.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<Transition, TransitionError> {
        if self.phase.is_terminal() {
            return Err(TransitionError::Invalid {
                action: "fail",
                phase: self.phase,
            });
        }
        self.error = Some(reason.into());
        Ok(self.transition(EnrollmentPhase::Errored, ABORT))
    }
}
