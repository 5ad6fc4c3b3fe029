//! Single-shot, geofenced marking for mobile sessions.
//!
//! The student picks a mobile session, the client fixes a position, and one
//! captured frame is verified with `lat`/`lng` attached. The backend decides
//! whether the position is inside the session's geofence.

use crate::context::SessionContext;
use crate::error::EngineError;
use crate::media::{SharedCamera, SETTLE_ATTEMPTS};
use rollcall_client::{AttendanceBackend, AttendanceSession, SessionMode};
use rollcall_core::{Liveness, VerificationResult};
use rollcall_hw::{GeoFix, LocationError, LocationProvider};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MobileOutcome {
    Marked { name: String },
    AlreadyMarked { name: String },
    /// Recognised but not marked (outside the geofence, liveness failure).
    Rejected { name: String, reason: String },
    NotRecognized { faces_detected: u32 },
}

impl From<&VerificationResult> for MobileOutcome {
    fn from(r: &VerificationResult) -> Self {
        if !r.matched {
            return MobileOutcome::NotRecognized {
                faces_detected: r.faces_detected,
            };
        }
        let name = r.display_name().to_string();
        if r.attendance_marked {
            MobileOutcome::Marked { name }
        } else if r.already_marked {
            MobileOutcome::AlreadyMarked { name }
        } else {
            let reason = match (&r.rejection, r.liveness) {
                (Some(reason), _) => reason.clone(),
                (None, Liveness::Fake) => "liveness check failed".to_string(),
                (None, _) => "attendance not marked".to_string(),
            };
            MobileOutcome::Rejected { name, reason }
        }
    }
}

/// Active sessions that accept mobile marking.
pub async fn list_mobile_sessions(backend: &dyn AttendanceBackend) -> Result<Vec<AttendanceSession>, EngineError> {
    let sessions = backend.list_active_sessions().await?;
    Ok(sessions
        .into_iter()
        .filter(|s| s.mode == SessionMode::Mobile)
        .collect())
}

pub struct MobileAttendance {
    backend: Arc<dyn AttendanceBackend>,
    camera: SharedCamera,
    location: Arc<dyn LocationProvider>,
    fix: Option<GeoFix>,
    session_id: String,
}

impl MobileAttendance {
    /// Prepare marking for `session_id`.
    ///
    /// A failed position fix is not fatal here; `mark` retries it.
    pub fn new(
        backend: Arc<dyn AttendanceBackend>,
        camera: SharedCamera,
        location: Arc<dyn LocationProvider>,
        session_id: impl Into<String>,
    ) -> Self {
        let fix = match location.current_position() {
            Ok(fix) => Some(fix),
            Err(e) => {
                tracing::warn!(error = %e, "no position fix yet");
                None
            }
        };
        Self {
            backend,
            camera,
            location,
            fix,
            session_id: session_id.into(),
        }
    }

    pub fn location(&self) -> Option<GeoFix> {
        self.fix
    }

    pub fn refresh_location(&mut self) -> Result<GeoFix, LocationError> {
        let fix = self.location.current_position()?;
        tracing::debug!(lat = fix.lat, lng = fix.lng, "position fixed");
        self.fix = Some(fix);
        Ok(fix)
    }

    /// Capture one frame and ask the backend to mark it.
    ///
    /// Refuses to send a request without a position.
    pub async fn mark(&mut self) -> Result<MobileOutcome, EngineError> {
        let fix = match self.fix {
            Some(fix) => fix,
            None => self.refresh_location()?,
        };
        let sample = self
            .camera
            .capture_settled(SETTLE_ATTEMPTS)
            .await?
            .ok_or(EngineError::NoFrame)?;

        let request = SessionContext::new(self.session_id.clone())
            .with_location(fix)
            .verify_request(&sample);
        let result = self.backend.verify_frame(&request).await?;
        let outcome = MobileOutcome::from(&result);
        tracing::info!(session_id = %self.session_id, ?outcome, "mobile attendance attempt");
        Ok(outcome)
    }
}

impl Drop for MobileAttendance {
    fn drop(&mut self) {
        self.camera.release();
    }
}
