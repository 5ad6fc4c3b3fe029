#![allow(dead_code)]

use async_trait::async_trait;
use rollcall_client::{
    AttendanceBackend, AttendanceSession, ClientError, EnrollmentTicket, FinalizeOutcome, FrameSubmission,
    SessionMode, VerifyRequest,
};
use rollcall_core::{FaceBox, Identity, Liveness, VerificationResult};
use rollcall_engine::SharedCamera;
use rollcall_hw::{CameraConstraints, FrameEncoder, SyntheticSource};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory attendance service with scripted answers.
pub struct ScriptedBackend {
    pub quota: u32,
    pub fail_start: bool,
    pub finalize_ok: bool,
    pub session: AttendanceSession,
    pub verify_delay: Duration,
    /// 1-based verify calls answered with a 503.
    pub fail_verify: Vec<usize>,
    /// 1-based frame uploads answered with a 503.
    pub fail_submit: Vec<u32>,
    /// Every frame upload is answered with a 401.
    pub reject_token: bool,
    pub script: Mutex<VecDeque<VerificationResult>>,
    pub requests: Mutex<Vec<VerifyRequest>>,
    pub submissions: AtomicU32,
    pub submit_calls: AtomicU32,
    pub finalizes: AtomicU32,
    pub ended: AtomicU32,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            quota: 20,
            fail_start: false,
            finalize_ok: true,
            session: AttendanceSession {
                id: "sess-1".into(),
                subject: Some("Physics".into()),
                class: Some("CS-A".into()),
                mode: SessionMode::Camera,
                present_count: 3,
                total_students: 40,
                status: Some("active".into()),
            },
            verify_delay: Duration::ZERO,
            fail_verify: Vec::new(),
            fail_submit: Vec::new(),
            reject_token: false,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            submissions: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            finalizes: AtomicU32::new(0),
            ended: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl ScriptedBackend {
    pub fn with_script(self, results: Vec<VerificationResult>) -> Self {
        *self.script.lock().unwrap() = results.into();
        self
    }

    pub fn requests(&self) -> Vec<VerifyRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttendanceBackend for ScriptedBackend {
    async fn start_enrollment(&self, num_images: u32) -> Result<EnrollmentTicket, ClientError> {
        if self.fail_start {
            return Err(ClientError::Status {
                status: 500,
                message: "database unavailable".into(),
            });
        }
        let _ = num_images;
        Ok(EnrollmentTicket {
            session_id: "enr-1".into(),
            num_images: self.quota,
        })
    }

    async fn submit_enrollment_frame(&self, session_id: &str, jpeg: &[u8]) -> Result<FrameSubmission, ClientError> {
        assert_eq!(session_id, "enr-1");
        assert!(jpeg.starts_with(&[0xff, 0xd8]), "payload is not a JPEG");
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject_token {
            return Err(ClientError::Unauthorized);
        }
        if self.fail_submit.contains(&call) {
            return Err(unavailable());
        }
        let progress = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FrameSubmission {
            success: true,
            progress,
            total: self.quota,
            bbox: Some(FaceBox::new(200.0, 120.0, 160.0, 200.0)),
            error: None,
        })
    }

    async fn finalize_enrollment(&self, _session_id: &str) -> Result<FinalizeOutcome, ClientError> {
        self.finalizes.fetch_add(1, Ordering::SeqCst);
        Ok(FinalizeOutcome {
            success: self.finalize_ok,
            error: (!self.finalize_ok).then(|| "not enough usable frames".to_string()),
        })
    }

    async fn verify_frame(&self, request: &VerifyRequest) -> Result<VerificationResult, ClientError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if !self.verify_delay.is_zero() {
            tokio::time::sleep(self.verify_delay).await;
        }
        if self.fail_verify.contains(&call) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(unavailable());
        }
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(VerificationResult::empty);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }

    async fn list_active_sessions(&self) -> Result<Vec<AttendanceSession>, ClientError> {
        let mut mobile = self.session.clone();
        mobile.id = "sess-m".into();
        mobile.mode = SessionMode::Mobile;
        Ok(vec![self.session.clone(), mobile])
    }

    async fn get_session(&self, id: &str) -> Result<AttendanceSession, ClientError> {
        if id == self.session.id {
            Ok(self.session.clone())
        } else {
            Err(ClientError::Status {
                status: 404,
                message: "Session not found".into(),
            })
        }
    }

    async fn end_session(&self, _id: &str) -> Result<(), ClientError> {
        self.ended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn unavailable() -> ClientError {
    ClientError::Status {
        status: 503,
        message: "Service Unavailable".into(),
    }
}

pub fn camera(source: &SyntheticSource, surface: &str) -> SharedCamera {
    SharedCamera::acquire(source, &CameraConstraints::new(surface), FrameEncoder::default()).unwrap()
}

pub fn matched(name: &str, marked: bool) -> VerificationResult {
    VerificationResult {
        matched: true,
        identity: Some(Identity {
            id: format!("id-{name}"),
            display_name: name.into(),
            roll_no: None,
            confidence: Some(88.0),
        }),
        bounding_box: Some(FaceBox::new(270.0, 120.0, 100.0, 120.0)),
        liveness: Liveness::Real,
        attendance_marked: marked,
        already_marked: false,
        faces_detected: 1,
        rejection: None,
    }
}
