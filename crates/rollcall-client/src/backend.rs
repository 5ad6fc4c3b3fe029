use async_trait::async_trait;
use rollcall_core::{FaceBox, VerificationResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unauthorized: credential missing or expired")]
    Unauthorized,
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("backend refused request: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the error came from the network path rather than the server's answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

/// A backend enrollment job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentTicket {
    pub session_id: String,
    pub num_images: u32,
}

/// Backend's answer to one enrollment frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSubmission {
    /// False when the frame held no usable face.
    pub success: bool,
    /// Cumulative accepted frames, as counted by the backend.
    pub progress: u32,
    pub total: u32,
    pub bbox: Option<FaceBox>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub success: bool,
    pub error: Option<String>,
}

/// One frame to verify, plus its session context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Bare base64 JPEG.
    pub image: String,
    pub session_id: String,
    pub auto_mark: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl VerifyRequest {
    pub fn new(image: String, session_id: impl Into<String>) -> Self {
        Self {
            image,
            session_id: session_id.into(),
            auto_mark: true,
            lat: None,
            lng: None,
        }
    }

    pub fn with_auto_mark(mut self, auto_mark: bool) -> Self {
        self.auto_mark = auto_mark;
        self
    }

    pub fn with_location(mut self, lat: f64, lng: f64) -> Self {
        self.lat = Some(lat);
        self.lng = Some(lng);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Mobile,
    #[default]
    #[serde(other)]
    Camera,
}

/// An attendance session as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    #[serde(alias = "sessionId")]
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default)]
    pub present_count: u32,
    #[serde(default)]
    pub total_students: u32,
    #[serde(default)]
    pub status: Option<String>,
}

/// The remote attendance service, as consumed by the capture loops.
#[async_trait]
pub trait AttendanceBackend: Send + Sync {
    /// Open an enrollment job for the authenticated user.
    async fn start_enrollment(&self, num_images: u32) -> Result<EnrollmentTicket, ClientError>;

    /// Upload one JPEG frame to an enrollment job.
    async fn submit_enrollment_frame(
        &self,
        session_id: &str,
        jpeg: &[u8],
    ) -> Result<FrameSubmission, ClientError>;

    /// Close the job and build the face template.
    async fn finalize_enrollment(&self, session_id: &str) -> Result<FinalizeOutcome, ClientError>;

    /// Recognise (and optionally mark) the face in one frame.
    async fn verify_frame(&self, request: &VerifyRequest) -> Result<VerificationResult, ClientError>;

    async fn list_active_sessions(&self) -> Result<Vec<AttendanceSession>, ClientError>;

    async fn get_session(&self, id: &str) -> Result<AttendanceSession, ClientError>;

    async fn end_session(&self, id: &str) -> Result<(), ClientError>;
}
