use rollcall_client::ClientError;
use rollcall_core::TransitionError;
use rollcall_hw::{CameraError, LocationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("backend error: {0}")]
    Backend(#[from] ClientError),
    #[error("invalid state change: {0}")]
    Transition(#[from] TransitionError),
    #[error("location required for this session: {0}")]
    LocationUnavailable(#[from] LocationError),
    #[error("session {0} is a mobile session; mark attendance from the mobile flow")]
    MobileSession(String),
    #[error("enrollment could not be completed: {0}")]
    Finalize(String),
    #[error("camera produced no usable frame")]
    NoFrame,
    #[error("camera lost during capture: {0}")]
    CaptureLost(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the failure means the operator must sign in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, EngineError::Backend(ClientError::Unauthorized))
    }
}
