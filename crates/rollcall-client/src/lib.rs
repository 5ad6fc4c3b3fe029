//! rollcall-client — Boundary to the remote attendance service.
//!
//! The capture loops talk to the service only through [`AttendanceBackend`].
//! [`HttpBackend`] implements it over HTTP + JSON with a bearer credential.

pub mod backend;
pub mod http;
mod wire;

pub use backend::{
    AttendanceBackend, AttendanceSession, ClientError, EnrollmentTicket, FinalizeOutcome,
    FrameSubmission, SessionMode, VerifyRequest,
};
pub use http::HttpBackend;
