//! rollcall-engine — Capture runners for enrollment and attendance marking.
//!
//! Ties a camera session to the attendance backend on a fixed-interval,
//! single-flight poll loop. Each runner owns its state, publishes snapshots
//! on a `watch` channel, and releases the camera on every exit path.

pub mod config;
pub mod context;
pub mod enroll;
pub mod error;
pub mod live;
pub mod media;
pub mod mobile;
pub mod scheduler;

pub use config::Config;
pub use context::SessionContext;
pub use enroll::{EnrollmentOptions, EnrollmentReport, EnrollmentRunner, EnrollmentSnapshot};
pub use error::EngineError;
pub use live::{LiveOptions, LiveReport, LiveRunner, LiveSnapshot};
pub use media::SharedCamera;
pub use mobile::{list_mobile_sessions, MobileAttendance, MobileOutcome};
pub use scheduler::{PollHandle, PollStats, TickControl, TickGuard};
