//! rollcall-core — Attendance capture data model and client-side state.
//!
//! Pure, synchronous logic shared by the capture runners: coordinate
//! mapping for mirrored previews, overlay hold, and the enrollment and
//! live-verification state machines. Time is always passed in.

pub mod enrollment;
pub mod live;
pub mod mapping;
pub mod overlay;
pub mod types;

pub use enrollment::{EnrollmentPhase, EnrollmentSession, ProgressUpdate, TransitionError};
pub use live::{HudStatus, LiveSettings, LiveVerificationState, RecentMatch};
pub use mapping::{map_to_screen, FitMode, ScreenBox};
pub use overlay::{OverlayDetection, OverlayHolder, OverlayStatus};
pub use types::{FaceBox, FrameSize, Identity, Liveness, RenderSize, VerificationResult};
