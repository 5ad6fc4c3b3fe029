//! rollcall-hw — Camera acquisition, frame encoding and location fixes.
//!
//! Provides V4L2-based capture behind the `MediaSource` seam, exclusive
//! camera sessions with guaranteed release, and JPEG still encoding.

pub mod camera;
pub mod frame;
pub mod location;
pub mod session;
pub mod synthetic;

pub use camera::{CameraConstraints, CameraError, FacingMode, MediaSource, V4lCamera, V4lSource, VideoDevice};
pub use frame::{FrameEncoder, FrameSample, RawFrame};
pub use location::{FixedLocation, GeoFix, LocationError, LocationProvider, NoLocation};
pub use session::CameraSession;
pub use synthetic::SyntheticSource;
