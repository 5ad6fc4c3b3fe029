use serde::{Deserialize, Serialize};

/// Face bounding box in native camera pixel space (unmirrored).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// A box with no area carries no position information.
    pub fn has_area(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }
}

/// Identity of a recognised subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    /// Institution roll number, when the backend reports one.
    pub roll_no: Option<String>,
    /// Backend-reported recognition confidence (0–100).
    pub confidence: Option<f32>,
}

/// Boundary-reported classification of a live subject versus a spoof.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Real,
    Fake,
    #[default]
    Unknown,
}

impl Liveness {
    /// Parse the boundary's free-form liveness string. Anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "real" | "live" => Liveness::Real,
            "fake" | "spoof" => Liveness::Fake,
            _ => Liveness::Unknown,
        }
    }
}

/// Normalised response from the recognition boundary.
///
/// Constructed through [`VerificationResult::normalized`], which enforces:
/// - `bounding_box` is `None` unless `faces_detected > 0`;
/// - `attendance_marked` implies `matched`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub matched: bool,
    pub identity: Option<Identity>,
    pub bounding_box: Option<FaceBox>,
    pub liveness: Liveness,
    pub attendance_marked: bool,
    pub already_marked: bool,
    pub faces_detected: u32,
    /// Backend reason for refusing to mark a matched subject (e.g. outside geofence).
    pub rejection: Option<String>,
}

impl VerificationResult {
    /// The "nothing seen this tick" result.
    pub fn empty() -> Self {
        Self {
            matched: false,
            identity: None,
            bounding_box: None,
            liveness: Liveness::Unknown,
            attendance_marked: false,
            already_marked: false,
            faces_detected: 0,
            rejection: None,
        }
    }

    /// Re-establish the invariants on a result assembled from raw boundary fields.
    pub fn normalized(mut self) -> Self {
        if self.bounding_box.map(|b| !b.has_area()).unwrap_or(false) {
            self.bounding_box = None;
        }
        if self.faces_detected == 0 {
            self.bounding_box = None;
        }
        if self.attendance_marked && !self.matched {
            tracing::warn!("boundary reported attendance without a match; ignoring mark");
            self.attendance_marked = false;
        }
        self
    }

    /// Display name of the matched identity, or an empty string.
    pub fn display_name(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.display_name.as_str())
            .unwrap_or("")
    }
}

/// Native dimensions of the camera frame a result refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Rendered size of the video element, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSize {
    pub width: f32,
    pub height: f32,
}

impl RenderSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}
