//! Per-session request context.
//!
//! Everything a verify request needs besides the frame travels here,
//! passed explicitly into each runner.

use rollcall_client::VerifyRequest;
use rollcall_hw::{FrameSample, GeoFix};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub session_id: String,
    /// Position sent with mobile (geofenced) requests.
    pub location: Option<GeoFix>,
    /// Whether the backend should mark attendance on a match.
    pub auto_mark: bool,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            location: None,
            auto_mark: true,
        }
    }

    pub fn with_location(mut self, fix: GeoFix) -> Self {
        self.location = Some(fix);
        self
    }

    pub fn with_auto_mark(mut self, auto_mark: bool) -> Self {
        self.auto_mark = auto_mark;
        self
    }

    pub fn verify_request(&self, sample: &FrameSample) -> VerifyRequest {
        let req = VerifyRequest::new(sample.to_base64(), self.session_id.clone())
            .with_auto_mark(self.auto_mark);
        match self.location {
            Some(fix) => req.with_location(fix.lat, fix.lng),
            None => req,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> FrameSample {
        FrameSample {
            payload: vec![0xff, 0xd8, 0xff],
            captured_at: Utc::now(),
            source_width: 640,
            source_height: 480,
        }
    }

    #[test]
    fn test_request_carries_context() {
        let ctx = SessionContext::new("s-9");
        let req = ctx.verify_request(&sample());
        assert_eq!(req.session_id, "s-9");
        assert!(req.auto_mark);
        assert!(req.lat.is_none() && req.lng.is_none());
        assert!(!req.image.starts_with("data:"));

        let fix = GeoFix::new(12.9, 77.6).unwrap();
        let req = ctx.with_location(fix).with_auto_mark(false).verify_request(&sample());
        assert_eq!((req.lat, req.lng), (Some(12.9), Some(77.6)));
        assert!(!req.auto_mark);
    }
}
