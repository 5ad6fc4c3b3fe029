//! Response bodies as the attendance service sends them.

use crate::backend::{AttendanceSession, EnrollmentTicket, FinalizeOutcome, FrameSubmission};
use rollcall_core::{FaceBox, Identity, Liveness, VerificationResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartEnrollmentBody {
    #[serde(default)]
    pub success: bool,
    pub session_id: Option<String>,
    pub num_images: Option<u32>,
    pub error: Option<String>,
}

impl StartEnrollmentBody {
    pub fn into_ticket(self, requested: u32) -> Result<EnrollmentTicket, String> {
        match (self.success, self.session_id) {
            (true, Some(session_id)) => Ok(EnrollmentTicket {
                session_id,
                num_images: self.num_images.unwrap_or(requested),
            }),
            _ => Err(self.error.unwrap_or_else(|| "enrollment not started".into())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FrameBody {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub total: u32,
    pub bbox: Option<FaceBox>,
    pub error: Option<String>,
}

impl From<FrameBody> for FrameSubmission {
    fn from(b: FrameBody) -> Self {
        FrameSubmission {
            success: b.success,
            progress: b.progress,
            total: b.total,
            bbox: b.bbox.filter(FaceBox::has_area),
            error: b.error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct FinalizeBody {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
}

impl From<FinalizeBody> for FinalizeOutcome {
    fn from(b: FinalizeBody) -> Self {
        FinalizeOutcome {
            success: b.success,
            error: b.error,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireUser {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub roll_no: Option<String>,
    pub confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyBody {
    #[serde(default)]
    pub matched: bool,
    pub user: Option<WireUser>,
    #[serde(default)]
    pub attendance_marked: bool,
    #[serde(default)]
    pub already_marked: bool,
    pub bbox: Option<FaceBox>,
    pub liveness_status: Option<String>,
    #[serde(alias = "faces_detected")]
    pub faces_detected: Option<u32>,
    pub error: Option<String>,
}

impl From<VerifyBody> for VerificationResult {
    fn from(b: VerifyBody) -> Self {
        // Older endpoints omit the face count; a box or a match implies one face.
        let faces_detected = b
            .faces_detected
            .unwrap_or(u32::from(b.bbox.is_some() || b.matched));

        let identity = b.user.map(|u| Identity {
            id: u.id,
            display_name: u.name,
            roll_no: u.roll_no.filter(|r| !r.is_empty()),
            confidence: u.confidence,
        });

        VerificationResult {
            matched: b.matched,
            identity,
            bounding_box: b.bbox,
            liveness: b
                .liveness_status
                .as_deref()
                .map(Liveness::parse)
                .unwrap_or_default(),
            attendance_marked: b.attendance_marked,
            already_marked: b.already_marked,
            faces_detected,
            rejection: b.error.filter(|_| b.matched),
        }
        .normalized()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionListBody {
    #[serde(default)]
    pub sessions: Vec<AttendanceSession>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionBody {
    pub session: Option<AttendanceSession>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

fn string_or_number<'de, D>(d: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(json: &str) -> VerificationResult {
        serde_json::from_str::<VerifyBody>(json).unwrap().into()
    }

    #[test]
    fn test_verify_no_face() {
        let r = verify(r#"{"matched":false,"user":null,"attendanceMarked":false,"alreadyMarked":false}"#);
        assert_eq!(r, VerificationResult::empty());
    }

    #[test]
    fn test_verify_match_infers_face() {
        let r = verify(
            r#"{"matched":true,"user":{"id":"u1","name":"Ada","rollNo":"21CS01","confidence":87.5},
                "confidence":87.5,"attendanceMarked":true,"alreadyMarked":false,
                "bbox":{"x":10,"y":20,"w":30,"h":40}}"#,
        );
        assert!(r.matched && r.attendance_marked);
        assert_eq!(r.faces_detected, 1);
        assert_eq!(r.bounding_box, Some(FaceBox::new(10.0, 20.0, 30.0, 40.0)));
        let id = r.identity.unwrap();
        assert_eq!(id.display_name, "Ada");
        assert_eq!(id.roll_no.as_deref(), Some("21CS01"));
        assert_eq!(r.liveness, Liveness::Unknown);
    }

    #[test]
    fn test_verify_liveness_and_snake_case_count() {
        let r = verify(r#"{"matched":true,"user":{"id":7,"name":"Bo"},"livenessStatus":"fake","faces_detected":1}"#);
        assert_eq!(r.liveness, Liveness::Fake);
        assert_eq!(r.identity.unwrap().id, "7");
        assert!(!r.attendance_marked);
    }

    #[test]
    fn test_verify_unknown_face_with_box() {
        let r = verify(r#"{"matched":false,"faces_detected":2,"bbox":{"x":1,"y":2,"w":3,"h":4}}"#);
        assert_eq!(r.faces_detected, 2);
        assert!(r.bounding_box.is_some());
        assert!(r.identity.is_none());
    }

    #[test]
    fn test_verify_zero_box_dropped() {
        let r = verify(r#"{"matched":true,"user":{"id":"u","name":"N"},"bbox":{"x":0,"y":0,"w":0,"h":0}}"#);
        assert!(r.bounding_box.is_none());
    }

    #[test]
    fn test_verify_rejection_surfaced_on_match() {
        let r = verify(r#"{"matched":true,"user":{"id":"u","name":"N"},"error":"Outside geofence"}"#);
        assert_eq!(r.rejection.as_deref(), Some("Outside geofence"));
        let r = verify(r#"{"matched":false,"error":"noise"}"#);
        assert!(r.rejection.is_none());
    }

    #[test]
    fn test_start_body() {
        let b: StartEnrollmentBody =
            serde_json::from_str(r#"{"success":true,"sessionId":"65f0","numImages":20}"#).unwrap();
        assert_eq!(
            b.into_ticket(50).unwrap(),
            EnrollmentTicket {
                session_id: "65f0".into(),
                num_images: 20
            }
        );
        let b: StartEnrollmentBody =
            serde_json::from_str(r#"{"success":false,"error":"db down"}"#).unwrap();
        assert_eq!(b.into_ticket(50).unwrap_err(), "db down");
    }

    #[test]
    fn test_frame_body() {
        let f: FrameSubmission = serde_json::from_str::<FrameBody>(
            r#"{"success":true,"progress":3,"total":20,"bbox":{"x":0,"y":0,"w":0,"h":0}}"#,
        )
        .unwrap()
        .into();
        assert_eq!(f.progress, 3);
        assert!(f.bbox.is_none());

        let f: FrameSubmission =
            serde_json::from_str::<FrameBody>(r#"{"success":false,"error":"No face detected"}"#)
                .unwrap()
                .into();
        assert!(!f.success);
        assert_eq!(f.error.as_deref(), Some("No face detected"));
    }
}
