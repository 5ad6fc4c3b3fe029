//! Exclusive camera sessions.
//!
//! A [`CameraSession`] owns one opened device for one capture surface. The
//! surface stays claimed in a process-wide registry until the session is
//! released; a second `acquire` on the same surface fails with
//! [`CameraError::DeviceBusy`]. Release is idempotent and also runs on drop,
//! so every exit path gives the hardware back.

use crate::camera::{CameraConstraints, CameraError, MediaSource, VideoDevice};
use crate::frame::{FrameEncoder, FrameSample, RawFrame};
use rollcall_core::FrameSize;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

static CLAIMED_SURFACES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn surfaces() -> std::sync::MutexGuard<'static, HashSet<String>> {
    CLAIMED_SURFACES
        .get_or_init(|| Mutex::new(HashSet::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Whether a capture surface is currently held by a live session.
pub fn is_claimed(surface: &str) -> bool {
    surfaces().contains(surface)
}

pub struct CameraSession {
    surface: String,
    device: Option<Box<dyn VideoDevice>>,
    last_error: Option<CameraError>,
}

impl CameraSession {
    /// Claim the surface named by `constraints.device` and open it.
    pub fn acquire(source: &dyn MediaSource, constraints: &CameraConstraints) -> Result<Self, CameraError> {
        let surface = constraints.device.clone();
        if !surfaces().insert(surface.clone()) {
            tracing::warn!(surface = %surface, "capture surface already held");
            return Err(CameraError::DeviceBusy(surface));
        }

        match source.open(constraints) {
            Ok(device) => {
                tracing::info!(surface = %surface, size = ?device.size(), "camera acquired");
                Ok(Self {
                    surface,
                    device: Some(device),
                    last_error: None,
                })
            }
            Err(e) => {
                surfaces().remove(&surface);
                tracing::warn!(surface = %surface, error = %e, "camera acquisition failed");
                Err(e)
            }
        }
    }

    pub fn surface(&self) -> &str {
        &self.surface
    }

    /// True once the stream has reported real dimensions and until release.
    pub fn is_ready(&self) -> bool {
        self.device.as_ref().and_then(|d| d.size()).is_some()
    }

    pub fn is_released(&self) -> bool {
        self.device.is_none()
    }

    /// Native frame size, if known.
    pub fn frame_size(&self) -> Option<FrameSize> {
        self.device.as_ref().and_then(|d| d.size())
    }

    pub fn last_error(&self) -> Option<&CameraError> {
        self.last_error.as_ref()
    }

    /// Grab the current frame.
    ///
    /// A track that ended underneath the session is recorded as the last
    /// error; the session stays held until released.
    pub fn capture_raw(&mut self) -> Result<RawFrame, CameraError> {
        let device = self.device.as_mut().ok_or(CameraError::Released)?;
        match device.grab() {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Grab and encode one still.
    ///
    /// `Ok(None)` means the stream is not ready to produce an image yet.
    pub fn capture_still(&mut self, encoder: &FrameEncoder) -> Result<Option<FrameSample>, CameraError> {
        let frame = self.capture_raw()?;
        Ok(encoder.encode(&frame))
    }

    /// Stop all tracks and free the surface. Safe to call any number of times.
    pub fn release(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        device.stop();
        surfaces().remove(&self.surface);
        tracing::info!(surface = %self.surface, "camera released");
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("surface", &self.surface)
            .field("ready", &self.is_ready())
            .field("released", &self.is_released())
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticSource;

    fn constraints(surface: &str) -> CameraConstraints {
        CameraConstraints::new(surface).with_size(32, 24)
    }

    #[test]
    fn test_acquire_and_capture() {
        let mut cam = CameraSession::acquire(&SyntheticSource::default(), &constraints("test:acquire")).unwrap();
        assert!(cam.is_ready());
        assert_eq!(cam.frame_size(), Some(FrameSize::new(32, 24)));
        let sample = cam.capture_still(&FrameEncoder::default()).unwrap().unwrap();
        assert_eq!(sample.source_width, 32);
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let source = SyntheticSource::default();
        let _first = CameraSession::acquire(&source, &constraints("test:busy")).unwrap();
        let second = CameraSession::acquire(&source, &constraints("test:busy"));
        assert!(matches!(second, Err(CameraError::DeviceBusy(_))));
    }

    #[test]
    fn test_release_is_idempotent_and_frees_surface() {
        let source = SyntheticSource::default();
        let mut cam = CameraSession::acquire(&source, &constraints("test:release")).unwrap();
        cam.release();
        cam.release();
        assert!(cam.is_released());
        assert!(!cam.is_ready());
        assert!(!is_claimed("test:release"));
        assert_eq!(cam.capture_raw().unwrap_err(), CameraError::Released);

        let again = CameraSession::acquire(&source, &constraints("test:release"));
        assert!(again.is_ok());
    }

    #[test]
    fn test_release_does_not_touch_other_sessions() {
        let source = SyntheticSource::default();
        let mut a = CameraSession::acquire(&source, &constraints("test:iso-a")).unwrap();
        let mut b = CameraSession::acquire(&source, &constraints("test:iso-b")).unwrap();
        a.release();
        a.release();
        assert!(b.capture_raw().is_ok());
        assert!(is_claimed("test:iso-b"));
    }

    #[test]
    fn test_drop_releases() {
        let source = SyntheticSource::default();
        {
            let _cam = CameraSession::acquire(&source, &constraints("test:drop")).unwrap();
            assert!(is_claimed("test:drop"));
        }
        assert!(!is_claimed("test:drop"));
    }

    #[test]
    fn test_failed_open_does_not_claim() {
        let source = SyntheticSource::denied();
        let err = CameraSession::acquire(&source, &constraints("test:denied")).unwrap_err();
        assert!(matches!(err, CameraError::PermissionDenied(_)));
        assert!(!is_claimed("test:denied"));
    }

    #[test]
    fn test_not_ready_until_dimensions() {
        let source = SyntheticSource::default().with_warmup(2);
        let mut cam = CameraSession::acquire(&source, &constraints("test:warmup")).unwrap();
        assert!(!cam.is_ready());
        assert!(cam.capture_still(&FrameEncoder::default()).unwrap().is_none());
        assert!(cam.capture_still(&FrameEncoder::default()).unwrap().is_none());
        assert!(cam.is_ready());
        assert!(cam.capture_still(&FrameEncoder::default()).unwrap().is_some());
    }

    #[test]
    fn test_track_end_recorded() {
        let source = SyntheticSource::default().ending_after(1);
        let mut cam = CameraSession::acquire(&source, &constraints("test:ended")).unwrap();
        assert!(cam.capture_raw().is_ok());
        assert!(matches!(cam.capture_raw(), Err(CameraError::TrackEnded(_))));
        assert!(matches!(cam.last_error(), Some(CameraError::TrackEnded(_))));
    }
}
