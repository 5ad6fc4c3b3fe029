//! Camera access from async code.
//!
//! Grabbing and JPEG encoding block, so every capture runs on the blocking
//! pool. The session sits behind a mutex shared by the poll ticks and the
//! runner; release from the runner waits for an in-progress grab and then
//! frees the device.

use rollcall_core::FrameSize;
use rollcall_hw::{CameraConstraints, CameraError, CameraSession, FrameEncoder, FrameSample, MediaSource};
use std::sync::{Arc, Mutex, MutexGuard};

/// Grabs tried by [`SharedCamera::capture_settled`] before giving up.
pub const SETTLE_ATTEMPTS: u32 = 10;

#[derive(Clone)]
pub struct SharedCamera {
    session: Arc<Mutex<CameraSession>>,
    encoder: FrameEncoder,
}

impl SharedCamera {
    /// Acquire the surface exclusively. Fails fast on permission or busy devices.
    pub fn acquire(
        source: &dyn MediaSource,
        constraints: &CameraConstraints,
        encoder: FrameEncoder,
    ) -> Result<Self, CameraError> {
        let session = CameraSession::acquire(source, constraints)?;
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            encoder,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CameraSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Grab and encode one still. `Ok(None)` while the stream warms up.
    pub async fn capture(&self) -> Result<Option<FrameSample>, CameraError> {
        let session = Arc::clone(&self.session);
        let encoder = self.encoder;
        tokio::task::spawn_blocking(move || {
            session
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .capture_still(&encoder)
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "capture task failed");
            CameraError::CaptureFailed(e.to_string())
        })?
    }

    /// Capture the first usable still, grabbing up to `attempts` times while
    /// the stream settles. `Ok(None)` if none of them produced a frame.
    pub async fn capture_settled(&self, attempts: u32) -> Result<Option<FrameSample>, CameraError> {
        for attempt in 1..=attempts {
            if let Some(sample) = self.capture().await? {
                return Ok(Some(sample));
            }
            tracing::debug!(attempt, "camera not ready yet");
        }
        Ok(None)
    }

    pub fn is_ready(&self) -> bool {
        self.lock().is_ready()
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_released()
    }

    pub fn frame_size(&self) -> Option<FrameSize> {
        self.lock().frame_size()
    }

    pub fn surface(&self) -> String {
        self.lock().surface().to_string()
    }

    /// Stop the device and free the surface. Idempotent.
    pub fn release(&self) {
        self.lock().release();
    }
}

impl std::fmt::Debug for SharedCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCamera")
            .field("session", &*self.lock())
            .finish()
    }
}

/// Whether a camera error ends the capture session rather than one tick.
pub fn is_fatal(e: &CameraError) -> bool {
    matches!(e, CameraError::TrackEnded(_) | CameraError::Released)
}
