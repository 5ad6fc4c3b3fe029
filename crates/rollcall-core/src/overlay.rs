//! Short-lived visual memory of the last positioned detection.
//!
//! A fresh detection replaces the current overlay and restarts its hold
//! window. Ticks without a placeable detection leave the overlay in place
//! until the window lapses, which keeps the indicator from flickering between
//! polls. One subject is tracked at a time.

use crate::mapping::ScreenBox;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default hold window for an overlay after its last detection.
pub const DEFAULT_HOLD: Duration = Duration::from_millis(2500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayStatus {
    Scanning,
    Unknown,
    Matched,
    Already,
    Fake,
}

/// A placeable detection, before it is given an expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub screen: ScreenBox,
    pub label: String,
    pub status: OverlayStatus,
}

/// A renderable annotation in rendered-video coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayDetection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub label: String,
    pub status: OverlayStatus,
    pub expires_at: Instant,
}

impl OverlayDetection {
    pub fn screen_box(&self) -> ScreenBox {
        ScreenBox {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlayHolder {
    hold: Duration,
    current: Option<OverlayDetection>,
}

impl Default for OverlayHolder {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD)
    }
}

impl OverlayHolder {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            current: None,
        }
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Merge this tick's detection (if any) and age out a stale overlay.
    ///
    /// The overlay stays visible while `now < expires_at` and is cleared once
    /// `now >= expires_at`. Clearing an already-empty holder is a no-op.
    pub fn apply(&mut self, detection: Option<Detection>, now: Instant) -> Option<&OverlayDetection> {
        match detection {
            Some(d) => {
                self.current = Some(OverlayDetection {
                    x: d.screen.x,
                    y: d.screen.y,
                    width: d.screen.width,
                    height: d.screen.height,
                    label: d.label,
                    status: d.status,
                    expires_at: now + self.hold,
                });
            }
            None => self.expire(now),
        }
        self.current.as_ref()
    }

    /// Age out the overlay without offering a new detection.
    pub fn expire(&mut self, now: Instant) {
        if self.current.as_ref().is_some_and(|o| now >= o.expires_at) {
            tracing::trace!("overlay hold window lapsed");
            self.current = None;
        }
    }

    pub fn current(&self) -> Option<&OverlayDetection> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
