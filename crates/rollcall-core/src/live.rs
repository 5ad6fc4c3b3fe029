//! Live verification HUD state.
//!
//! The HUD cycles `scanning → detecting → {match, unknown} → scanning`. Match
//! and unknown are transient: each reverts to scanning after a display window
//! so the HUD reflects the current camera view rather than a past result.
//!
//! Attendance counting mirrors the boundary: every tick that reports
//! `attendance_marked` increments `present_count` once. Duplicate suppression
//! is the backend's job (`already_marked`).

use crate::mapping::{map_to_screen, FitMode};
use crate::overlay::{Detection, OverlayDetection, OverlayHolder, OverlayStatus};
use crate::types::{FrameSize, Liveness, RenderSize, VerificationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const DEFAULT_MATCH_DISPLAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_UNKNOWN_DISPLAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HudStatus {
    Scanning,
    Detecting,
    Match,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentMatch {
    pub name: String,
    pub time: DateTime<Utc>,
}

/// Timing and geometry for a live verification view.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub hold: Duration,
    pub match_display: Duration,
    pub unknown_display: Duration,
    pub recent_limit: usize,
    pub render: RenderSize,
    pub fit: FitMode,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            hold: crate::overlay::DEFAULT_HOLD,
            match_display: DEFAULT_MATCH_DISPLAY,
            unknown_display: DEFAULT_UNKNOWN_DISPLAY,
            recent_limit: DEFAULT_RECENT_LIMIT,
            render: RenderSize::new(640.0, 480.0),
            fit: FitMode::Stretch,
        }
    }
}

/// What one applied tick did, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub hud: HudStatus,
    pub marked: bool,
    pub overlay: Option<OverlayStatus>,
}

#[derive(Debug, Clone)]
pub struct LiveVerificationState {
    settings: LiveSettings,
    present_count: u32,
    total_students: u32,
    recent: VecDeque<RecentMatch>,
    hud: HudStatus,
    hud_revert_at: Option<Instant>,
    last_matched: Option<String>,
    in_flight: bool,
    overlay: OverlayHolder,
}

impl LiveVerificationState {
    pub fn new(settings: LiveSettings) -> Self {
        let overlay = OverlayHolder::new(settings.hold);
        Self {
            recent: VecDeque::with_capacity(settings.recent_limit),
            settings,
            present_count: 0,
            total_students: 0,
            hud: HudStatus::Scanning,
            hud_revert_at: None,
            last_matched: None,
            in_flight: false,
            overlay,
        }
    }

    /// Seed counters from the session record.
    pub fn seed(&mut self, present_count: u32, total_students: u32) {
        self.present_count = present_count;
        self.total_students = total_students;
    }

    pub fn present_count(&self) -> u32 {
        self.present_count
    }

    pub fn total_students(&self) -> u32 {
        self.total_students
    }

    pub fn recent(&self) -> impl Iterator<Item = &RecentMatch> {
        self.recent.iter()
    }

    pub fn hud(&self) -> HudStatus {
        self.hud
    }

    pub fn last_matched(&self) -> Option<&str> {
        self.last_matched.as_deref()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn overlay(&self) -> Option<&OverlayDetection> {
        self.overlay.current()
    }

    /// Claim the single-flight slot. Returns `false` when a tick is already running.
    pub fn begin_tick(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        if self.hud == HudStatus::Scanning {
            self.hud = HudStatus::Detecting;
        }
        true
    }

    /// Apply a verification result captured at `source` resolution.
    pub fn apply(
        &mut self,
        result: &VerificationResult,
        source: FrameSize,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> TickSummary {
        self.in_flight = false;
        self.revert_if_due(now);

        let screen = result
            .bounding_box
            .and_then(|b| map_to_screen(&b, source, self.settings.render, self.settings.fit));

        let (overlay_status, label) = if result.matched {
            let name = result.display_name().to_string();
            let fake = result.liveness == Liveness::Fake;
            self.set_hud(
                if fake { HudStatus::Unknown } else { HudStatus::Match },
                self.settings.match_display,
                now,
            );
            self.last_matched = Some(name.clone());
            let status = if fake {
                OverlayStatus::Fake
            } else if result.already_marked {
                OverlayStatus::Already
            } else {
                OverlayStatus::Matched
            };
            (status, name)
        } else {
            if result.faces_detected > 0 {
                self.set_hud(HudStatus::Unknown, self.settings.unknown_display, now);
            } else {
                self.hud = HudStatus::Scanning;
                self.hud_revert_at = None;
            }
            (OverlayStatus::Unknown, String::new())
        };

        let detection = screen.map(|screen| Detection {
            screen,
            label,
            status: overlay_status,
        });
        let overlay = self.overlay.apply(detection, now).map(|o| o.status);

        let marked = result.attendance_marked;
        if marked {
            self.present_count += 1;
            self.recent.push_front(RecentMatch {
                name: result.display_name().to_string(),
                time: wall,
            });
            self.recent.truncate(self.settings.recent_limit);
            tracing::info!(
                name = result.display_name(),
                present = self.present_count,
                "attendance marked"
            );
        } else if result.already_marked {
            tracing::debug!(name = result.display_name(), "already marked this session");
        }

        TickSummary {
            hud: self.hud,
            marked,
            overlay,
        }
    }

    /// A tick failed (network, timeout, capture). Fall back to scanning.
    pub fn tick_failed(&mut self, now: Instant) -> TickSummary {
        self.in_flight = false;
        self.hud = HudStatus::Scanning;
        self.hud_revert_at = None;
        let overlay = {
            self.overlay.expire(now);
            self.overlay.current().map(|o| o.status)
        };
        TickSummary {
            hud: self.hud,
            marked: false,
            overlay,
        }
    }

    /// The tick produced no frame (camera not ready). Releases the slot only.
    pub fn tick_skipped(&mut self) {
        self.in_flight = false;
        if self.hud == HudStatus::Detecting {
            self.hud = HudStatus::Scanning;
        }
    }

    /// Advance time-based state: HUD display windows and overlay hold.
    pub fn refresh(&mut self, now: Instant) {
        self.revert_if_due(now);
        self.overlay.expire(now);
    }

    fn set_hud(&mut self, status: HudStatus, window: Duration, now: Instant) {
        self.hud = status;
        self.hud_revert_at = Some(now + window);
    }

    fn revert_if_due(&mut self, now: Instant) {
        if let Some(at) = self.hud_revert_at {
            if now >= at {
                self.hud = HudStatus::Scanning;
                self.hud_revert_at = None;
                self.last_matched = None;
            }
        }
    }
}
