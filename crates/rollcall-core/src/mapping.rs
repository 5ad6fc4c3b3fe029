//! Native camera pixels → mirrored screen coordinates.
//!
//! The preview is rendered horizontally mirrored (selfie view) while the
//! recognition boundary reports boxes in the unmirrored native frame, so the
//! X axis is inverted before scaling. The Y axis scales directly.
//!
//! The default [`FitMode::Stretch`] scales each axis independently by
//! `rendered / native`. When the element crops with object-fit: cover and the
//! aspect ratios differ, the box drifts; this approximation is kept on
//! purpose. [`FitMode::Cover`] is an explicit opt-in that compensates for
//! centred cropping.

use crate::types::{FaceBox, FrameSize, RenderSize};
use serde::{Deserialize, Serialize};

/// A box in rendered (CSS pixel) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// How native pixels are projected onto the rendered element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Independent per-axis scale. Matches the observed preview behaviour.
    #[default]
    Stretch,
    /// Uniform scale with centred crop (object-fit: cover).
    Cover,
}

impl std::str::FromStr for FitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stretch" => Ok(FitMode::Stretch),
            "cover" => Ok(FitMode::Cover),
            other => Err(format!("unknown fit mode: {other} (expected stretch or cover)")),
        }
    }
}

/// Maps a native, unmirrored box onto the mirrored rendered element.
///
/// Returns `None` when either size is not yet known (metadata not loaded, or
/// element not laid out). Callers treat `None` as "cannot place an overlay
/// this tick", not as an error.
pub fn map_to_screen(
    bbox: &FaceBox,
    source: FrameSize,
    rendered: RenderSize,
    fit: FitMode,
) -> Option<ScreenBox> {
    if !source.is_known() || rendered.width <= 0.0 || rendered.height <= 0.0 {
        return None;
    }

    let native_w = source.width as f32;
    let native_h = source.height as f32;
    let mirrored_x = native_w - (bbox.x + bbox.w);

    match fit {
        FitMode::Stretch => {
            let sx = rendered.width / native_w;
            let sy = rendered.height / native_h;
            Some(ScreenBox {
                x: mirrored_x * sx,
                y: bbox.y * sy,
                width: bbox.w * sx,
                height: bbox.h * sy,
            })
        }
        FitMode::Cover => {
            let scale = (rendered.width / native_w).max(rendered.height / native_h);
            let offset_x = (rendered.width - native_w * scale) / 2.0;
            let offset_y = (rendered.height - native_h * scale) / 2.0;
            Some(ScreenBox {
                x: mirrored_x * scale + offset_x,
                y: bbox.y * scale + offset_y,
                width: bbox.w * scale,
                height: bbox.h * scale,
            })
        }
    }
}
