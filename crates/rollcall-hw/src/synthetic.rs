//! Synthetic camera for demos, diagnostics without hardware, and tests.

use crate::camera::{CameraConstraints, CameraError, MediaSource, VideoDevice};
use crate::frame::RawFrame;
use rollcall_core::FrameSize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Produces a moving gradient at the requested size.
#[derive(Debug, Clone, Default)]
pub struct SyntheticSource {
    warmup: u32,
    end_after: Option<u32>,
    deny: bool,
    grabs: Arc<AtomicUsize>,
}

impl SyntheticSource {
    /// A source whose `open` fails as if the user refused camera access.
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// The first `frames` grabs report no dimensions, like a video element
    /// before its metadata has loaded.
    pub fn with_warmup(mut self, frames: u32) -> Self {
        self.warmup = frames;
        self
    }

    /// The track ends after `frames` successful grabs.
    pub fn ending_after(mut self, frames: u32) -> Self {
        self.end_after = Some(frames);
        self
    }

    /// Total grabs across every device this source opened.
    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

impl MediaSource for SyntheticSource {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoDevice>, CameraError> {
        if self.deny {
            return Err(CameraError::PermissionDenied(constraints.device.clone()));
        }
        Ok(Box::new(SyntheticCamera {
            width: constraints.width,
            height: constraints.height,
            warmup_left: self.warmup,
            end_after: self.end_after,
            produced: 0,
            grabs: Arc::clone(&self.grabs),
        }))
    }
}

struct SyntheticCamera {
    width: u32,
    height: u32,
    warmup_left: u32,
    end_after: Option<u32>,
    produced: u32,
    grabs: Arc<AtomicUsize>,
}

impl VideoDevice for SyntheticCamera {
    fn size(&self) -> Option<FrameSize> {
        if self.warmup_left > 0 {
            return None;
        }
        let size = FrameSize::new(self.width, self.height);
        size.is_known().then_some(size)
    }

    fn grab(&mut self) -> Result<RawFrame, CameraError> {
        self.grabs.fetch_add(1, Ordering::SeqCst);

        if self.warmup_left > 0 {
            self.warmup_left -= 1;
            return Ok(RawFrame::new(Vec::new(), 0, 0, 0));
        }
        if self.end_after.is_some_and(|n| self.produced >= n) {
            return Err(CameraError::TrackEnded("synthetic track ended".into()));
        }

        let shift = self.produced;
        let data = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .flat_map(|(x, y)| {
                let r = (x.wrapping_add(shift) % 256) as u8;
                let g = (y % 256) as u8;
                [r, g, 128]
            })
            .collect();
        self.produced += 1;
        Ok(RawFrame::new(data, self.width, self.height, self.produced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frame_size() {
        let mut dev = SyntheticSource::default()
            .open(&CameraConstraints::new("synthetic").with_size(4, 3))
            .unwrap();
        let frame = dev.grab().unwrap();
        assert_eq!(frame.data.len(), 4 * 3 * 3);
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn test_grab_counter_shared_by_clones() {
        let source = SyntheticSource::default();
        let mut dev = source.clone().open(&CameraConstraints::new("synthetic").with_size(2, 2)).unwrap();
        dev.grab().unwrap();
        dev.grab().unwrap();
        assert_eq!(source.grabs(), 2);
    }
}
