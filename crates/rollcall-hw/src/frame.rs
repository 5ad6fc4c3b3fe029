//! Frame types, pixel conversion and still-image encoding.

use base64::Engine;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use rollcall_core::FrameSize;

/// Default JPEG quality for uploaded frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// A captured camera frame, packed RGB (3 bytes/pixel).
#[derive(Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub sequence: u32,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Utc::now(),
            sequence,
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// An encoded still, ready for one verification round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    /// JPEG bytes.
    pub payload: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub source_width: u32,
    pub source_height: u32,
}

impl FrameSample {
    pub fn source_size(&self) -> FrameSize {
        FrameSize::new(self.source_width, self.source_height)
    }

    /// Bare base64 body of the JPEG (no `data:` URL prefix).
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.payload)
    }
}

/// Lossy still encoder at a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder {
    /// Quality is clamped to 1–100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a frame to JPEG.
    ///
    /// Returns `None` for frames that cannot be encoded yet (zero-sized,
    /// short buffer). Those are expected while the stream is starting up.
    pub fn encode(&self, raw: &RawFrame) -> Option<FrameSample> {
        if raw.width == 0 || raw.height == 0 {
            return None;
        }
        let expected = (raw.width as usize) * (raw.height as usize) * 3;
        if raw.data.len() < expected {
            tracing::debug!(expected, actual = raw.data.len(), "short frame buffer; skipping encode");
            return None;
        }

        let img: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(raw.width, raw.height, &raw.data[..expected])?;

        let mut buf = std::io::Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        if let Err(e) = img.write_with_encoder(encoder) {
            tracing::debug!(error = %e, "jpeg encode failed");
            return None;
        }

        Some(FrameSample {
            payload: buf.into_inner(),
            captured_at: raw.captured_at,
            source_width: raw.width,
            source_height: raw.height,
        })
    }
}

/// Convert packed YUYV (4:2:2) to packed RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width as usize) * (height as usize);
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to packed RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width as usize) * (height as usize);
    if grey.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: grey.len(),
        });
    }
    Ok(grey[..pixels].iter().flat_map(|&g| [g, g, g]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
