//! Camera devices: the `VideoDevice`/`MediaSource` seams and a V4L2 backend.

use crate::frame::{self, RawFrame};
use rollcall_core::FrameSize;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("track ended: {0}")]
    TrackEnded(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera session already released")]
    Released,
}

/// Which way the requested camera faces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FacingMode {
    /// Front camera; the preview is mirrored.
    #[default]
    User,
    Environment,
}

/// Requested stream parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConstraints {
    /// Capture surface identifier (a V4L2 path such as `/dev/video0`).
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub facing: FacingMode,
}

impl CameraConstraints {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            width: 640,
            height: 480,
            facing: FacingMode::User,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_facing(mut self, facing: FacingMode) -> Self {
        self.facing = facing;
        self
    }
}

/// An opened video stream that can produce frames.
pub trait VideoDevice: Send {
    /// Native frame size, once the stream has reported real dimensions.
    fn size(&self) -> Option<FrameSize>;

    /// Grab the current frame as packed RGB.
    fn grab(&mut self) -> Result<RawFrame, CameraError>;

    /// Stop all tracks. Called once when the owning session releases.
    fn stop(&mut self) {}
}

/// Opens video devices for a set of constraints.
pub trait MediaSource: Send + Sync {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoDevice>, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

/// Opens `/dev/videoN` devices through V4L2.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4lSource;

impl MediaSource for V4lSource {
    fn open(&self, constraints: &CameraConstraints) -> Result<Box<dyn VideoDevice>, CameraError> {
        Ok(Box::new(V4lCamera::open(constraints)?))
    }
}

/// V4L2 camera device handle.
pub struct V4lCamera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    sequence: u32,
}

impl V4lCamera {
    /// Open a V4L2 camera device and negotiate the requested size.
    pub fn open(constraints: &CameraConstraints) -> Result<Self, CameraError> {
        let device_path = constraints.device.as_str();
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
            _ if e.to_string().contains("busy") || e.raw_os_error() == Some(16) => {
                CameraError::DeviceBusy(device_path.to_string())
            }
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or GREY)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
            sequence: 0,
        })
    }

    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        match self.pixel_format {
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height),
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
        }
        .map_err(|e| CameraError::CaptureFailed(format!("{:?} conversion failed: {e}", self.pixel_format)))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl VideoDevice for V4lCamera {
    fn size(&self) -> Option<FrameSize> {
        let size = FrameSize::new(self.width, self.height);
        size.is_known().then_some(size)
    }

    fn grab(&mut self) -> Result<RawFrame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, meta) = stream.next().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotConnected || e.raw_os_error() == Some(19) {
                CameraError::TrackEnded(format!("{}: {e}", self.device_path))
            } else {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            }
        })?;

        let sequence = meta.sequence;
        let rgb = self.buf_to_rgb(buf)?;
        drop(stream);
        self.sequence = sequence;

        Ok(RawFrame::new(rgb, self.width, self.height, sequence))
    }

    fn stop(&mut self) {
        tracing::debug!(device = %self.device_path, last_sequence = self.sequence, "camera stopped");
    }
}
