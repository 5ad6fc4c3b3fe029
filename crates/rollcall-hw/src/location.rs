//! Position fixes for geofenced marking.
//!
//! Location is acquired independently of the camera and may fail on its own;
//! callers keep the video pipeline running without it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub lat: f64,
    pub lng: f64,
}

impl GeoFix {
    pub fn new(lat: f64, lng: f64) -> Result<Self, LocationError> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(LocationError::OutOfRange { lat, lng });
        }
        Ok(Self { lat, lng })
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocationError {
    #[error("location permission denied")]
    Denied,
    #[error("location not supported on this host")]
    Unsupported,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("coordinates out of range: lat={lat}, lng={lng}")]
    OutOfRange { lat: f64, lng: f64 },
}

pub trait LocationProvider: Send + Sync {
    fn current_position(&self) -> Result<GeoFix, LocationError>;
}

/// A fix supplied by the operator (CLI flags or configuration).
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub GeoFix);

impl LocationProvider for FixedLocation {
    fn current_position(&self) -> Result<GeoFix, LocationError> {
        Ok(self.0)
    }
}

/// No positioning available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

impl LocationProvider for NoLocation {
    fn current_position(&self) -> Result<GeoFix, LocationError> {
        Err(LocationError::Unsupported)
    }
}
