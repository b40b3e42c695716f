//! Line and point-of-interest entities.
//!
//! These are produced by an external parser and consumed by the bulk upload
//! transfers. They are plain immutable values.

use crate::constants::{SECTOR_COUNT, SECTOR_WIDTH_DEG};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One (azimuth, altitude) vertex of a line, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinePoint {
    pub azimuth: f32,
    pub altitude: f32,
}

impl LinePoint {
    pub fn new(azimuth: f32, altitude: f32) -> Self {
        Self { azimuth, altitude }
    }
}

/// An ordered polyline drawn over the horizon.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LineSegment {
    pub index: u16,
    pub azimuth_min: f32,
    pub azimuth_max: f32,
    pub points: Vec<LinePoint>,
}

impl LineSegment {
    /// Build a segment, deriving the azimuth bounds from its points.
    pub fn from_points(index: u16, points: Vec<LinePoint>) -> Self {
        let (azimuth_min, azimuth_max) = if points.is_empty() {
            (0.0, 0.0)
        } else {
            points.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.azimuth), hi.max(p.azimuth))
            })
        };
        Self {
            index,
            azimuth_min,
            azimuth_max,
            points,
        }
    }
}

/// A named landmark shown by the device.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PointOfInterest {
    /// Azimuth sector, 0..=31
    pub sector: u8,
    pub azimuth: f32,
    pub altitude: f32,
    /// Relative importance, 0..=1
    pub importance: f32,
    /// Elevation above sea level in meters
    pub elevation: f32,
    /// Distance from the observer in meters
    pub distance: f32,
    pub name: String,
}

impl PointOfInterest {
    /// Build a point of interest with the sector derived from its azimuth.
    pub fn new(
        name: impl Into<String>,
        azimuth: f32,
        altitude: f32,
        importance: f32,
        elevation: f32,
        distance: f32,
    ) -> Self {
        Self {
            sector: sector_for_azimuth(azimuth),
            azimuth,
            altitude,
            importance: importance.clamp(0.0, 1.0),
            elevation,
            distance,
            name: name.into(),
        }
    }
}

/// Bucket an azimuth in degrees into one of the 32 sectors of 11.25°.
pub fn sector_for_azimuth(azimuth: f32) -> u8 {
    if !azimuth.is_finite() {
        return 0;
    }
    let normalized = azimuth.rem_euclid(360.0);
    ((normalized / SECTOR_WIDTH_DEG) as u8).min(SECTOR_COUNT - 1)
}
