//! Fixed-layout response records.
//!
//! All records are little-endian and are only ever decoded. Each one has a
//! `*Raw` layout read with `zerocopy` and a decoded, user-facing form.
//! Responses longer than the layout are accepted; shorter ones fail with
//! [`LinkError::ShortResponse`].

use crate::constants::*;
use crate::error::LinkError;
use std::fmt;
use zerocopy::byteorder::little_endian::{F32, I16, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Read a fixed-layout record from the front of a response payload.
pub(crate) fn read_record<T: FromBytes>(payload: &[u8]) -> Result<T, LinkError> {
    T::read_from_prefix(payload)
        .map(|(record, _rest)| record)
        .map_err(|_| LinkError::ShortResponse {
            expected: size_of::<T>(),
            actual: payload.len(),
        })
}

/// Decode the brightness response (16-bit unsigned).
pub fn decode_brightness(payload: &[u8]) -> Result<u16, LinkError> {
    read_record::<U16>(payload).map(|v| v.get())
}

/// Magnetic-field vector as reported by the device's WMM computation (17 bytes)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct MagneticFieldRaw {
    pub success: u8,
    pub north: F32,     // nT
    pub east: F32,      // nT
    pub down: F32,      // nT
    pub magnitude: F32, // nT
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MagneticField {
    pub success: bool,
    pub north_nt: f32,
    pub east_nt: f32,
    pub down_nt: f32,
    pub magnitude_nt: f32,
}

impl From<MagneticFieldRaw> for MagneticField {
    fn from(raw: MagneticFieldRaw) -> Self {
        Self {
            success: raw.success != 0,
            north_nt: raw.north.get(),
            east_nt: raw.east.get(),
            down_nt: raw.down.get(),
            magnitude_nt: raw.magnitude.get(),
        }
    }
}

impl MagneticField {
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        read_record::<MagneticFieldRaw>(payload).map(Self::from)
    }

    /// √(north² + east²)
    pub fn horizontal_intensity(&self) -> f32 {
        self.north_nt.hypot(self.east_nt)
    }

    /// Dip angle in degrees, positive when the field points below the horizon
    pub fn inclination_deg(&self) -> f32 {
        (-self.down_nt)
            .atan2(self.horizontal_intensity())
            .to_degrees()
    }

    /// Angle between true and magnetic north in degrees, positive to the east
    pub fn declination_deg(&self) -> f32 {
        self.east_nt.atan2(self.north_nt).to_degrees()
    }
}

impl fmt::Display for MagneticField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N: {:.1} nT, E: {:.1} nT, D: {:.1} nT, |B|: {:.1} nT, decl: {:.2}°, incl: {:.2}°",
            self.north_nt,
            self.east_nt,
            self.down_nt,
            self.magnitude_nt,
            self.declination_deg(),
            self.inclination_deg()
        )
    }
}

/// Sensor and display calibration blob (98 bytes)
///
/// Only the leading fields are decoded. Their order follows the device
/// documentation (flags, three-axis offsets and scales, two angles,
/// display offsets); the byte positions are assumed and the tail is
/// kept as `reserved`.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CalibrationRaw {
    pub flags: u8,
    pub offset: [F32; 3], // x/y/z
    pub scale: [F32; 3],  // x/y/z
    pub azimuth_offset: F32,  // degrees
    pub altitude_offset: F32, // degrees
    // left x, left y, right x, right y, in display pixels
    pub display_offset: [I16; 4],
    pub reserved: [u8; 57],
}

const _: () = assert!(size_of::<CalibrationRaw>() == CALIBRATION_RECORD_SIZE);

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Calibration {
    pub flags: u8,
    pub offset: [f32; 3],
    pub scale: [f32; 3],
    pub azimuth_offset_deg: f32,
    pub altitude_offset_deg: f32,
    pub display_offset_left: (i16, i16),
    pub display_offset_right: (i16, i16),
}

impl From<CalibrationRaw> for Calibration {
    fn from(raw: CalibrationRaw) -> Self {
        let [lx, ly, rx, ry] = raw.display_offset.map(|v| v.get());
        Self {
            flags: raw.flags,
            offset: raw.offset.map(|v| v.get()),
            scale: raw.scale.map(|v| v.get()),
            azimuth_offset_deg: raw.azimuth_offset.get(),
            altitude_offset_deg: raw.altitude_offset.get(),
            display_offset_left: (lx, ly),
            display_offset_right: (rx, ry),
        }
    }
}

impl Calibration {
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        read_record::<CalibrationRaw>(payload).map(Self::from)
    }
}

/// Size of the display and locale settings ahead of the device name.
pub const USER_SETTINGS_SIZE: usize = USER_CONFIG_RECORD_SIZE - DEVICE_NAME_SIZE;

/// Display and locale settings plus the device name (68 bytes)
///
/// The settings block has no confirmed field split and is carried as raw
/// bytes. The device name is the trailing 32-byte field.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct UserConfigRaw {
    pub settings: [u8; USER_SETTINGS_SIZE],
    pub device_name: [u8; DEVICE_NAME_SIZE],
}

const _: () = assert!(size_of::<UserConfigRaw>() == USER_CONFIG_RECORD_SIZE);

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UserConfig {
    pub settings: Vec<u8>,
    pub device_name: String,
}

impl From<UserConfigRaw> for UserConfig {
    fn from(raw: UserConfigRaw) -> Self {
        Self {
            settings: raw.settings.to_vec(),
            device_name: null_terminated(&raw.device_name),
        }
    }
}

impl UserConfig {
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        read_record::<UserConfigRaw>(payload).map(Self::from)
    }
}

/// String up to the first null byte (or the whole field), decoded lossily as UTF-8.
pub(crate) fn null_terminated(field: &[u8]) -> String {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..len]).into_owned()
}
