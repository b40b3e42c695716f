//! Chunked bulk transfers for line geometry and points of interest.
//!
//! A line is sent as one descriptor frame followed by its coordinate frames:
//!
//! ```text
//! descriptor:  reserved:u16 | index:u16 | width:u8 (=4) | az_min:f32 | az_max:f32 | count:u32
//! coordinates: index:u16 | count:u16 | count × (azimuth:f32, altitude:f32)
//! ```
//!
//! Each coordinate frame carries at most 60 points (480 bytes). Points of
//! interest are one frame each:
//!
//! ```text
//! sector:u8 | azimuth:f32 | altitude:f32 | importance:f32 | elevation:f32 | distance:f32 | name | 0x00
//! ```

use crate::command::Command;
use crate::constants::*;
use crate::entities::{LinePoint, LineSegment, PointOfInterest};
use crate::error::LinkError;
use crate::frame::Frame;
use crate::records::{null_terminated, read_record};
use bytes::{BufMut, BytesMut};
use zerocopy::byteorder::little_endian::{F32, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct LineDescriptorRaw {
    pub reserved: U16,
    pub index: U16,
    pub coordinate_width: u8,
    pub azimuth_min: F32,
    pub azimuth_max: F32,
    pub point_count: U32,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CoordinateChunkHeaderRaw {
    pub index: U16,
    pub count: U16,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PointRaw {
    pub azimuth: F32,
    pub altitude: F32,
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PoiHeaderRaw {
    pub sector: u8,
    pub azimuth: F32,
    pub altitude: F32,
    pub importance: F32,
    pub elevation: F32,
    pub distance: F32,
}

const _: () = assert!(size_of::<LineDescriptorRaw>() == 17);
const _: () = assert!(size_of::<PointRaw>() == POINT_SIZE);
const _: () = assert!(size_of::<PoiHeaderRaw>() == 21);

impl From<LinePoint> for PointRaw {
    fn from(point: LinePoint) -> Self {
        Self {
            azimuth: F32::new(point.azimuth),
            altitude: F32::new(point.altitude),
        }
    }
}

impl From<PointRaw> for LinePoint {
    fn from(raw: PointRaw) -> Self {
        LinePoint::new(raw.azimuth.get(), raw.altitude.get())
    }
}

/// Decoded line descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineDescriptor {
    pub index: u16,
    pub coordinate_width: u8,
    pub azimuth_min: f32,
    pub azimuth_max: f32,
    pub point_count: u32,
}

impl LineDescriptor {
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        let raw = read_record::<LineDescriptorRaw>(payload)?;
        Ok(Self {
            index: raw.index.get(),
            coordinate_width: raw.coordinate_width,
            azimuth_min: raw.azimuth_min.get(),
            azimuth_max: raw.azimuth_max.get(),
            point_count: raw.point_count.get(),
        })
    }
}

/// Decoded coordinate frame
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateChunk {
    pub index: u16,
    pub points: Vec<LinePoint>,
}

impl CoordinateChunk {
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        let header = read_record::<CoordinateChunkHeaderRaw>(payload)?;
        let count = header.count.get() as usize;
        let body = &payload[size_of::<CoordinateChunkHeaderRaw>()..];
        let expected = count * POINT_SIZE;
        if body.len() < expected {
            return Err(LinkError::ShortResponse {
                expected: size_of::<CoordinateChunkHeaderRaw>() + expected,
                actual: payload.len(),
            });
        }
        let points = <[PointRaw]>::ref_from_bytes(&body[..expected])
            .map_err(|_| LinkError::InvalidArgument("misaligned coordinate data".to_string()))?
            .iter()
            .map(|raw| LinePoint::from(*raw))
            .collect();
        Ok(Self {
            index: header.index.get(),
            points,
        })
    }
}

/// Descriptor frame announcing a line and its point count.
pub fn descriptor_frame(segment: &LineSegment) -> Frame {
    let raw = LineDescriptorRaw {
        reserved: U16::new(0),
        index: U16::new(segment.index),
        coordinate_width: COORDINATE_WIDTH,
        azimuth_min: F32::new(segment.azimuth_min),
        azimuth_max: F32::new(segment.azimuth_max),
        point_count: U32::new(segment.points.len() as u32),
    };
    Frame {
        command: Command::LineDescriptor,
        payload: raw.as_bytes().to_vec().into(),
    }
}

/// Split points into coordinate-frame sized chunks, preserving order.
pub fn chunk_points(points: &[LinePoint]) -> std::slice::Chunks<'_, LinePoint> {
    points.chunks(POINTS_PER_CHUNK)
}

/// One coordinate frame for `chunk` (at most 60 points) of line `index`.
pub fn coordinate_frame(index: u16, chunk: &[LinePoint]) -> Frame {
    debug_assert!(chunk.len() <= POINTS_PER_CHUNK);
    let header = CoordinateChunkHeaderRaw {
        index: U16::new(index),
        count: U16::new(chunk.len() as u16),
    };
    let mut buf = BytesMut::with_capacity(
        size_of::<CoordinateChunkHeaderRaw>() + chunk.len() * POINT_SIZE,
    );
    buf.put_slice(header.as_bytes());
    for point in chunk {
        buf.put_slice(PointRaw::from(*point).as_bytes());
    }
    Frame {
        command: Command::LineCoordinates,
        payload: buf.freeze(),
    }
}

/// Every frame for one line: the descriptor first, then its coordinate chunks.
pub fn line_frames(segment: &LineSegment) -> Vec<Frame> {
    std::iter::once(descriptor_frame(segment))
        .chain(chunk_points(&segment.points).map(|chunk| coordinate_frame(segment.index, chunk)))
        .collect()
}

/// The single frame carrying one point of interest.
pub fn poi_frame(poi: &PointOfInterest) -> Result<Frame, LinkError> {
    if poi.sector >= SECTOR_COUNT {
        return Err(LinkError::InvalidArgument(format!(
            "sector {} out of range 0..{}",
            poi.sector, SECTOR_COUNT
        )));
    }
    if poi.name.as_bytes().contains(&0) {
        return Err(LinkError::InvalidArgument(format!(
            "point of interest name {:?} contains a null byte",
            poi.name
        )));
    }
    let header = PoiHeaderRaw {
        sector: poi.sector,
        azimuth: F32::new(poi.azimuth),
        altitude: F32::new(poi.altitude),
        importance: F32::new(poi.importance),
        elevation: F32::new(poi.elevation),
        distance: F32::new(poi.distance),
    };
    let mut buf = BytesMut::with_capacity(size_of::<PoiHeaderRaw>() + poi.name.len() + 1);
    buf.put_slice(header.as_bytes());
    buf.put_slice(poi.name.as_bytes());
    buf.put_u8(0);
    Ok(Frame::new(Command::PointOfInterest, buf.freeze())?)
}

/// Decode a point-of-interest frame payload.
pub fn decode_poi(payload: &[u8]) -> Result<PointOfInterest, LinkError> {
    let header = read_record::<PoiHeaderRaw>(payload)?;
    let name = null_terminated(&payload[size_of::<PoiHeaderRaw>()..]);
    Ok(PointOfInterest {
        sector: header.sector,
        azimuth: header.azimuth.get(),
        altitude: header.altitude.get(),
        importance: header.importance.get(),
        elevation: header.elevation.get(),
        distance: header.distance.get(),
        name,
    })
}
