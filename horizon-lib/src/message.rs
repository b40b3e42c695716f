use crate::command::{Command, Stage};
use crate::error::LinkError;
use crate::frame::Frame;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Payload of the flush command that opens a data update
pub const FLUSH_START: u8 = 0x00;
/// Payload of the flush command that closes a data update
pub const FLUSH_END: u8 = 0x01;

/// Single-frame commands, both fire-and-forget and queries.
///
/// Bulk transfers (lines, points of interest, files) are built by the
/// `transfer` and `fs` modules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    FlushStart,
    FlushEnd,
    /// Unix epoch seconds
    TimeSync { epoch_seconds: u32 },
    GpsPosition { latitude: f32, longitude: f32 },
    Target { azimuth: f32, altitude: f32 },
    StageStart(Stage),
    StageStop(Stage),
    /// Erase the data partition. The device never answers this one.
    FormatPartition,
    Brightness,
    Calibration,
    UserConfig,
    MagneticField,
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::FlushStart | Request::FlushEnd => Command::Flush,
            Request::TimeSync { .. } => Command::TimeSync,
            Request::GpsPosition { .. } => Command::GpsPosition,
            Request::Target { .. } => Command::Target,
            Request::StageStart(stage) => stage.start_command(),
            Request::StageStop(stage) => stage.stop_command(),
            Request::FormatPartition => Command::FormatPartition,
            Request::Brightness => Command::BrightnessRequest,
            Request::Calibration => Command::CalibrationRequest,
            Request::UserConfig => Command::UserConfigRequest,
            Request::MagneticField => Command::MagneticFieldRequest,
        }
    }

    /// Response the device sends back, `None` for fire-and-forget commands.
    pub fn expected_response(&self) -> Option<Command> {
        self.command().response()
    }

    fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(9);
        match *self {
            Request::FlushStart => buf.put_u8(FLUSH_START),
            Request::FlushEnd => buf.put_u8(FLUSH_END),
            Request::TimeSync { epoch_seconds } => buf.put_u32_le(epoch_seconds),
            Request::GpsPosition {
                latitude,
                longitude,
            } => {
                buf.put_f32_le(latitude);
                buf.put_f32_le(longitude);
            }
            Request::Target { azimuth, altitude } => {
                buf.put_u8(0); // reserved
                buf.put_f32_le(azimuth);
                buf.put_f32_le(altitude);
            }
            Request::StageStart(_)
            | Request::StageStop(_)
            | Request::FormatPartition
            | Request::Brightness
            | Request::Calibration
            | Request::UserConfig
            | Request::MagneticField => {}
        }
        buf.freeze()
    }

    pub fn to_frame(&self) -> Frame {
        // every payload here is at most 9 bytes
        Frame {
            command: self.command(),
            payload: self.payload(),
        }
    }
}

fn stage_for(command: Command) -> Option<Request> {
    [Stage::One, Stage::Two, Stage::Three, Stage::Four, Stage::Five]
        .into_iter()
        .find_map(|stage| {
            if stage.start_command() == command {
                Some(Request::StageStart(stage))
            } else if stage.stop_command() == command {
                Some(Request::StageStop(stage))
            } else {
                None
            }
        })
}

fn require(payload: &[u8], expected: usize) -> Result<(), LinkError> {
    if payload.len() < expected {
        return Err(LinkError::ShortResponse {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Decode a device-bound single-frame command, as the device sees it.
impl TryFrom<&Frame> for Request {
    type Error = LinkError;

    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        let mut payload = frame.payload.clone();
        let request = match frame.command {
            Command::Flush => {
                require(&payload, 1)?;
                match payload.get_u8() {
                    FLUSH_START => Request::FlushStart,
                    FLUSH_END => Request::FlushEnd,
                    other => {
                        return Err(LinkError::InvalidArgument(format!(
                            "unknown flush phase {other:#04x}"
                        )));
                    }
                }
            }
            Command::TimeSync => {
                require(&payload, 4)?;
                Request::TimeSync {
                    epoch_seconds: payload.get_u32_le(),
                }
            }
            Command::GpsPosition => {
                require(&payload, 8)?;
                Request::GpsPosition {
                    latitude: payload.get_f32_le(),
                    longitude: payload.get_f32_le(),
                }
            }
            Command::Target => {
                require(&payload, 9)?;
                payload.advance(1);
                Request::Target {
                    azimuth: payload.get_f32_le(),
                    altitude: payload.get_f32_le(),
                }
            }
            Command::FormatPartition => Request::FormatPartition,
            Command::BrightnessRequest => Request::Brightness,
            Command::CalibrationRequest => Request::Calibration,
            Command::UserConfigRequest => Request::UserConfig,
            Command::MagneticFieldRequest => Request::MagneticField,
            other => {
                return stage_for(other).ok_or_else(|| {
                    LinkError::InvalidArgument(format!("{other:?} is not a single-frame command"))
                });
            }
        };
        Ok(request)
    }
}
