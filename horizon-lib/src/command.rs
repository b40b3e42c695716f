//! Command catalog.
//!
//! Every frame carries a 16-bit command identifier. Identifiers are split into
//! device-bound commands (host → device) and host-bound responses
//! (device → host). The catalog is closed: anything else decodes to
//! [`Command::Unknown`] and is discarded by the session.

use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum Command {
    // Bulk transfers
    LineDescriptor = 32,
    LineCoordinates = 33,
    PointOfInterest = 34,

    // Simple device-bound commands
    TimeSync = 35,
    Flush = 36,
    Target = 37,
    GpsPosition = 53,

    // Stage start/stop pairs
    Stage1Start = 41,
    Stage1Stop = 42,
    Stage2Start = 60,
    Stage2Stop = 61,
    Stage3Start = 80,
    Stage3Stop = 81,
    Stage4Start = 110,
    Stage4Stop = 111,
    Stage5Start = 130,
    Stage5Stop = 131,

    // Queries
    BrightnessRequest = 85,
    BrightnessResponse = 86,
    CalibrationRequest = 119,
    CalibrationResponse = 120,
    UserConfigRequest = 121,
    UserConfigResponse = 122,
    MagneticFieldRequest = 123,
    MagneticFieldResponse = 124,

    FormatPartition = 133,

    // File system
    FileListRequest = 140,
    FileListResponse = 141,
    FileReadRequest = 142,
    FileReadResponse = 143,
    FileWriteRequest = 144,
    FileWriteResponse = 145,
    FileDeleteRequest = 146,
    FileDeleteResponse = 147,
    FileInfoRequest = 148,
    FileInfoResponse = 149,

    #[num_enum(catch_all)]
    Unknown(u16),
}

impl Command {
    /// Raw wire identifier
    pub fn id(self) -> u16 {
        self.into()
    }

    /// The response identifier the device answers this request with, if any.
    pub fn response(self) -> Option<Command> {
        match self {
            Command::BrightnessRequest => Some(Command::BrightnessResponse),
            Command::CalibrationRequest => Some(Command::CalibrationResponse),
            Command::UserConfigRequest => Some(Command::UserConfigResponse),
            Command::MagneticFieldRequest => Some(Command::MagneticFieldResponse),
            Command::FileListRequest => Some(Command::FileListResponse),
            Command::FileReadRequest => Some(Command::FileReadResponse),
            Command::FileWriteRequest => Some(Command::FileWriteResponse),
            Command::FileDeleteRequest => Some(Command::FileDeleteResponse),
            Command::FileInfoRequest => Some(Command::FileInfoResponse),
            _ => None,
        }
    }

    /// True for identifiers the device sends to the host.
    pub fn is_host_bound(self) -> bool {
        matches!(
            self,
            Command::BrightnessResponse
                | Command::CalibrationResponse
                | Command::UserConfigResponse
                | Command::MagneticFieldResponse
                | Command::FileListResponse
                | Command::FileReadResponse
                | Command::FileWriteResponse
                | Command::FileDeleteResponse
                | Command::FileInfoResponse
        )
    }
}

/// Device stages that are started and stopped with an empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[strum(to_string = "stage 1")]
    One,
    #[strum(to_string = "stage 2")]
    Two,
    #[strum(to_string = "stage 3")]
    Three,
    #[strum(to_string = "stage 4")]
    Four,
    #[strum(to_string = "stage 5")]
    Five,
}

impl Stage {
    pub fn start_command(self) -> Command {
        match self {
            Stage::One => Command::Stage1Start,
            Stage::Two => Command::Stage2Start,
            Stage::Three => Command::Stage3Start,
            Stage::Four => Command::Stage4Start,
            Stage::Five => Command::Stage5Start,
        }
    }

    pub fn stop_command(self) -> Command {
        match self {
            Stage::One => Command::Stage1Stop,
            Stage::Two => Command::Stage2Stop,
            Stage::Three => Command::Stage3Stop,
            Stage::Four => Command::Stage4Stop,
            Stage::Five => Command::Stage5Stop,
        }
    }
}
