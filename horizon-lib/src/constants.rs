// Protocol constants for the Horizon link

use std::time::Duration;

/// Two-byte sync marker that starts every frame
pub const SYNC_MARKER: [u8; 2] = [0xAA, 0x55];

/// Sync marker, command (2 bytes) and length (2 bytes)
pub const FRAME_HEADER_SIZE: usize = 6;

/// Trailing checksum byte
pub const FRAME_TRAILER_SIZE: usize = 1;

/// Header plus trailer, i.e. the size of a frame with an empty payload
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE;

/// Largest payload a single frame may carry
pub const MAX_PAYLOAD_SIZE: usize = 512;

/// Largest complete frame on the wire
pub const MAX_FRAME_SIZE: usize = FRAME_OVERHEAD + MAX_PAYLOAD_SIZE;

/// Transfer unit requested from the link during the handshake
pub const DEFAULT_MTU: u16 = 512;

/// Default bound of the notification reassembly buffer
pub const DEFAULT_REASSEMBLY_CAPACITY: usize = 4 * MAX_FRAME_SIZE;

/// Points carried by one line coordinate frame (60 × 8 bytes = 480 bytes)
pub const POINTS_PER_CHUNK: usize = 60;

/// Size of one encoded (azimuth, altitude) pair
pub const POINT_SIZE: usize = 8;

/// Coordinate width announced in the line descriptor (bytes per float)
pub const COORDINATE_WIDTH: u8 = 4;

/// Bytes requested per file read
pub const FILE_READ_CHUNK_SIZE: usize = 480;

/// Bytes carried per file write
pub const FILE_WRITE_CHUNK_SIZE: usize = 256;

/// Attribute bit marking a directory entry
pub const FILE_ATTR_DIRECTORY: u8 = 0x10;

/// Number of azimuth sectors used to bucket points of interest
pub const SECTOR_COUNT: u8 = 32;

/// Width of one azimuth sector in degrees
pub const SECTOR_WIDTH_DEG: f32 = 360.0 / SECTOR_COUNT as f32;

/// Size of the brightness response (16-bit unsigned)
pub const BRIGHTNESS_RECORD_SIZE: usize = 2;

/// Size of the magnetic-field response record
pub const MAGNETIC_FIELD_RECORD_SIZE: usize = 17;

/// Size of the calibration response record
pub const CALIBRATION_RECORD_SIZE: usize = 98;

/// Size of the user configuration response record
pub const USER_CONFIG_RECORD_SIZE: usize = 68;

/// Size of the null-terminated device name field inside the user configuration
pub const DEVICE_NAME_SIZE: usize = 32;

/// Write acknowledgement timeout
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default time to wait for a correlated response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default time allowed for the connect handshake to reach `Ready`
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
