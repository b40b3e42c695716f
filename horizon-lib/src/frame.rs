//! Frame encoding and decoding.
//!
//! Every message on the link is wrapped in a frame:
//!
//! ```text
//! +------+------+---------+---------+----------------+------+
//! | 0xAA | 0x55 | CMD LE16| LEN LE16| PAYLOAD 0..512 | CRC8 |
//! +------+------+---------+---------+----------------+------+
//! ```
//!
//! The trailing byte is the two's-complement negation of the byte sum of the
//! command, length and payload fields. All functions here are pure.

use crate::command::Command;
use crate::constants::*;
use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::FromPrimitive;

/// A command identifier with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(command: Command, payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { command, payload })
    }

    /// A frame with no payload
    pub fn empty(command: Command) -> Self {
        Self {
            command,
            payload: Bytes::new(),
        }
    }

    /// Wire encoding of this frame
    pub fn encode(&self) -> Bytes {
        encode_unchecked(self.command.id(), &self.payload)
    }

    /// Size of the frame on the wire
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// A frame recognized in a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub frame: Frame,
    /// Bytes to drop from the front of the buffer, leading garbage included.
    pub consumed: usize,
}

/// Checksum over the command, length and payload fields.
pub fn compute_checksum(command: u16, length: u16, payload: &[u8]) -> u8 {
    let [cmd_lo, cmd_hi] = command.to_le_bytes();
    let [len_lo, len_hi] = length.to_le_bytes();
    let sum = payload
        .iter()
        .fold(
            cmd_lo
                .wrapping_add(cmd_hi)
                .wrapping_add(len_lo)
                .wrapping_add(len_hi),
            |acc, &b| acc.wrapping_add(b),
        );
    sum.wrapping_neg()
}

/// Build a complete frame. Fails only when the payload exceeds 512 bytes.
pub fn build_frame(command: u16, payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(encode_unchecked(command, payload))
}

fn encode_unchecked(command: u16, payload: &[u8]) -> Bytes {
    let length = payload.len() as u16;
    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
    buf.put_slice(&SYNC_MARKER);
    buf.put_u16_le(command);
    buf.put_u16_le(length);
    buf.put_slice(payload);
    buf.put_u8(compute_checksum(command, length, payload));
    buf.freeze()
}

/// Position of the first sync marker at or after `from`.
pub(crate) fn find_sync(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(SYNC_MARKER.len())
        .position(|w| w == SYNC_MARKER)
        .map(|p| p + from)
}

/// Parse the first frame in `buf`.
///
/// Leading bytes before the first sync marker are skipped and counted in
/// [`ParsedFrame::consumed`]. Errors report the offset of the candidate sync
/// marker so a caller can resynchronize past it.
pub fn parse_frame(buf: &[u8]) -> Result<ParsedFrame, FrameError> {
    let Some(start) = find_sync(buf, 0) else {
        // A trailing 0xAA may be the first half of a sync marker.
        let keep = usize::from(buf.last() == Some(&SYNC_MARKER[0]));
        return Err(FrameError::Incomplete {
            offset: buf.len() - keep,
        });
    };

    let frame_bytes = &buf[start..];
    if frame_bytes.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::Incomplete { offset: start });
    }

    let command = u16::from_le_bytes([frame_bytes[2], frame_bytes[3]]);
    let length = u16::from_le_bytes([frame_bytes[4], frame_bytes[5]]);
    let payload_len = length as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(FrameError::Oversized {
            offset: start,
            length: payload_len,
        });
    }

    let total = FRAME_OVERHEAD + payload_len;
    if frame_bytes.len() < total {
        return Err(FrameError::Incomplete { offset: start });
    }

    let payload = &frame_bytes[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_len];
    let expected = compute_checksum(command, length, payload);
    let actual = frame_bytes[total - 1];
    if expected != actual {
        return Err(FrameError::ChecksumInvalid {
            offset: start,
            expected,
            actual,
        });
    }

    Ok(ParsedFrame {
        frame: Frame {
            command: Command::from_primitive(command),
            payload: Bytes::copy_from_slice(payload),
        },
        consumed: start + total,
    })
}
