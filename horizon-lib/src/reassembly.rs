//! Notification reassembly.
//!
//! Notifications arrive as fragments of an unordered byte stream that may
//! split frames at any point and may carry garbage between them. The buffer
//! accumulates fragments and hands out every checksum-valid frame it can find,
//! resynchronizing past corrupt or false sync markers.

use crate::constants::{MAX_FRAME_SIZE, SYNC_MARKER};
use crate::error::FrameError;
use crate::frame::{Frame, find_sync, parse_frame};
use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ReassemblyBuffer {
    buffer: BytesMut,
    capacity: usize,
    dropped: usize,
    resyncs: usize,
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_REASSEMBLY_CAPACITY)
    }
}

impl ReassemblyBuffer {
    /// Create a buffer bounded to `capacity` bytes (at least one maximum frame).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MAX_FRAME_SIZE);
        Self {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            dropped: 0,
            resyncs: 0,
        }
    }

    /// Append a notification fragment.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete, checksum-valid frame.
    ///
    /// Returns `None` once the remaining bytes cannot yet form a frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match parse_frame(&self.buffer) {
                Ok(parsed) => {
                    let garbage = parsed.consumed - parsed.frame.wire_len();
                    if garbage > 0 {
                        debug!(garbage, "Skipped bytes before frame");
                        self.dropped += garbage;
                    }
                    self.buffer.advance(parsed.consumed);
                    return Some(parsed.frame);
                }
                Err(FrameError::Incomplete { offset }) => {
                    self.discard(offset);
                    if self.buffer.len() <= self.capacity {
                        return None;
                    }
                    self.drop_oldest();
                }
                Err(FrameError::ChecksumInvalid {
                    offset,
                    expected,
                    actual,
                }) => {
                    warn!(
                        offset,
                        expected, actual, "Checksum mismatch, resynchronizing"
                    );
                    self.resyncs += 1;
                    self.discard(offset + 1);
                }
                Err(FrameError::Oversized { offset, length }) => {
                    warn!(offset, length, "False sync marker, resynchronizing");
                    self.resyncs += 1;
                    self.discard(offset + 1);
                }
                Err(FrameError::PayloadTooLarge { .. }) => {
                    // not produced by parse_frame
                    self.clear();
                    return None;
                }
            }
        }
    }

    /// Pop every frame currently available.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Drop the oldest bytes up to the next sync marker, or everything if there is none.
    fn drop_oldest(&mut self) {
        let cut = find_sync(&self.buffer, 1).unwrap_or(self.buffer.len());
        warn!(
            buffered = self.buffer.len(),
            capacity = self.capacity,
            cut,
            "Reassembly buffer overflow, dropping oldest bytes"
        );
        self.discard(cut);
    }

    fn discard(&mut self, count: usize) {
        let count = count.min(self.buffer.len());
        if count > 0 {
            self.buffer.advance(count);
            self.dropped += count;
        }
    }

    pub fn clear(&mut self) {
        self.dropped += self.buffer.len();
        self.buffer.clear();
    }

    /// Number of bytes currently buffered
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes discarded so far as garbage, corrupt frames or overflow
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }

    /// Number of times the parser skipped a bad sync marker
    pub fn resync_count(&self) -> usize {
        self.resyncs
    }

    /// True if the buffer currently begins with a sync marker
    pub fn starts_with_sync(&self) -> bool {
        self.buffer.starts_with(&SYNC_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::frame::build_frame;

    #[test]
    fn test_fragmented_frame() {
        let encoded = build_frame(Command::FileInfoResponse.id(), &[0, 1, 2, 3, 4, 5]).unwrap();
        let mut buffer = ReassemblyBuffer::default();
        for byte in encoded.iter().take(encoded.len() - 1) {
            buffer.push(&[*byte]);
            assert!(buffer.next_frame().is_none());
        }
        buffer.push(&encoded[encoded.len() - 1..]);
        let frame = buffer.next_frame().expect("frame after final byte");
        assert_eq!(frame.command, Command::FileInfoResponse);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_back_to_back_frames_with_garbage() {
        let a = build_frame(86, &[0x10, 0x00]).unwrap();
        let b = build_frame(149, &[0x00]).unwrap();
        let mut buffer = ReassemblyBuffer::default();
        buffer.push(&[0x01, 0x02]);
        buffer.push(&a);
        buffer.push(&[0xAA, 0x00]);
        buffer.push(&b);
        let frames = buffer.drain_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::BrightnessResponse);
        assert_eq!(frames[1].command, Command::FileInfoResponse);
        assert_eq!(buffer.dropped_bytes(), 4);
    }

    #[test]
    fn test_resync_after_corrupt_frame() {
        let mut corrupt = build_frame(86, &[0x10, 0x00]).unwrap().to_vec();
        let last = corrupt.len() - 1;
        corrupt[last] = corrupt[last].wrapping_add(1);
        let good = build_frame(122, &[7; 4]).unwrap();

        let mut buffer = ReassemblyBuffer::default();
        buffer.push(&corrupt);
        buffer.push(&good);
        let frames = buffer.drain_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::UserConfigResponse);
        assert_eq!(buffer.resync_count(), 1);
    }

    #[test]
    fn test_garbage_never_grows_unbounded() {
        let mut buffer = ReassemblyBuffer::new(0);
        assert_eq!(buffer.capacity(), MAX_FRAME_SIZE);
        for _ in 0..100 {
            buffer.push(&[0x11; 64]);
            assert!(buffer.next_frame().is_none());
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_false_sync_with_huge_length_is_skipped() {
        let good = build_frame(86, &[0x20, 0x00]).unwrap();
        let mut buffer = ReassemblyBuffer::default();
        buffer.push(&[0xAA, 0x55, 0x01, 0x00, 0x00, 0x40]);
        buffer.push(&good);
        let frame = buffer.next_frame().expect("valid frame after false sync");
        assert_eq!(frame.payload.as_ref(), &[0x20, 0x00]);
    }

    #[test]
    fn test_partial_sync_marker_is_kept() {
        let good = build_frame(86, &[0x20, 0x00]).unwrap();
        let mut buffer = ReassemblyBuffer::default();
        buffer.push(&[0x00, 0x00, 0xAA]);
        assert!(buffer.next_frame().is_none());
        assert!(!buffer.starts_with_sync());
        buffer.push(&good[1..]);
        assert!(buffer.starts_with_sync());
        assert!(buffer.next_frame().is_some());
    }
}
