//! Device file-system protocol.
//!
//! Every operation is one request frame answered by one response frame whose
//! first byte is a status (zero means success).
//!
//! ```text
//! list    →  path | 0x00
//!         ←  status:u8 | count:u16 | count × (size:u32 | attr:u8 | name_len:u8 | name)
//! info    →  path | 0x00
//!         ←  status:u8 [| size:u32 | attr:u8]
//! read    →  offset:u32 | len:u16 | path | 0x00
//!         ←  status:u8 | len:u16 | data
//! write   →  offset:u32 | path_len:u8 | path | data
//!         ←  status:u8
//! delete  →  path | 0x00
//!         ←  status:u8
//! ```

use crate::command::Command;
use crate::constants::*;
use crate::error::LinkError;
use crate::frame::Frame;
use crate::records::null_terminated;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Status byte the device answers with on success
pub const STATUS_OK: u8 = 0;

/// File attribute bits, FAT style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileAttributes(pub u8);

impl FileAttributes {
    pub const DIRECTORY: FileAttributes = FileAttributes(FILE_ATTR_DIRECTORY);

    pub fn is_dir(self) -> bool {
        self.0 & FILE_ATTR_DIRECTORY != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileEntry {
    pub name: String,
    pub size: u32,
    pub attributes: FileAttributes,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.attributes.is_dir()
    }
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dir() {
            write!(f, "{:>10}  {}/", "<dir>", self.name)
        } else {
            write!(f, "{:>10}  {}", self.size, self.name)
        }
    }
}

/// Answer to an info request. Size and attributes are only present when the
/// response is long enough to carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FileInfo {
    pub status: u8,
    pub size: Option<u32>,
    pub attributes: Option<FileAttributes>,
}

impl FileInfo {
    pub fn exists(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// One chunk returned by a read request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk {
    pub status: u8,
    pub data: Bytes,
}

fn check_path(path: &str) -> Result<(), LinkError> {
    if path.as_bytes().contains(&0) {
        return Err(LinkError::InvalidArgument(format!(
            "path {path:?} contains a null byte"
        )));
    }
    Ok(())
}

fn put_path(buf: &mut BytesMut, path: &str) {
    buf.put_slice(path.as_bytes());
    buf.put_u8(0);
}

fn path_frame(command: Command, path: &str) -> Result<Frame, LinkError> {
    check_path(path)?;
    let mut buf = BytesMut::with_capacity(path.len() + 1);
    put_path(&mut buf, path);
    Ok(Frame::new(command, buf.freeze())?)
}

pub fn list_request(path: &str) -> Result<Frame, LinkError> {
    path_frame(Command::FileListRequest, path)
}

pub fn info_request(path: &str) -> Result<Frame, LinkError> {
    path_frame(Command::FileInfoRequest, path)
}

pub fn delete_request(path: &str) -> Result<Frame, LinkError> {
    path_frame(Command::FileDeleteRequest, path)
}

pub fn read_request(path: &str, offset: u32, len: u16) -> Result<Frame, LinkError> {
    check_path(path)?;
    let mut buf = BytesMut::with_capacity(6 + path.len() + 1);
    buf.put_u32_le(offset);
    buf.put_u16_le(len);
    put_path(&mut buf, path);
    Ok(Frame::new(Command::FileReadRequest, buf.freeze())?)
}

/// Write request for one chunk. The path is length-prefixed, not terminated.
pub fn write_request(path: &str, offset: u32, data: &[u8]) -> Result<Frame, LinkError> {
    check_path(path)?;
    let path_len = u8::try_from(path.len()).map_err(|_| {
        LinkError::InvalidArgument(format!("path is {} bytes, at most 255 allowed", path.len()))
    })?;
    let mut buf = BytesMut::with_capacity(5 + path.len() + data.len());
    buf.put_u32_le(offset);
    buf.put_u8(path_len);
    buf.put_slice(path.as_bytes());
    buf.put_slice(data);
    Ok(Frame::new(Command::FileWriteRequest, buf.freeze())?)
}

fn short(expected: usize, actual: usize) -> LinkError {
    LinkError::ShortResponse { expected, actual }
}

/// Leading status byte of a write or delete response.
pub fn decode_status(payload: &[u8]) -> Result<u8, LinkError> {
    payload.first().copied().ok_or_else(|| short(1, 0))
}

/// Decode a directory listing. A count that promises more entries than the
/// payload holds yields the entries decoded so far.
pub fn decode_list(payload: &[u8]) -> Result<Vec<FileEntry>, LinkError> {
    if payload.len() < 3 {
        return Err(short(3, payload.len()));
    }
    let mut buf = payload;
    let status = buf.get_u8();
    if status != STATUS_OK {
        return Err(LinkError::DeviceStatus {
            command: Command::FileListResponse,
            status,
        });
    }
    let count = buf.get_u16_le() as usize;
    let mut entries = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        if buf.remaining() < 6 {
            break;
        }
        let size = buf.get_u32_le();
        let attributes = FileAttributes(buf.get_u8());
        let name_len = buf.get_u8() as usize;
        if buf.remaining() < name_len {
            break;
        }
        let name = String::from_utf8_lossy(&buf[..name_len]).into_owned();
        buf.advance(name_len);
        entries.push(FileEntry {
            name,
            size,
            attributes,
        });
    }
    if entries.len() < count {
        debug!(
            declared = count,
            decoded = entries.len(),
            "File list response truncated"
        );
    }
    Ok(entries)
}

pub fn decode_info(payload: &[u8]) -> Result<FileInfo, LinkError> {
    let status = decode_status(payload)?;
    let (size, attributes) = if payload.len() >= 6 {
        let mut rest = &payload[1..];
        (Some(rest.get_u32_le()), Some(FileAttributes(rest.get_u8())))
    } else {
        (None, None)
    };
    Ok(FileInfo {
        status,
        size,
        attributes,
    })
}

/// Decode a read response. A declared length longer than the data present is
/// capped to what arrived.
pub fn decode_read_chunk(payload: &[u8]) -> Result<ReadChunk, LinkError> {
    if payload.len() < 3 {
        return Err(short(3, payload.len()));
    }
    let status = payload[0];
    let declared = u16::from_le_bytes([payload[1], payload[2]]) as usize;
    let available = payload.len() - 3;
    Ok(ReadChunk {
        status,
        data: Bytes::copy_from_slice(&payload[3..3 + declared.min(available)]),
    })
}

/// File-system requests as the device decodes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRequest {
    List { path: String },
    Info { path: String },
    Read { path: String, offset: u32, len: u16 },
    Write { path: String, offset: u32, data: Bytes },
    Delete { path: String },
}

impl TryFrom<&Frame> for FileRequest {
    type Error = LinkError;

    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        let payload = &frame.payload;
        let request = match frame.command {
            Command::FileListRequest => FileRequest::List {
                path: null_terminated(payload),
            },
            Command::FileInfoRequest => FileRequest::Info {
                path: null_terminated(payload),
            },
            Command::FileDeleteRequest => FileRequest::Delete {
                path: null_terminated(payload),
            },
            Command::FileReadRequest => {
                if payload.len() < 6 {
                    return Err(short(6, payload.len()));
                }
                let mut buf = &payload[..];
                let offset = buf.get_u32_le();
                let len = buf.get_u16_le();
                FileRequest::Read {
                    path: null_terminated(buf),
                    offset,
                    len,
                }
            }
            Command::FileWriteRequest => {
                if payload.len() < 5 {
                    return Err(short(5, payload.len()));
                }
                let mut buf = payload.clone();
                let offset = buf.get_u32_le();
                let path_len = buf.get_u8() as usize;
                if buf.remaining() < path_len {
                    return Err(short(5 + path_len, payload.len()));
                }
                let path = String::from_utf8_lossy(&buf[..path_len]).into_owned();
                buf.advance(path_len);
                FileRequest::Write {
                    path,
                    offset,
                    data: buf,
                }
            }
            other => {
                return Err(LinkError::InvalidArgument(format!(
                    "{other:?} is not a file-system request"
                )));
            }
        };
        Ok(request)
    }
}

/// Device-side encoders for file-system responses.
pub mod response {
    use super::*;

    pub fn status(command: Command, status: u8) -> Frame {
        Frame {
            command,
            payload: Bytes::copy_from_slice(&[status]),
        }
    }

    /// Listing response. Entries that would overflow a frame are left out and
    /// the count reflects what was written.
    pub fn list(status: u8, entries: &[FileEntry]) -> Frame {
        let mut body = BytesMut::new();
        let mut count: u16 = 0;
        for entry in entries {
            let name = &entry.name.as_bytes()[..entry.name.len().min(u8::MAX as usize)];
            if 3 + body.len() + 6 + name.len() > MAX_PAYLOAD_SIZE {
                break;
            }
            body.put_u32_le(entry.size);
            body.put_u8(entry.attributes.bits());
            body.put_u8(name.len() as u8);
            body.put_slice(name);
            count += 1;
        }
        let mut buf = BytesMut::with_capacity(3 + body.len());
        buf.put_u8(status);
        buf.put_u16_le(count);
        buf.put_slice(&body);
        Frame {
            command: Command::FileListResponse,
            payload: buf.freeze(),
        }
    }

    pub fn info(status: u8, size: u32, attributes: FileAttributes) -> Frame {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u8(status);
        if status == STATUS_OK {
            buf.put_u32_le(size);
            buf.put_u8(attributes.bits());
        }
        Frame {
            command: Command::FileInfoResponse,
            payload: buf.freeze(),
        }
    }

    pub fn read(status: u8, data: &[u8]) -> Frame {
        let data = &data[..data.len().min(MAX_PAYLOAD_SIZE - 3)];
        let mut buf = BytesMut::with_capacity(3 + data.len());
        buf.put_u8(status);
        buf.put_u16_le(data.len() as u16);
        buf.put_slice(data);
        Frame {
            command: Command::FileReadResponse,
            payload: buf.freeze(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_requests() {
        let frame = list_request("/lines").unwrap();
        assert_eq!(frame.command, Command::FileListRequest);
        assert_eq!(frame.payload.as_ref(), b"/lines\0");
        assert_eq!(info_request("a").unwrap().command.id(), 148);
        assert_eq!(delete_request("a").unwrap().command.id(), 146);
        assert!(matches!(
            list_request("bad\0path"),
            Err(LinkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_request_layout() {
        let frame = read_request("/f.bin", 960, 480).unwrap();
        assert_eq!(
            frame.payload.as_ref(),
            &[0xC0, 0x03, 0, 0, 0xE0, 0x01, b'/', b'f', b'.', b'b', b'i', b'n', 0]
        );
        let decoded = FileRequest::try_from(&frame).unwrap();
        assert_eq!(
            decoded,
            FileRequest::Read {
                path: "/f.bin".into(),
                offset: 960,
                len: 480
            }
        );
    }

    #[test]
    fn test_write_request_layout() {
        let frame = write_request("/x", 256, &[9, 8, 7]).unwrap();
        assert_eq!(frame.payload.as_ref(), &[0, 1, 0, 0, 2, b'/', b'x', 9, 8, 7]);
        assert_eq!(
            FileRequest::try_from(&frame).unwrap(),
            FileRequest::Write {
                path: "/x".into(),
                offset: 256,
                data: Bytes::from_static(&[9, 8, 7])
            }
        );

        let long = "p".repeat(256);
        assert!(matches!(
            write_request(&long, 0, &[]),
            Err(LinkError::InvalidArgument(_))
        ));
        // 255-byte path plus 256 data bytes overflows a frame
        let path = "p".repeat(255);
        assert!(matches!(
            write_request(&path, 0, &[0; 256]),
            Err(LinkError::Frame(_))
        ));
    }

    #[test]
    fn test_decode_list() {
        let entries = vec![
            FileEntry {
                name: "lines".into(),
                size: 0,
                attributes: FileAttributes::DIRECTORY,
            },
            FileEntry {
                name: "poi.bin".into(),
                size: 1234,
                attributes: FileAttributes(0x20),
            },
        ];
        let frame = response::list(STATUS_OK, &entries);
        let decoded = decode_list(&frame.payload).unwrap();
        assert_eq!(decoded, entries);
        assert!(decoded[0].is_dir());
        assert!(!decoded[1].is_dir());
    }

    #[test]
    fn test_decode_list_truncated_returns_prefix() {
        // count says 3, only one full entry and half of the second follow
        let mut payload = vec![0u8, 3, 0];
        payload.extend_from_slice(&10u32.to_le_bytes());
        payload.extend_from_slice(&[0x20, 1, b'a']);
        payload.extend_from_slice(&20u32.to_le_bytes());
        payload.extend_from_slice(&[0x20, 5, b'b', b'c']);
        let entries = decode_list(&payload).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a");
        assert_eq!(entries[0].size, 10);
    }

    #[test]
    fn test_decode_list_errors() {
        assert_eq!(
            decode_list(&[0, 1]),
            Err(LinkError::ShortResponse {
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(
            decode_list(&[4, 0, 0]),
            Err(LinkError::DeviceStatus {
                command: Command::FileListResponse,
                status: 4
            })
        );
    }

    #[test]
    fn test_decode_info() {
        let info = decode_info(&response::info(STATUS_OK, 4096, FileAttributes(0)).payload).unwrap();
        assert!(info.exists());
        assert_eq!(info.size, Some(4096));
        assert_eq!(info.attributes, Some(FileAttributes(0)));

        let missing = decode_info(&[2]).unwrap();
        assert!(!missing.exists());
        assert_eq!(missing.size, None);
        assert!(decode_info(&[]).is_err());
    }

    #[test]
    fn test_decode_read_chunk_caps_length() {
        let chunk = decode_read_chunk(&[0, 10, 0, 1, 2, 3]).unwrap();
        assert_eq!(chunk.status, 0);
        assert_eq!(chunk.data.as_ref(), &[1, 2, 3]);

        let frame = response::read(STATUS_OK, &[5; 480]);
        let chunk = decode_read_chunk(&frame.payload).unwrap();
        assert_eq!(chunk.data.len(), 480);
        assert!(decode_read_chunk(&[0, 1]).is_err());
    }
}
