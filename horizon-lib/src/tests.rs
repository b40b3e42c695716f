use crate::command::Command;
use crate::entities::{LinePoint, LineSegment};
use crate::error::FrameError;
use crate::frame::{Frame, build_frame, parse_frame};
use crate::fs;
use crate::message::Request;
use crate::reassembly::ReassemblyBuffer;
use crate::transfer;
use bytes::Bytes;
use num_enum::FromPrimitive;

#[test]
fn test_flush_start_aa5524000100_00db() {
    let expected = hex::decode("aa552400010000db").expect("Failed to decode hex");
    assert_eq!(
        Request::FlushStart.to_frame().encode().as_ref(),
        expected.as_slice(),
        "Flush start frame does not match the captured bytes"
    );
}

#[test]
fn test_brightness_request_aa5555000000ab() {
    let bytes = build_frame(85, &[]).unwrap();
    assert_eq!(hex::encode(&bytes), "aa5555000000ab");
    assert_eq!(bytes.len(), 7);
}

#[test]
fn test_parse_brightness_response() {
    // brightness 300, checksum = -(86 + 2 + 0x2c + 0x01) = 0x7b
    let hex_data = "aa55560002002c017b";
    let bytes_data = hex::decode(hex_data).expect("Failed to decode hex");
    let parsed = parse_frame(&bytes_data).expect("Failed to parse frame");
    assert_eq!(parsed.consumed, 9);
    assert_eq!(parsed.frame.command, Command::BrightnessResponse);
    assert_eq!(parsed.frame.payload.as_ref(), &[0x2c, 0x01]);
}

#[test]
fn test_ten_zero_bytes_frame() {
    let bytes = build_frame(1, &[0; 10]).unwrap();
    assert_eq!(bytes.len(), 17);
    assert_eq!(hex::encode(&bytes[..6]), "aa5501000a00");
    assert_eq!(bytes[16], 0xF5);
}

#[test]
fn test_unknown_command_round_trips() {
    let bytes = build_frame(999, &[7]).unwrap();
    let parsed = parse_frame(&bytes).unwrap();
    assert_eq!(parsed.frame.command, Command::Unknown(999));
    assert_eq!(Command::from_primitive(999).id(), 999);
}

#[test]
fn test_max_payload_boundary() {
    assert!(build_frame(1, &[0xFF; 512]).is_ok());
    assert_eq!(
        build_frame(1, &[0xFF; 513]),
        Err(FrameError::PayloadTooLarge { len: 513, max: 512 })
    );
}

#[test]
fn test_garbage_then_frames_through_buffer() {
    let frame = hex::decode("aa552400010001da").expect("Failed to decode hex");
    let mut stream = hex::decode("0011aa22").unwrap();
    stream.extend_from_slice(&frame);
    stream.extend_from_slice(&frame);

    let mut buffer = ReassemblyBuffer::default();
    for byte in stream {
        buffer.push(&[byte]);
    }
    let frames = buffer.drain_frames();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f == &Request::FlushEnd.to_frame()));
    assert!(buffer.is_empty());
}

#[test]
fn test_line_upload_frames_hex() {
    let line = LineSegment::from_points(1, vec![LinePoint::new(90.0, 2.0)]);
    let frames = transfer::line_frames(&line);
    assert_eq!(
        hex::encode(&frames[0].payload),
        // reserved, index 1, width 4, min 90.0, max 90.0, one point
        "00000100040000b4420000b44201000000"
    );
    assert_eq!(
        hex::encode(&frames[1].payload),
        // index 1, one point, 90.0, 2.0
        "010001000000b44200000040"
    );
}

#[test]
fn test_file_read_response_hex() {
    let frame = fs::response::read(0, b"abc");
    assert_eq!(hex::encode(&frame.payload), "000300616263");
    let chunk = fs::decode_read_chunk(&frame.payload).unwrap();
    assert_eq!(chunk.data, Bytes::from_static(b"abc"));
}

#[test]
fn test_frame_new_rejects_large_payload() {
    assert!(matches!(
        Frame::new(Command::FileWriteRequest, vec![0u8; 600]),
        Err(FrameError::PayloadTooLarge { len: 600, .. })
    ));
}
