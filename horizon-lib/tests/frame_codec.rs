//! Frame codec properties

mod common;

use common::*;
use horizon_lib::frame::compute_checksum;
use horizon_lib::reassembly::ReassemblyBuffer;

#[test]
fn test_build_parse_round_trip() {
    let payloads: Vec<Vec<u8>> = vec![
        vec![],
        vec![0x00],
        (0..=255).collect(),
        vec![0xAA, 0x55, 0xAA, 0x55],
        vec![0xFF; 512],
    ];
    for command in [1u16, 36, 86, 149, 0xFFFF] {
        for payload in &payloads {
            let bytes = build_frame(command, payload).expect("Failed to build frame");
            assert_eq!(bytes.len(), 7 + payload.len());
            let parsed = parse_frame(&bytes).expect("Failed to parse frame");
            assert_eq!(parsed.frame.command.id(), command);
            assert_eq!(parsed.frame.payload.as_ref(), payload.as_slice());
            assert_eq!(parsed.consumed, 7 + payload.len());
        }
    }
}

#[test]
fn test_checksum_known_value() {
    assert_eq!(compute_checksum(36, 1, &[0x00]), 219);
    let bytes = build_frame(36, &[0x00]).unwrap();
    assert_eq!(bytes[bytes.len() - 1], 219);
}

#[test]
fn test_frame_sizes() {
    assert_eq!(build_frame(1, &[0; 10]).unwrap().len(), 17);
    assert_eq!(build_frame(85, &[]).unwrap().len(), 7);
}

#[test]
fn test_flipped_checksum_is_rejected() {
    for payload in [&[][..], &[1, 2, 3][..], &[0xAA; 40][..]] {
        let mut bytes = build_frame(120, payload).unwrap().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        match parse_frame(&bytes) {
            Err(FrameError::ChecksumInvalid { offset: 0, .. }) => {}
            other => panic!("Expected checksum rejection, got {other:?}"),
        }
    }
}

#[test]
fn test_leading_garbage_is_skipped() {
    let frame = build_frame(86, &[0x10, 0x00]).unwrap();
    for garbage in [vec![0x00], vec![0x55, 0x55, 0x01], vec![0xAA, 0x00, 0xAA, 0x54]] {
        let mut bytes = garbage.clone();
        bytes.extend_from_slice(&frame);
        let parsed = parse_frame(&bytes).expect("Failed to find frame after garbage");
        assert_eq!(parsed.frame.command, Command::BrightnessResponse);
        assert_eq!(parsed.consumed, garbage.len() + frame.len());
    }
}

#[test]
fn test_four_byte_prefix_is_incomplete() {
    let frame = build_frame(86, &[0x10, 0x00]).unwrap();
    for len in 0..frame.len() {
        match parse_frame(&frame[..len]) {
            Err(FrameError::Incomplete { .. }) => {}
            other => panic!("{len} bytes: expected Incomplete, got {other:?}"),
        }
    }
}

#[test]
fn test_corrupt_frame_then_valid_frame_via_buffer() {
    let mut bad = build_frame(120, &[9; 20]).unwrap().to_vec();
    bad[10] ^= 0x01;
    let good = build_frame(122, &[1, 2]).unwrap();

    let mut buffer = ReassemblyBuffer::default();
    buffer.push(&bad);
    buffer.push(&good);
    let frames = buffer.drain_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command, Command::UserConfigResponse);
    assert_eq!(buffer.resync_count(), 1);
}

#[test]
fn test_buffer_stays_bounded_on_noise() {
    let mut buffer = ReassemblyBuffer::new(1024);
    // a sync marker claiming a 500-byte payload, then no end in sight
    let mut noise = vec![0xAA, 0x55, 0x01, 0x00, 0xF4, 0x01];
    noise.extend(std::iter::repeat_n(0x11, 5000));
    for chunk in noise.chunks(20) {
        buffer.push(chunk);
        assert!(buffer.next_frame().is_none());
        assert!(buffer.len() <= 1024);
    }
    let good = build_frame(86, &[5, 0]).unwrap();
    buffer.push(&good);
    let frames = buffer.drain_frames();
    assert_eq!(frames.last().map(|f| f.command), Some(Command::BrightnessResponse));
}
