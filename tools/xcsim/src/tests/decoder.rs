use std::time::Duration;

use os_trace::{encode_frame, MemoryBackend, TraceConfig, TraceRecord, Tracer};

use crate::{DecodeError, HdlcDecoder, TraceFrame};

fn record(seq: u8, record_type: u8, payload: &[u8]) -> TraceRecord {
    TraceRecord {
        seq,
        record_type,
        timestamp: None,
        payload: payload.to_vec(),
    }
}

#[test]
fn decoder_roundtrip() {
    let backend = MemoryBackend::new();
    let mut tracer = Tracer::new(TraceConfig::default(), backend.clone());

    tracer
        .record(0x42, &[0xDE, 0xAD, 0xBE, 0xEF], true)
        .unwrap();

    let frames = backend.take_frames();
    assert_eq!(frames.len(), 1);

    let mut decoder = HdlcDecoder::new(true);
    let decoded = decoder.push_bytes(&frames[0]).unwrap();

    assert_eq!(decoded.len(), 1);
    let TraceFrame {
        seq,
        record_type,
        timestamp,
        payload,
    } = &decoded[0];

    assert_eq!(*seq, 1);
    assert_eq!(*record_type, 0x42);
    assert!(timestamp.is_some());
    assert_eq!(payload, &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn timestamp_is_read_in_microseconds() {
    let mut traced = record(7, 0x10, &[1]);
    traced.timestamp = Some(Duration::from_micros(1_500));

    let mut decoder = HdlcDecoder::new(true);
    let decoded = decoder.push_bytes(&encode_frame(&traced)).unwrap();
    assert_eq!(decoded[0].timestamp, Some(Duration::from_micros(1_500)));
    assert_eq!(decoded[0].payload, vec![1]);
}

#[test]
fn escaped_bytes_survive() {
    let payload = [0x7E, 0x7D, 0x00, 0x7E];
    let bytes = encode_frame(&record(0x7E, 0x7D, &payload));

    let mut decoder = HdlcDecoder::new(false);
    let decoded = decoder.push_bytes(&bytes).unwrap();
    assert_eq!(
        decoded,
        vec![TraceFrame {
            seq: 0x7E,
            record_type: 0x7D,
            timestamp: None,
            payload: payload.to_vec(),
        }]
    );
}

#[test]
fn frames_may_arrive_in_pieces() {
    let mut bytes = encode_frame(&record(1, 56, &[0, 1, 0]));
    bytes.extend(encode_frame(&record(2, 57, &[0, 1, 0])));
    let (head, tail) = bytes.split_at(4);

    let mut decoder = HdlcDecoder::new(false);
    assert!(decoder.push_bytes(head).unwrap().is_empty());
    let decoded = decoder.push_bytes(tail).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].seq, 1);
    assert_eq!(decoded[1].record_type, 57);
}

#[test]
fn detects_bad_checksum() {
    let mut decoder = HdlcDecoder::new(false);
    // seq=1, record=0x10, wrong checksum, FLAG terminator
    let frame = [0x01, 0x10, 0x00, 0x7E];
    let err = decoder.push_bytes(&frame).unwrap_err();
    assert!(matches!(err, DecodeError::InvalidChecksum { .. }));
}

#[test]
fn frame_without_room_for_the_timestamp_is_too_short() {
    let bytes = encode_frame(&record(1, 16, &[]));
    let mut decoder = HdlcDecoder::new(true);
    assert_eq!(
        decoder.push_bytes(&bytes),
        Err(DecodeError::FrameTooShort(3))
    );
}
