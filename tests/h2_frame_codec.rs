//! HTTP/2 frame codec tests against published frame test vectors
//!
//! Each well-formed vector is decoded with `FrameDecoder` and, where the
//! encoder can produce the same frame, re-encoded with `FrameEncoder` and
//! compared byte for byte.

use h2mux::http::h2::frames::*;
use h2mux::http::h2::{Error, ErrorCode, FrameDecoder, FrameEncoder, Scope};
use std::io::Cursor;

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn decode_one(wire: &[u8]) -> h2mux::http::h2::Result<Frame> {
    let mut decoder = FrameDecoder::new(Cursor::new(wire.to_vec()), 16384);
    Ok(decoder.read_frame()?.expect("one frame"))
}

fn encode(f: impl FnOnce(&mut FrameEncoder<Vec<u8>>)) -> Vec<u8> {
    let mut encoder = FrameEncoder::new(Vec::new(), 16384);
    f(&mut encoder);
    encoder.flush().unwrap();
    encoder.get_ref().clone()
}

fn protocol_code(err: Error) -> (ErrorCode, Scope) {
    match err {
        Error::Protocol(e) => (e.code, e.scope),
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[test]
fn test_data_frame() {
    let wire = hex("00000D00010000000148656C6C6F2C20776F726C6421");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::Data));
    assert!(frame.flags.is_end_stream());
    assert_eq!(frame.stream_id, 1);
    assert_eq!(&frame.payload[..], b"Hello, world!");

    assert_eq!(encode(|e| e.write_data(1, b"Hello, world!", true).unwrap()), wire);
}

#[test]
fn test_data_frame_padded() {
    let wire = hex("0000140008000000020648656C6C6F2C20776F726C6421486F77647921");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::Data));
    assert!(frame.flags.is_padded());
    assert_eq!(frame.stream_id, 2);
    assert_eq!(frame.payload_len(), 20);
    assert_eq!(strip_padding(frame.flags, &frame.payload).unwrap(), b"Hello, world!");
}

#[test]
fn test_data_frame_padding_too_long() {
    // pad length 0x14 with only 19 bytes following
    let wire = hex("0000140008000000021448656C6C6F2C20776F726C6421486F77647921");
    let frame = decode_one(&wire).unwrap();
    let err = strip_padding(frame.flags, &frame.payload).unwrap_err();
    assert_eq!(protocol_code(err), (ErrorCode::ProtocolError, Scope::Connection));
}

#[test]
fn test_data_frame_on_stream_zero() {
    let wire = hex(concat!("00000D000100000000", "48656C6C6F2C20776F726C6421"));
    let err = decode_one(&wire).unwrap_err();
    assert_eq!(protocol_code(err), (ErrorCode::ProtocolError, Scope::Connection));
}

#[test]
fn test_headers_frame() {
    let wire = hex("00000D010400000001746869732069732064756D6D79");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::Headers));
    assert!(frame.flags.is_end_headers());
    let (priority, fragment) = headers_fragment(frame.flags, &frame.payload).unwrap();
    assert!(priority.is_none());
    assert_eq!(fragment, b"this is dummy");

    assert_eq!(encode(|e| e.write_headers(1, b"this is dummy", false).unwrap()), wire);
}

#[test]
fn test_headers_frame_with_priority_and_padding() {
    let wire = hex(concat!(
        "000022012C000000030F000000140A",
        "746869732069732064756D6D79",
        "546869732069732070616464696E67"
    ));
    let frame = decode_one(&wire).unwrap();
    assert!(frame.flags.is_padded());
    assert!(frame.flags.is_priority());
    assert!(frame.flags.is_end_headers());
    let (priority, fragment) = headers_fragment(frame.flags, &frame.payload).unwrap();
    let priority = priority.unwrap();
    assert_eq!(priority.stream_dependency, 20);
    assert!(!priority.exclusive);
    assert_eq!(priority.weight, 10);
    assert_eq!(fragment, b"this is dummy");
}

#[test]
fn test_headers_with_continuation() {
    let mut wire = hex(concat!("000005010000000001", "7468697320"));
    wire.extend(hex(concat!("000008090400000001", "69732064756D6D79")));

    let mut decoder = FrameDecoder::new(Cursor::new(wire.clone()), 16384);
    let header = decoder.next_frame().unwrap().unwrap();
    assert!(!header.flags.is_end_headers());
    let payload = decoder.read_payload().unwrap();
    let block = decoder.read_header_block(1, &payload).unwrap();
    assert_eq!(block, b"this is dummy");
    assert_eq!(decoder.header_block_size(), 13);
    assert!(decoder.next_frame().unwrap().is_none());

    let encoded = encode(|e| {
        e.write_frame(FrameType::Headers.as_u8(), FrameFlags::from_u8(0), 1, b"this ").unwrap();
        e.write_frame(FrameType::Continuation.as_u8(), FrameFlags::from_u8(0x4), 1, b"is dummy").unwrap();
    });
    assert_eq!(encoded, wire);
}

#[test]
fn test_priority_frame() {
    let wire = hex("0000050200000000090000000B07");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::Priority));
    assert_eq!(frame.stream_id, 9);
    let priority = PrioritySpec::parse(&frame.payload).unwrap();
    assert_eq!(priority.stream_dependency, 11);
    assert_eq!(priority.weight, 7);

    let encoded = encode(|e| {
        e.write_frame(FrameType::Priority.as_u8(), frame.flags, 9, &frame.payload).unwrap();
    });
    assert_eq!(encoded, wire);
}

#[test]
fn test_priority_frame_wrong_length() {
    let wire = hex("0000040200000000090000000B");
    let err = decode_one(&wire).unwrap_err();
    assert_eq!(protocol_code(err).0, ErrorCode::FrameSizeError);
}

#[test]
fn test_rst_stream_frame() {
    let wire = hex("00000403000000000500000008");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::RstStream));
    assert_eq!(frame.stream_id, 5);
    assert_eq!(parse_rst_stream(&frame.payload).unwrap(), ErrorCode::Cancel.as_u32());

    assert_eq!(encode(|e| e.write_rst_stream(5, 8).unwrap()), wire);
}

#[test]
fn test_rst_stream_on_stream_zero() {
    let wire = hex("00000403000000000000000008");
    let err = decode_one(&wire).unwrap_err();
    assert_eq!(protocol_code(err).0, ErrorCode::ProtocolError);
}

#[test]
fn test_settings_frame() {
    let wire = hex("00000C040000000000000100002000000300001388");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::Settings));
    assert_eq!(parse_settings(&frame.payload).unwrap(), vec![(1, 8192), (3, 5000)]);

    assert_eq!(encode(|e| e.write_settings(&[1, 8192, 3, 5000]).unwrap()), wire);
}

#[test]
fn test_settings_frame_errors() {
    // non-zero stream id
    let err = decode_one(&hex("000006040000000001000100002000")).unwrap_err();
    assert_eq!(protocol_code(err).0, ErrorCode::ProtocolError);

    // length not a multiple of six
    let err = decode_one(&hex("0000030400000000000001FF")).unwrap_err();
    assert_eq!(protocol_code(err).0, ErrorCode::FrameSizeError);

    // ACK with a payload
    let err = decode_one(&hex("000006040100000000000100002000")).unwrap_err();
    assert_eq!(protocol_code(err).0, ErrorCode::FrameSizeError);
}

#[test]
fn test_settings_ack() {
    let wire = hex("000000040100000000");
    let frame = decode_one(&wire).unwrap();
    assert!(frame.flags.is_ack());
    assert_eq!(frame.payload_len(), 0);

    assert_eq!(encode(|e| e.write_settings_ack().unwrap()), wire);
}

#[test]
fn test_push_promise_frame() {
    let wire = hex("000018050C0000000A060000000C746869732069732064756D6D79486F77647921");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::PushPromise));
    let promise = PushPromise::parse(frame.flags, &frame.payload).unwrap();
    assert_eq!(promise.promised_stream_id, 12);
    assert_eq!(promise.fragment, b"this is dummy");

    let encoded = encode(|e| {
        e.write_frame(FrameType::PushPromise.as_u8(), FrameFlags::from_u8(0x0C), 10, &frame.payload).unwrap();
    });
    assert_eq!(encoded, wire);
}

#[test]
fn test_ping_frame() {
    let wire = hex("0000080600000000006465616462656566");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::Ping));
    assert_eq!(&parse_ping(&frame.payload).unwrap(), b"deadbeef");

    assert_eq!(encode(|e| e.write_ping(false, *b"deadbeef").unwrap()), wire);
}

#[test]
fn test_ping_frame_errors() {
    let err = decode_one(&hex("00000706000000000064656164626565")).unwrap_err();
    assert_eq!(protocol_code(err).0, ErrorCode::FrameSizeError);

    let err = decode_one(&hex("0000080600000000036465616462656566")).unwrap_err();
    assert_eq!(protocol_code(err).0, ErrorCode::ProtocolError);
}

#[test]
fn test_goaway_frame() {
    let wire = hex("0000170700000000000000001E00000009687061636B2069732062726F6B656E");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::Goaway));
    let goaway = GoawayFrame::parse(&frame.payload).unwrap();
    assert_eq!(goaway.last_stream_id, 30);
    assert_eq!(goaway.error_code, ErrorCode::CompressionError.as_u32());
    assert_eq!(goaway.debug_text(), "hpack is broken");

    assert_eq!(encode(|e| e.write_goaway(30, 9, Some("hpack is broken")).unwrap()), wire);
}

#[test]
fn test_window_update_frame() {
    let wire = hex("000004080000000001000003E8");
    let frame = decode_one(&wire).unwrap();
    assert_eq!(frame.kind(), Some(FrameType::WindowUpdate));
    assert_eq!(parse_window_update(frame.stream_id, &frame.payload).unwrap(), 1000);

    assert_eq!(encode(|e| e.write_window_update(1, 1000).unwrap()), wire);
}

#[test]
fn test_window_update_zero_increment() {
    let frame = decode_one(&hex("00000408000000000100000000")).unwrap();
    let err = parse_window_update(frame.stream_id, &frame.payload).unwrap_err();
    assert_eq!(protocol_code(err), (ErrorCode::ProtocolError, Scope::Stream(1)));

    let frame = decode_one(&hex("00000408000000000000000000")).unwrap();
    let err = parse_window_update(frame.stream_id, &frame.payload).unwrap_err();
    assert_eq!(protocol_code(err), (ErrorCode::ProtocolError, Scope::Connection));
}

#[test]
fn test_continuation_on_stream_zero() {
    let err = decode_one(&hex(concat!("000005090400000000", "7468697320"))).unwrap_err();
    assert_eq!(protocol_code(err).0, ErrorCode::ProtocolError);
}

#[test]
fn test_unknown_frame_type_is_readable() {
    let mut wire = hex("0000030A0000000001ABCDEF");
    wire.extend(hex("0000080600000000006465616462656566"));
    let mut decoder = FrameDecoder::new(Cursor::new(wire), 16384);

    let unknown = decoder.next_frame().unwrap().unwrap();
    assert_eq!(unknown.kind(), None);
    assert_eq!(frame_type_name(unknown.frame_type), "UNKNOWN(10)");

    let ping = decoder.next_frame().unwrap().unwrap();
    assert_eq!(ping.kind(), Some(FrameType::Ping));
}
