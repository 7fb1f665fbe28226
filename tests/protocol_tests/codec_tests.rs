//! Tests for the wire codec
//!
//! These tests verify:
//! - Exact request encoding, binary arguments included
//! - Nil versus empty for bulk strings and arrays
//! - Incremental decoding at every split point
//! - Rejection of malformed input
//! - RESP3 reply kinds
//! - Frame boundary scanning over a growing buffer

use std::io::Cursor;

use bytes::Bytes;
use redwire::protocol::{
    decode, decode_frame, encode_command, encode_commands, encode_frame, Command, Decoded,
    Frame, FrameScanner, MAX_DEPTH,
};
use redwire::RedwireError;

// =============================================================================
// Helper Functions
// =============================================================================

fn decode_all(bytes: &[u8]) -> Frame {
    let (frame, used) = decode_frame(bytes).unwrap().expect("complete frame");
    assert_eq!(used, bytes.len(), "frame should consume the whole input");
    frame
}

fn assert_malformed(bytes: &[u8]) {
    let mut cursor = Cursor::new(bytes);
    match decode(&mut cursor) {
        Decoded::Malformed(_) => {}
        other => panic!("expected malformed for {:?}, got {:?}", bytes, other),
    }
}

// =============================================================================
// Command Encoding Tests
// =============================================================================

#[test]
fn test_encode_command_wire_format() {
    let cmd = Command::new("SET").arg("key").arg("value");
    assert_eq!(
        encode_command(&cmd),
        b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n".to_vec()
    );
}

#[test]
fn test_encode_command_binary_argument() {
    let payload: &[u8] = b"a\r\n\x00b";
    let cmd = Command::new("SET").arg("k").arg(payload);

    let encoded = encode_command(&cmd);
    assert_eq!(
        encoded,
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\na\r\n\x00b\r\n".to_vec()
    );

    // The server sees the request as an array of the same bulk strings
    let frame = decode_all(&encoded);
    assert_eq!(
        frame,
        Frame::Array(vec![
            Frame::bulk("SET"),
            Frame::bulk("k"),
            Frame::Bulk(Bytes::copy_from_slice(payload)),
        ])
    );
}

#[test]
fn test_binary_arguments_survive_encoding() {
    let mut payloads: Vec<Vec<u8>> = Vec::new();

    // Every single byte value, then all of them in one argument
    payloads.extend((0..=255u8).map(|b| vec![b]));
    payloads.push((0..=255u8).collect());

    // Terminators and NULs in awkward places
    payloads.push(b"\r\n".to_vec());
    payloads.push(b"\r\n\r\n$3\r\n".to_vec());
    payloads.push(b"\0\0\r\0\n".to_vec());
    payloads.push(b"*1\r\n$-1\r\n".to_vec());

    // Every length up to 1 KB, with CR and LF sprinkled through
    for len in 0..=1024usize {
        payloads.push((0..len).map(|i| (i * 131 + len) as u8 ^ 0x0d).collect());
    }

    for payload in payloads {
        let cmd = Command::new("SET").arg("k").arg(&payload[..]);
        let encoded = encode_command(&cmd);

        let header = format!("${}\r\n", payload.len());
        let tail_start = encoded.len() - payload.len() - 2 - header.len();
        assert_eq!(&encoded[tail_start..tail_start + header.len()], header.as_bytes());

        assert_eq!(
            decode_all(&encoded),
            Frame::Array(vec![
                Frame::bulk("SET"),
                Frame::bulk("k"),
                Frame::Bulk(Bytes::from(payload.clone())),
            ]),
            "payload of {} bytes",
            payload.len()
        );
    }
}

#[test]
fn test_encode_command_empty_argument() {
    let cmd = Command::new("SET").arg("k").arg("");
    assert_eq!(
        encode_command(&cmd),
        b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n".to_vec()
    );
}

#[test]
fn test_encode_numeric_arguments() {
    let cmd = Command::new("EXPIRE").arg("k").arg(-5i64).arg(1.5f64);
    assert_eq!(
        encode_command(&cmd),
        b"*4\r\n$6\r\nEXPIRE\r\n$1\r\nk\r\n$2\r\n-5\r\n$3\r\n1.5\r\n".to_vec()
    );
}

#[test]
fn test_encode_commands_concatenates() {
    let a = Command::new("PING");
    let b = Command::new("GET").arg("k");

    let mut expected = encode_command(&a);
    expected.extend(encode_command(&b));
    assert_eq!(encode_commands(&[a, b]), expected);
}

// =============================================================================
// Reply Decoding Tests
// =============================================================================

#[test]
fn test_decode_simple_kinds() {
    assert_eq!(decode_all(b"+OK\r\n"), Frame::Simple("OK".to_string()));
    assert_eq!(
        decode_all(b"-ERR unknown command\r\n"),
        Frame::Error("ERR unknown command".to_string())
    );
    assert_eq!(decode_all(b":42\r\n"), Frame::Integer(42));
    assert_eq!(decode_all(b":-7\r\n"), Frame::Integer(-7));

    assert!(decode_all(b"-ERR x\r\n").is_error());
    assert!(decode_all(b"!1\r\nx\r\n").is_error());
    assert!(!decode_all(b"+ERR\r\n").is_error());
}

#[test]
fn test_status_and_error_lines_accept_any_bytes() {
    assert_eq!(
        decode_all(b"-ERR unknown command '\xff', with args beginning with: \r\n"),
        Frame::Error("ERR unknown command '\u{fffd}', with args beginning with: ".to_string())
    );
    assert_eq!(
        decode_all(b"+caf\xc3\xa9 \xc3\r\n"),
        Frame::Simple("caf\u{e9} \u{fffd}".to_string())
    );

    // Inside an aggregate the rest of the frame is still read
    assert_eq!(
        decode_all(b"*2\r\n-WRONGTYPE \xfe\r\n:1\r\n"),
        Frame::Array(vec![
            Frame::Error("WRONGTYPE \u{fffd}".to_string()),
            Frame::Integer(1),
        ])
    );
}

#[test]
fn test_nil_bulk_differs_from_empty_bulk() {
    assert_eq!(decode_all(b"$-1\r\n"), Frame::NullBulk);
    assert_eq!(decode_all(b"$0\r\n\r\n"), Frame::Bulk(Bytes::new()));
    assert_ne!(decode_all(b"$-1\r\n"), decode_all(b"$0\r\n\r\n"));
}

#[test]
fn test_nil_array_differs_from_empty_array() {
    assert_eq!(decode_all(b"*-1\r\n"), Frame::NullArray);
    assert_eq!(decode_all(b"*0\r\n"), Frame::Array(vec![]));
}

#[test]
fn test_decode_bulk_with_crlf_inside() {
    assert_eq!(
        decode_all(b"$4\r\na\r\nb\r\n"),
        Frame::Bulk(Bytes::from_static(b"a\r\nb"))
    );
}

#[test]
fn test_decode_nested_array() {
    let frame = decode_all(b"*2\r\n*2\r\n:1\r\n$-1\r\n*0\r\n");
    assert_eq!(
        frame,
        Frame::Array(vec![
            Frame::Array(vec![Frame::Integer(1), Frame::NullBulk]),
            Frame::Array(vec![]),
        ])
    );
}

#[test]
fn test_decode_leaves_trailing_bytes() {
    let input = b"+OK\r\n:1\r\n";
    let (frame, used) = decode_frame(input).unwrap().unwrap();
    assert_eq!(frame, Frame::Simple("OK".to_string()));
    assert_eq!(used, 5);

    let (frame, _) = decode_frame(&input[used..]).unwrap().unwrap();
    assert_eq!(frame, Frame::Integer(1));
}

// =============================================================================
// RESP3 Tests
// =============================================================================

#[test]
fn test_decode_resp3_scalars() {
    assert_eq!(decode_all(b"_\r\n"), Frame::Null);
    assert_eq!(decode_all(b"#t\r\n"), Frame::Boolean(true));
    assert_eq!(decode_all(b"#f\r\n"), Frame::Boolean(false));
    assert_eq!(decode_all(b",3.25\r\n"), Frame::Double("3.25".to_string()));
    assert_eq!(decode_all(b",inf\r\n"), Frame::Double("inf".to_string()));
    assert_eq!(
        decode_all(b"(3492890328409238509324850943850943825024385\r\n"),
        Frame::BigNumber("3492890328409238509324850943850943825024385".to_string())
    );
    assert_eq!(
        decode_all(b"!21\r\nSYNTAX invalid syntax\r\n"),
        Frame::BulkError(Bytes::from_static(b"SYNTAX invalid syntax"))
    );
    assert_eq!(
        decode_all(b"=15\r\ntxt:Some string\r\n"),
        Frame::Verbatim {
            format: "txt".to_string(),
            data: Bytes::from_static(b"Some string"),
        }
    );
}

#[test]
fn test_decode_resp3_aggregates() {
    assert_eq!(
        decode_all(b"%2\r\n+first\r\n:1\r\n+second\r\n:2\r\n"),
        Frame::Map(vec![
            (Frame::Simple("first".to_string()), Frame::Integer(1)),
            (Frame::Simple("second".to_string()), Frame::Integer(2)),
        ])
    );
    assert_eq!(
        decode_all(b"~2\r\n+a\r\n+b\r\n"),
        Frame::Set(vec![
            Frame::Simple("a".to_string()),
            Frame::Simple("b".to_string())
        ])
    );
    assert_eq!(
        decode_all(b">3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$2\r\nhi\r\n"),
        Frame::Push(vec![Frame::bulk("message"), Frame::bulk("ch"), Frame::bulk("hi")])
    );
}

#[test]
fn test_encode_frame_matches_decoder() {
    let frames = vec![
        Frame::Simple("PONG".to_string()),
        Frame::Error("ERR nope".to_string()),
        Frame::Integer(-1),
        Frame::NullBulk,
        Frame::NullArray,
        Frame::Null,
        Frame::Boolean(true),
        Frame::Double("1.5".to_string()),
        Frame::Verbatim {
            format: "mkd".to_string(),
            data: Bytes::from_static(b"# title"),
        },
        Frame::Map(vec![(Frame::bulk("k"), Frame::Set(vec![Frame::Integer(1)]))]),
        Frame::Push(vec![Frame::bulk("pong"), Frame::bulk("")]),
    ];

    for frame in frames {
        assert_eq!(decode_all(&encode_frame(&frame)), frame);
    }
}

// =============================================================================
// Incremental Decoding Tests
// =============================================================================

#[test]
fn test_incomplete_at_every_split_point() {
    let full = b"*3\r\n$3\r\nfoo\r\n%1\r\n+k\r\n$-1\r\n=7\r\ntxt:abc\r\n";
    let expected = decode_all(full);

    for split in 0..full.len() {
        let mut cursor = Cursor::new(&full[..split]);
        match decode(&mut cursor) {
            Decoded::Incomplete => assert_eq!(cursor.position(), 0),
            other => panic!("split at {} gave {:?}", split, other),
        }
    }

    let mut cursor = Cursor::new(&full[..]);
    assert_eq!(decode(&mut cursor), Decoded::Complete(expected));
    assert_eq!(cursor.position() as usize, full.len());
}

#[test]
fn test_decode_frame_reports_need_more() {
    assert!(decode_frame(b"").unwrap().is_none());
    assert!(decode_frame(b"$5\r\nhel").unwrap().is_none());
    assert!(decode_frame(b"$5\r\nhello\r").unwrap().is_none());
}

// =============================================================================
// Frame Scanner Tests
// =============================================================================

#[test]
fn test_scanner_ready_exactly_when_frame_complete() {
    let full = b"*3\r\n$3\r\nfoo\r\n%1\r\n+k\r\n$-1\r\n=7\r\ntxt:abc\r\n";

    for split in 0..full.len() {
        let mut scanner = FrameScanner::new();
        assert!(!scanner.ready(&full[..split]), "ready too early at {}", split);
    }

    let mut scanner = FrameScanner::new();
    assert!(scanner.ready(full));
    assert_eq!(scanner.scanned(), full.len());
}

#[test]
fn test_scanner_resumes_across_chunks() {
    let items: Vec<Frame> = (0..100_000).map(Frame::Integer).collect();
    let mut wire = encode_frame(&Frame::Array(items.clone()));
    wire.extend_from_slice(b"+next\r\n");
    let frame_len = wire.len() - 7;

    let mut scanner = FrameScanner::new();
    let mut last = 0;
    let mut end = 0;
    while end < frame_len {
        end = (end + 512).min(wire.len());
        let ready = scanner.ready(&wire[..end]);
        assert!(scanner.scanned() >= last, "scanner went backwards");
        last = scanner.scanned();
        assert_eq!(ready, end >= frame_len);
    }
    assert_eq!(scanner.scanned(), frame_len);

    let (frame, used) = decode_frame(&wire).unwrap().unwrap();
    assert_eq!(used, frame_len);
    assert_eq!(frame, Frame::Array(items));

    // Reset picks up the next frame
    scanner.reset();
    assert!(scanner.ready(&wire[frame_len..]));
    assert_eq!(scanner.scanned(), 7);
}

#[test]
fn test_scanner_skips_payload_bytes() {
    // A payload that looks like frame headers must not be walked
    let wire = b"$12\r\n*9\r\n*9\r\n*9\r\n\r\n";
    let mut scanner = FrameScanner::new();
    assert!(!scanner.ready(&wire[..10]));
    assert!(scanner.ready(wire));
    assert_eq!(scanner.scanned(), wire.len());
}

#[test]
fn test_scanner_hands_garbage_to_decoder() {
    let mut scanner = FrameScanner::new();
    assert!(scanner.ready(b"$-7\r\n"));
    assert_malformed(b"$-7\r\n");
}

// =============================================================================
// Malformed Input Tests
// =============================================================================

#[test]
fn test_unknown_marker_is_malformed() {
    assert_malformed(b"?what\r\n");
    assert_malformed(b"hello\r\n");
}

#[test]
fn test_bad_lengths_are_malformed() {
    assert_malformed(b"$-2\r\n");
    assert_malformed(b"*-5\r\n");
    assert_malformed(b"$abc\r\n");
    assert_malformed(b"$99999999999\r\n");
    assert_malformed(b":12x\r\n");
}

#[test]
fn test_payload_without_crlf_is_malformed() {
    assert_malformed(b"$3\r\nabcXY");
}

#[test]
fn test_bad_resp3_scalars_are_malformed() {
    assert_malformed(b"#x\r\n");
    assert_malformed(b",abc\r\n");
    assert_malformed(b"(12a\r\n");
    assert_malformed(b"=3\r\ntxt\r\n");
    assert_malformed(b"_x\r\n");
}

#[test]
fn test_deep_nesting_is_malformed_not_a_crash() {
    let mut wire = b"*1\r\n".repeat(200_000);
    wire.extend_from_slice(b":1\r\n");
    assert_malformed(&wire);

    match decode_frame(&wire) {
        Err(RedwireError::Protocol(msg)) => assert!(msg.contains("nested")),
        other => panic!("expected protocol error, got {:?}", other),
    }

    // Maps count toward the same limit
    let mut wire = b"%1\r\n+k\r\n".repeat(MAX_DEPTH + 1);
    wire.extend_from_slice(b":1\r\n");
    assert_malformed(&wire);
}

#[test]
fn test_nesting_at_limit_decodes() {
    let mut wire = b"*1\r\n".repeat(MAX_DEPTH);
    wire.extend_from_slice(b":7\r\n");

    let mut frame = decode_all(&wire);
    for _ in 0..MAX_DEPTH {
        frame = match frame {
            Frame::Array(mut items) if items.len() == 1 => items.remove(0),
            other => panic!("expected single-element array, got {:?}", other),
        };
    }
    assert_eq!(frame, Frame::Integer(7));
}

#[test]
fn test_malformed_element_inside_array() {
    assert_malformed(b"*2\r\n:1\r\n?\r\n");
}

#[test]
fn test_decode_frame_maps_malformed_to_protocol_error() {
    match decode_frame(b"@oops\r\n") {
        Err(RedwireError::Protocol(msg)) => assert!(msg.contains("marker")),
        other => panic!("expected protocol error, got {:?}", other),
    }
}
