//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request (Command) Format
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<arg bytes>\r\n      (repeated argc times)
//! ```
//!
//! ### Reply Format
//! ```text
//! <marker><line>\r\n                     simple kinds (+ - : _ # , ()
//! <marker><len>\r\n<payload>\r\n         blob kinds ($ ! =)
//! <marker><count>\r\n<frame>...          aggregates (* ~ > and % with count pairs)
//! ```
//! A length or count of `-1` is the nil sentinel.
//!
//! ### Incremental decoding
//! `decode` works on whatever is buffered so far and answers with one of
//! complete / incomplete / malformed. Truncation is never reported as
//! corruption.

use std::io::Cursor;

use bytes::Bytes;

use super::frame::marker;
use super::{Command, Frame};
use crate::error::{RedwireError, Result};

/// Line terminator
pub const CRLF: &[u8; 2] = b"\r\n";

/// Largest bulk payload accepted (512 MB, the server's own limit)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Longest single line accepted before a terminator shows up (64 KB)
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Deepest aggregate nesting accepted in one frame
pub const MAX_DEPTH: usize = 512;

/// Outcome of one decode attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A full frame; the cursor sits right after it
    Complete(Frame),

    /// The buffer ends before the frame does; the cursor is left untouched
    Incomplete,

    /// The bytes can never form a valid frame
    Malformed(String),
}

// =============================================================================
// Command Encoding
// =============================================================================

/// Encode a command to bytes
///
/// Lengths come from the argument byte length, so arguments may hold any bytes.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(command));
    append_command(&mut buf, command);
    buf
}

/// Encode several commands back to back (for pipelining)
pub fn encode_commands(commands: &[Command]) -> Vec<u8> {
    let total = commands.iter().map(encoded_len).sum();
    let mut buf = Vec::with_capacity(total);
    for command in commands {
        append_command(&mut buf, command);
    }
    buf
}

fn append_command(buf: &mut Vec<u8>, command: &Command) {
    let args = command.as_args();
    put_header(buf, marker::ARRAY, args.len() as i64);
    for arg in args {
        put_blob(buf, marker::BULK_STRING, arg);
    }
}

fn encoded_len(command: &Command) -> usize {
    // marker + up to 20 digits + CRLF per header, payload + CRLF per argument
    let args = command.as_args();
    23 + args.iter().map(|a| a.len() + 25).sum::<usize>()
}

// =============================================================================
// Frame Encoding
// =============================================================================

/// Encode a frame in the reply grammar
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::new();
    append_frame(&mut buf, frame);
    buf
}

fn append_frame(buf: &mut Vec<u8>, frame: &Frame) {
    match frame {
        Frame::Simple(s) => put_line(buf, marker::SIMPLE_STRING, s.as_bytes()),
        Frame::Error(s) => put_line(buf, marker::SIMPLE_ERROR, s.as_bytes()),
        Frame::Integer(n) => put_header(buf, marker::INTEGER, *n),
        Frame::Bulk(data) => put_blob(buf, marker::BULK_STRING, data),
        Frame::NullBulk => put_header(buf, marker::BULK_STRING, -1),
        Frame::NullArray => put_header(buf, marker::ARRAY, -1),
        Frame::Array(items) => put_aggregate(buf, marker::ARRAY, items),
        Frame::Null => put_line(buf, marker::NULL, b""),
        Frame::Boolean(b) => put_line(buf, marker::BOOLEAN, if *b { b"t" } else { b"f" }),
        Frame::Double(text) => put_line(buf, marker::DOUBLE, text.as_bytes()),
        Frame::BigNumber(text) => put_line(buf, marker::BIG_NUMBER, text.as_bytes()),
        Frame::BulkError(data) => put_blob(buf, marker::BULK_ERROR, data),
        Frame::Verbatim { format, data } => {
            let mut payload = Vec::with_capacity(format.len() + 1 + data.len());
            payload.extend_from_slice(format.as_bytes());
            payload.push(b':');
            payload.extend_from_slice(data);
            put_blob(buf, marker::VERBATIM_STRING, &payload);
        }
        Frame::Map(entries) => {
            put_header(buf, marker::MAP, entries.len() as i64);
            for (key, value) in entries {
                append_frame(buf, key);
                append_frame(buf, value);
            }
        }
        Frame::Set(items) => put_aggregate(buf, marker::SET, items),
        Frame::Push(items) => put_aggregate(buf, marker::PUSH, items),
    }
}

fn put_line(buf: &mut Vec<u8>, mark: u8, line: &[u8]) {
    buf.push(mark);
    buf.extend_from_slice(line);
    buf.extend_from_slice(CRLF);
}

fn put_header(buf: &mut Vec<u8>, mark: u8, n: i64) {
    put_line(buf, mark, n.to_string().as_bytes());
}

fn put_blob(buf: &mut Vec<u8>, mark: u8, data: &[u8]) {
    put_header(buf, mark, data.len() as i64);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

fn put_aggregate(buf: &mut Vec<u8>, mark: u8, items: &[Frame]) {
    put_header(buf, mark, items.len() as i64);
    for item in items {
        append_frame(buf, item);
    }
}

// =============================================================================
// Frame Decoding
// =============================================================================

/// Decode one frame starting at the cursor position
pub fn decode(cursor: &mut Cursor<&[u8]>) -> Decoded {
    let start = cursor.position();
    match parse_frame(cursor, 0) {
        Ok(frame) => Decoded::Complete(frame),
        Err(Halt::Incomplete) => {
            cursor.set_position(start);
            Decoded::Incomplete
        }
        Err(Halt::Malformed(msg)) => Decoded::Malformed(msg),
    }
}

/// Decode one frame from the front of `bytes`
///
/// Returns the frame and the number of bytes it occupied, `None` when more
/// bytes are needed.
pub fn decode_frame(bytes: &[u8]) -> Result<Option<(Frame, usize)>> {
    let mut cursor = Cursor::new(bytes);
    match decode(&mut cursor) {
        Decoded::Complete(frame) => Ok(Some((frame, cursor.position() as usize))),
        Decoded::Incomplete => Ok(None),
        Decoded::Malformed(msg) => Err(RedwireError::Protocol(msg)),
    }
}

// =============================================================================
// Frame Boundary Scanning
// =============================================================================

/// Finds where the frame at the front of a growing buffer ends
///
/// Walks headers, skips payloads and remembers how far it got, so each byte
/// is looked at once however many reads a reply spans.
///
/// It counts elements still owed instead of keeping a stack: a scalar settles
/// one, an aggregate of `n` settles one and owes `n` more (`2n` for a map).
#[derive(Debug, Clone)]
pub struct FrameScanner {
    /// Offset of the first element not yet scanned
    pos: usize,

    /// Elements still owed before the frame is whole
    pending: usize,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self { pos: 0, pending: 1 }
    }
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan whatever `buf` gained since the last call
    ///
    /// True once the front frame is complete, or once the bytes can never
    /// form a frame. Either way `decode` has the final say. `buf` must keep
    /// the bytes already scanned at the same offsets.
    pub fn ready(&mut self, buf: &[u8]) -> bool {
        while self.pending > 0 {
            let mut cursor = Cursor::new(buf);
            cursor.set_position(self.pos as u64);
            match skip_element(&mut cursor) {
                Ok(owed) => {
                    self.pos = cursor.position() as usize;
                    self.pending = (self.pending - 1).saturating_add(owed);
                }
                Err(Halt::Incomplete) => return false,
                Err(Halt::Malformed(_)) => return true,
            }
        }
        true
    }

    /// Bytes known to belong to the front frame
    pub fn scanned(&self) -> usize {
        self.pos
    }

    /// Start over for the next frame
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Step over one element header (and payload); returns the children it owes
fn skip_element(cursor: &mut Cursor<&[u8]>) -> Step<usize> {
    match next_byte(cursor)? {
        marker::BULK_STRING | marker::BULK_ERROR | marker::VERBATIM_STRING => {
            if let Some(len) = read_length(cursor, "blob")? {
                let end = cursor.position() as usize + len + 2;
                if cursor.get_ref().len() < end {
                    return Err(Halt::Incomplete);
                }
                cursor.set_position(end as u64);
            }
            Ok(0)
        }
        marker::ARRAY | marker::SET | marker::PUSH => {
            Ok(read_length(cursor, "aggregate")?.unwrap_or(0))
        }
        marker::MAP => Ok(read_length(cursor, "map")?.map_or(0, |n| n.saturating_mul(2))),
        _ => {
            read_line(cursor)?;
            Ok(0)
        }
    }
}

enum Halt {
    Incomplete,
    Malformed(String),
}

type Step<T> = std::result::Result<T, Halt>;

fn malformed<T>(msg: impl Into<String>) -> Step<T> {
    Err(Halt::Malformed(msg.into()))
}

fn parse_frame(cursor: &mut Cursor<&[u8]>, depth: usize) -> Step<Frame> {
    if depth > MAX_DEPTH {
        return malformed(format!("aggregates nested deeper than {MAX_DEPTH}"));
    }
    let mark = next_byte(cursor)?;

    match mark {
        marker::SIMPLE_STRING => Ok(Frame::Simple(line_text(cursor)?)),
        marker::SIMPLE_ERROR => Ok(Frame::Error(line_text(cursor)?)),
        marker::INTEGER => Ok(Frame::Integer(line_integer(cursor)?)),
        marker::BULK_STRING => match read_length(cursor, "bulk string")? {
            None => Ok(Frame::NullBulk),
            Some(len) => Ok(Frame::Bulk(read_payload(cursor, len)?)),
        },
        marker::ARRAY => match read_length(cursor, "array")? {
            None => Ok(Frame::NullArray),
            Some(count) => Ok(Frame::Array(parse_elements(cursor, count, depth + 1)?)),
        },
        marker::NULL => {
            if !read_line(cursor)?.is_empty() {
                return malformed("null frame carries data");
            }
            Ok(Frame::Null)
        }
        marker::BOOLEAN => match read_line(cursor)? {
            b"t" => Ok(Frame::Boolean(true)),
            b"f" => Ok(Frame::Boolean(false)),
            other => malformed(format!(
                "invalid boolean {:?}",
                String::from_utf8_lossy(other)
            )),
        },
        marker::DOUBLE => {
            let text = line_text(cursor)?;
            if text.parse::<f64>().is_err() {
                return malformed(format!("invalid double {text:?}"));
            }
            Ok(Frame::Double(text))
        }
        marker::BIG_NUMBER => {
            let text = line_text(cursor)?;
            let digits = text.strip_prefix(['-', '+']).unwrap_or(&text);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return malformed(format!("invalid big number {text:?}"));
            }
            Ok(Frame::BigNumber(text))
        }
        marker::BULK_ERROR => match read_length(cursor, "bulk error")? {
            None => malformed("bulk error cannot be nil"),
            Some(len) => Ok(Frame::BulkError(read_payload(cursor, len)?)),
        },
        marker::VERBATIM_STRING => match read_length(cursor, "verbatim string")? {
            None => malformed("verbatim string cannot be nil"),
            Some(len) => {
                let payload = read_payload(cursor, len)?;
                if payload.len() < 4 || payload[3] != b':' {
                    return malformed("verbatim string without a format prefix");
                }
                let format = String::from_utf8_lossy(&payload[..3]).into_owned();
                Ok(Frame::Verbatim {
                    format,
                    data: payload.slice(4..),
                })
            }
        },
        marker::MAP => match read_length(cursor, "map")? {
            None => Ok(Frame::Null),
            Some(count) => {
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key = parse_frame(cursor, depth + 1)?;
                    let value = parse_frame(cursor, depth + 1)?;
                    entries.push((key, value));
                }
                Ok(Frame::Map(entries))
            }
        },
        marker::SET => match read_length(cursor, "set")? {
            None => Ok(Frame::Null),
            Some(count) => Ok(Frame::Set(parse_elements(cursor, count, depth + 1)?)),
        },
        marker::PUSH => match read_length(cursor, "push")? {
            None => Ok(Frame::Null),
            Some(count) => Ok(Frame::Push(parse_elements(cursor, count, depth + 1)?)),
        },
        other => malformed(format!("unknown type marker 0x{other:02x}")),
    }
}

fn parse_elements(cursor: &mut Cursor<&[u8]>, count: usize, depth: usize) -> Step<Vec<Frame>> {
    // Cap the up-front allocation; the count comes off the wire
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(parse_frame(cursor, depth)?);
    }
    Ok(items)
}

fn next_byte(cursor: &mut Cursor<&[u8]>) -> Step<u8> {
    let pos = cursor.position() as usize;
    let byte = *cursor.get_ref().get(pos).ok_or(Halt::Incomplete)?;
    cursor.set_position(pos as u64 + 1);
    Ok(byte)
}

/// Read up to the next CRLF and step past it
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Step<&'a [u8]> {
    let buf: &'a [u8] = *cursor.get_ref();
    let start = cursor.position() as usize;
    let rest = &buf[start.min(buf.len())..];

    match rest.windows(2).position(|w| w == CRLF) {
        Some(end) => {
            cursor.set_position((start + end + 2) as u64);
            Ok(&rest[..end])
        }
        None if rest.len() > MAX_LINE_LEN => malformed("line exceeds maximum length"),
        None => Err(Halt::Incomplete),
    }
}

/// Line as text; servers echo raw user bytes into error lines
fn line_text(cursor: &mut Cursor<&[u8]>) -> Step<String> {
    let line = read_line(cursor)?;
    Ok(String::from_utf8_lossy(line).into_owned())
}

fn line_integer(cursor: &mut Cursor<&[u8]>) -> Step<i64> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Halt::Malformed(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

/// Length or count header; `None` is the nil sentinel
fn read_length(cursor: &mut Cursor<&[u8]>, what: &str) -> Step<Option<usize>> {
    let len = line_integer(cursor)?;
    match len {
        -1 => Ok(None),
        n if n < 0 => malformed(format!("negative {what} length {n}")),
        n if n > MAX_BULK_LEN => malformed(format!(
            "{what} length {n} exceeds maximum {MAX_BULK_LEN}"
        )),
        n => Ok(Some(n as usize)),
    }
}

/// Exactly `len` payload bytes followed by CRLF
fn read_payload(cursor: &mut Cursor<&[u8]>, len: usize) -> Step<Bytes> {
    let buf: &[u8] = *cursor.get_ref();
    let start = cursor.position() as usize;
    let end = start + len;

    if buf.len() < end + 2 {
        return Err(Halt::Incomplete);
    }
    if &buf[end..end + 2] != CRLF {
        return malformed("payload is not followed by CRLF");
    }

    cursor.set_position((end + 2) as u64);
    Ok(Bytes::copy_from_slice(&buf[start..end]))
}
