//! Frame definitions
//!
//! One decoded unit of the reply grammar.

use bytes::Bytes;

/// Type markers of the wire grammar
pub mod marker {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const SIMPLE_ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';

    // RESP3
    pub const NULL: u8 = b'_';
    pub const BOOLEAN: u8 = b'#';
    pub const DOUBLE: u8 = b',';
    pub const BIG_NUMBER: u8 = b'(';
    pub const BULK_ERROR: u8 = b'!';
    pub const VERBATIM_STRING: u8 = b'=';
    pub const MAP: u8 = b'%';
    pub const SET: u8 = b'~';
    pub const PUSH: u8 = b'>';
}

/// A decoded wire frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `+OK\r\n`
    Simple(String),

    /// `-ERR message\r\n`
    Error(String),

    /// `:1000\r\n`
    Integer(i64),

    /// `$6\r\nfoobar\r\n`
    Bulk(Bytes),

    /// `$-1\r\n`, an absent bulk string
    NullBulk,

    /// `*2\r\n...`
    Array(Vec<Frame>),

    /// `*-1\r\n`, an absent array
    NullArray,

    // -------------------------------------------------------------------------
    // RESP3 kinds
    // -------------------------------------------------------------------------
    /// `_\r\n`
    Null,

    /// `#t\r\n` / `#f\r\n`
    Boolean(bool),

    /// `,3.14\r\n`, kept as sent so `inf`/`nan` survive untouched
    Double(String),

    /// `(3492890328409238509324850943850943825024385\r\n`
    BigNumber(String),

    /// `!21\r\nSYNTAX invalid syntax\r\n`
    BulkError(Bytes),

    /// `=15\r\ntxt:Some string\r\n`
    Verbatim { format: String, data: Bytes },

    /// `%2\r\n<k><v><k><v>`
    Map(Vec<(Frame, Frame)>),

    /// `~2\r\n...`
    Set(Vec<Frame>),

    /// `>3\r\n...`, out-of-band data such as pub/sub messages
    Push(Vec<Frame>),
}

impl Frame {
    /// Bulk frame from anything byte-like
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// Whether this frame is an error of either flavour
    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_) | Frame::BulkError(_))
    }

    /// Whether this frame is one of the nil sentinels
    pub fn is_nil(&self) -> bool {
        matches!(self, Frame::NullBulk | Frame::NullArray | Frame::Null)
    }

    /// Borrow the raw bytes of a string-like frame
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Simple(s) => Some(s.as_bytes()),
            Frame::Bulk(b) => Some(b),
            Frame::Verbatim { data, .. } => Some(data),
            _ => None,
        }
    }
}
