//! Reply definitions
//!
//! A decoded frame as surfaced to the caller. RESP3 kinds are folded into the
//! six reply tags so callers only ever inspect one shape.

use bytes::Bytes;

use super::Frame;
use crate::error::{RedwireError, Result, ServerError};

/// A reply to one command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Status line such as `OK` or `PONG`
    Status(String),

    /// Error reply from the server; the connection is still usable
    Error(ServerError),

    /// Integer reply (RESP3 booleans become 0/1)
    Integer(i64),

    /// Bulk reply (RESP3 doubles, big numbers and verbatim strings land here)
    Bulk(Bytes),

    /// Absent value: nil bulk, nil array or RESP3 null
    Nil,

    /// Aggregate reply (RESP3 maps are flattened to key, value, key, value)
    Array(Vec<Reply>),
}

impl Reply {
    /// Turn an error reply into `Err(RedwireError::Server)`
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(e) => Err(RedwireError::Server(e)),
            other => Ok(other),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// `+OK`
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(s) if s == "OK")
    }

    /// Raw bytes of a status or bulk reply
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Status(s) => Some(s.as_bytes()),
            Reply::Bulk(b) => Some(b),
            _ => None,
        }
    }

    /// UTF-8 view of a status or bulk reply
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<Frame> for Reply {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Simple(s) => Reply::Status(s),
            Frame::Error(msg) => Reply::Error(ServerError::new(msg)),
            Frame::BulkError(msg) => {
                Reply::Error(ServerError::new(String::from_utf8_lossy(&msg).into_owned()))
            }
            Frame::Integer(n) => Reply::Integer(n),
            Frame::Boolean(b) => Reply::Integer(i64::from(b)),
            Frame::Bulk(data) => Reply::Bulk(data),
            Frame::Verbatim { data, .. } => Reply::Bulk(data),
            Frame::Double(text) | Frame::BigNumber(text) => Reply::Bulk(Bytes::from(text)),
            Frame::NullBulk | Frame::NullArray | Frame::Null => Reply::Nil,
            Frame::Array(items) | Frame::Set(items) | Frame::Push(items) => {
                Reply::Array(items.into_iter().map(Reply::from).collect())
            }
            Frame::Map(entries) => Reply::Array(
                entries
                    .into_iter()
                    .flat_map(|(k, v)| [Reply::from(k), Reply::from(v)])
                    .collect(),
            ),
        }
    }
}
