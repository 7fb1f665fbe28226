//! Protocol Module
//!
//! Defines the wire protocol (RESP) spoken with the server. Pure data and
//! byte transformations, no I/O.
//!
//! ## Request Format
//! ```text
//! *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
//! ```
//!
//! ## Reply Kinds
//! - `+` status, `-` error, `:` integer
//! - `$` bulk string (`$-1` = nil)
//! - `*` array (`*-1` = nil), may nest
//! - RESP3: `_ # , ( ! = % ~ >`

mod codec;
mod command;
mod frame;
mod response;

pub use codec::{
    decode, decode_frame, encode_command, encode_commands, encode_frame, Decoded, FrameScanner,
    CRLF, MAX_BULK_LEN, MAX_DEPTH, MAX_LINE_LEN,
};
pub use command::{Command, ToArg, PUBSUB_CONTROL};
pub use frame::{marker, Frame};
pub use response::Reply;
