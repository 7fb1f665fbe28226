//! Network Module
//!
//! The single TCP connection to the server.
//!
//! ## Architecture
//! - One socket, cloned into read / write / control handles
//! - Read side owned by whoever holds the mode token
//! - Close from any thread unblocks the others

mod connection;

pub use connection::{Connection, Mode, SessionInfo};
