//! # Redwire
//!
//! A synchronous client engine for the RESP wire protocol with:
//! - Binary-safe RESP2 / RESP3 frame codec
//! - One connection, one owner of the read side at any time
//! - Request/reply dispatch and pipelining
//! - Pub/sub with a dedicated read loop and per-subscription listeners
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Client                              │
//! │                (handshake, close, reconnect)                 │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!   ┌────────────────────────┐     ┌────────────────────────────┐
//!   │   Command Dispatcher   │     │    Subscription Router     │
//!   │  (Idle <-> ReqResp)    │     │  (Subscribed, read thread) │
//!   └────────────┬───────────┘     └──────────────┬─────────────┘
//!                │                                │
//!                └───────────────┬────────────────┘
//!                                ▼
//!                 ┌─────────────────────────────┐
//!                 │         Connection          │
//!                 │   (mode token, framing)     │
//!                 └──────────────┬──────────────┘
//!                                ▼
//!                 ┌─────────────────────────────┐
//!                 │        Wire Codec           │
//!                 └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use redwire::{Client, Command, Config};
//!
//! let client = Client::open(Config::default())?;
//! let reply = client.dispatch(&Command::new("SET").arg("key").arg("value"))?;
//! assert!(reply.is_ok());
//! # Ok::<(), redwire::RedwireError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod dispatch;
pub mod pubsub;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{RedwireError, Result, ServerError};
pub use config::{Config, ProtocolVersion};
pub use client::Client;
pub use network::{Connection, Mode, SessionInfo};
pub use protocol::{Command, Frame, Reply, ToArg};
pub use pubsub::{Listener, Message, SubscriptionKey, SubscriptionKind};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Redwire
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
