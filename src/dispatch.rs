//! Command Dispatcher
//!
//! Exactly one write and one matching reply per call.
//!
//! ## Responsibilities
//! - Take the mode token (Idle -> RequestResponse) for the round trip
//! - Hand it back on every exit path, errors included
//! - Return server error replies as data
//! - Tear the connection down on I/O, protocol and deadline failures

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::ProtocolVersion;
use crate::error::{RedwireError, Result};
use crate::network::{Connection, Mode};
use crate::protocol::{encode_command, encode_commands, Command, Frame, Reply};

/// Holds the RequestResponse token for the length of one round trip
struct RoundTrip<'a> {
    conn: &'a Connection,
}

impl<'a> RoundTrip<'a> {
    fn begin(conn: &'a Connection) -> Result<Self> {
        conn.transition(Mode::Idle, Mode::RequestResponse)?;
        Ok(Self { conn })
    }
}

impl Drop for RoundTrip<'_> {
    fn drop(&mut self) {
        self.conn.release(Mode::RequestResponse);
    }
}

/// Synchronous request/reply over a shared connection
pub struct Dispatcher {
    conn: Arc<Connection>,

    /// Default local deadline for a reply (None = wait for the server)
    read_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(conn: Arc<Connection>, read_timeout: Option<Duration>) -> Self {
        Self { conn, read_timeout }
    }

    /// Send one command and return its reply
    ///
    /// An error reply comes back as `Ok(Reply::Error(_))` and leaves the
    /// connection usable.
    pub fn dispatch(&self, command: &Command) -> Result<Reply> {
        self.round_trip(command, self.read_timeout)
    }

    /// Like `dispatch`, with a local deadline on the reply.
    ///
    /// Meant as a safety margin for blocking commands whose server-side
    /// timeout is encoded in the arguments. Expiry closes the connection.
    pub fn dispatch_with_deadline(&self, command: &Command, deadline: Duration) -> Result<Reply> {
        self.round_trip(command, Some(deadline))
    }

    /// Write every command in one go, then read exactly one reply per command
    pub fn pipeline(&self, commands: &[Command]) -> Result<Vec<Reply>> {
        if let Some(control) = commands.iter().find(|c| c.is_pubsub_control()) {
            return Err(pubsub_misuse(control));
        }
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let _token = RoundTrip::begin(&self.conn)?;
        self.conn.write(&encode_commands(commands))?;

        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let reply = self.read_reply(self.read_timeout)?;
            self.note_session_change(command, &reply);
            replies.push(reply);
        }

        tracing::debug!("Pipelined {} commands", commands.len());
        Ok(replies)
    }

    /// Write raw bytes without reading anything back
    pub fn raw_send(&self, bytes: &[u8]) -> Result<()> {
        let _token = RoundTrip::begin(&self.conn)?;
        self.conn.write(bytes)
    }

    /// Read one frame without sending anything
    pub fn raw_read(&self) -> Result<Frame> {
        let _token = RoundTrip::begin(&self.conn)?;
        self.conn.read_frame(Mode::RequestResponse, self.read_timeout)
    }

    /// Read `count` frames in a row
    pub fn raw_read_n(&self, count: usize) -> Result<Vec<Frame>> {
        let _token = RoundTrip::begin(&self.conn)?;
        (0..count)
            .map(|_| self.conn.read_frame(Mode::RequestResponse, self.read_timeout))
            .collect()
    }

    fn round_trip(&self, command: &Command, timeout: Option<Duration>) -> Result<Reply> {
        if command.is_pubsub_control() {
            return Err(pubsub_misuse(command));
        }
        if command.is_empty() {
            return Err(RedwireError::InvalidState("empty command".to_string()));
        }

        let _token = RoundTrip::begin(&self.conn)?;
        tracing::trace!("Dispatching {:?}", command);

        self.conn.write(&encode_command(command))?;
        let reply = self.read_reply(timeout)?;

        if let Reply::Error(e) = &reply {
            tracing::debug!("{} rejected by server: {}", command.name(), e);
        }
        self.note_session_change(command, &reply);
        Ok(reply)
    }

    /// Next reply frame, skipping RESP3 out-of-band pushes
    fn read_reply(&self, timeout: Option<Duration>) -> Result<Reply> {
        loop {
            match self.conn.read_frame(Mode::RequestResponse, timeout)? {
                Frame::Push(items) => {
                    tracing::debug!("Skipping out-of-band push with {} elements", items.len());
                }
                frame => return Ok(Reply::from(frame)),
            }
        }
    }

    /// Keep the session snapshot in step with commands that change it
    fn note_session_change(&self, command: &Command, reply: &Reply) {
        if reply.is_error() {
            return;
        }
        let args = command.as_args();

        match command.name().as_str() {
            "SELECT" => {
                if let Some(db) = args.get(1).and_then(|a| parse_number::<u32>(a)) {
                    self.conn.update_session(|s| s.database = db);
                }
            }
            "AUTH" => self.conn.update_session(|s| s.authenticated = true),
            "HELLO" => {
                let protocol = match args.get(1).and_then(|a| parse_number::<u8>(a)) {
                    Some(3) => Some(ProtocolVersion::Resp3),
                    Some(2) => Some(ProtocolVersion::Resp2),
                    _ => None,
                };
                let has_auth = args.iter().any(|a| a.eq_ignore_ascii_case(b"AUTH"));
                let name = args
                    .iter()
                    .position(|a| a.eq_ignore_ascii_case(b"SETNAME"))
                    .and_then(|i| args.get(i + 1))
                    .map(|n| String::from_utf8_lossy(n).into_owned());
                self.conn.update_session(|s| {
                    if let Some(protocol) = protocol {
                        s.protocol = protocol;
                    }
                    s.authenticated |= has_auth;
                    if name.is_some() {
                        s.client_name = name;
                    }
                });
            }
            "CLIENT" => {
                let is_setname = args
                    .get(1)
                    .map(|a| a.eq_ignore_ascii_case(b"SETNAME"))
                    .unwrap_or(false);
                if let (true, Some(name)) = (is_setname, args.get(2)) {
                    let name = String::from_utf8_lossy(name).into_owned();
                    self.conn.update_session(|s| s.client_name = Some(name));
                }
            }
            _ => {}
        }
    }
}

fn pubsub_misuse(command: &Command) -> RedwireError {
    RedwireError::InvalidState(format!(
        "{} must go through the subscription router",
        command.name()
    ))
}

fn parse_number<T: std::str::FromStr>(arg: &Bytes) -> Option<T> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}
