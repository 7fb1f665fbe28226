//! Connection
//!
//! Owns the socket, the read buffer and the buffered writer. Never looks at
//! command semantics; it only moves frames and guards the mode token.

use std::fmt;
use std::io::{self, BufWriter, Cursor, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use crate::config::{Config, ProtocolVersion};
use crate::error::{RedwireError, Result};
use crate::protocol::{decode, Decoded, Frame, FrameScanner};

/// Smallest socket read chunk, whatever the config says
const MIN_READ_CHUNK: usize = 512;

/// Who currently owns the read side of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Nobody is reading; a dispatch or a subscribe may start
    Idle,

    /// A dispatcher round trip is in flight
    RequestResponse,

    /// The subscription router's read loop owns every inbound frame
    Subscribed,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Idle => "idle",
            Mode::RequestResponse => "request/response",
            Mode::Subscribed => "subscribed",
        };
        f.write_str(name)
    }
}

/// Connection-scoped session state established by the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub protocol: ProtocolVersion,
    pub database: u32,
    pub authenticated: bool,
    pub client_name: Option<String>,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::Resp2,
            database: 0,
            authenticated: false,
            client_name: None,
        }
    }
}

struct State {
    mode: Mode,
    closed: bool,
}

/// Read half: socket plus the bytes received but not yet decoded
struct FrameReader {
    stream: TcpStream,
    buffer: BytesMut,
    scanner: FrameScanner,
    chunk: Vec<u8>,
    timeout: Option<Duration>,
}

impl FrameReader {
    fn next_frame(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        if self.timeout != timeout {
            self.stream.set_read_timeout(timeout)?;
            self.timeout = timeout;
        }

        loop {
            // Decode once the whole frame is buffered, not after every read
            if self.scanner.ready(&self.buffer) {
                let mut cursor = Cursor::new(&self.buffer[..]);
                match decode(&mut cursor) {
                    Decoded::Complete(frame) => {
                        let used = cursor.position() as usize;
                        self.buffer.advance(used);
                        self.scanner.reset();
                        return Ok(frame);
                    }
                    Decoded::Malformed(msg) => return Err(RedwireError::Protocol(msg)),
                    Decoded::Incomplete => {}
                }
            }

            let n = match self.stream.read(&mut self.chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(RedwireError::Timeout(format!(
                        "no reply within {:?}",
                        timeout.unwrap_or_default()
                    )));
                }
                Err(e) => return Err(RedwireError::Io(e)),
            };

            if n == 0 {
                return Err(RedwireError::Io(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }
            self.buffer.extend_from_slice(&self.chunk[..n]);
        }
    }
}

/// A live connection to the server
///
/// ## Concurrency
/// - The read half and the write half sit behind separate locks, so the
///   subscription router can block in a read while a caller writes an
///   `UNSUBSCRIBE`.
/// - `close` needs neither lock: it shuts the socket down through a third
///   handle, which unblocks a reader on any thread.
/// - The mode token is checked before every read; a read by anyone but the
///   current owner fails with `InvalidState`.
pub struct Connection {
    /// Read half (frame decoder state)
    reader: Mutex<FrameReader>,

    /// Write half (buffered for efficiency)
    writer: Mutex<BufWriter<TcpStream>>,

    /// Handle used only to shut the socket down
    control: TcpStream,

    /// Mode token and closed flag
    state: Mutex<State>,

    /// Protocol, database, auth status
    session: Mutex<SessionInfo>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Connect to the server named in the config
    pub fn open(config: &Config) -> Result<Self> {
        let addr = config.addr();
        let stream = dial(&addr, config.connect_timeout())?;
        Self::from_stream(stream, config)
    }

    /// Wrap an already connected stream
    ///
    /// Sets up buffered I/O and configures timeouts
    pub fn from_stream(stream: TcpStream, config: &Config) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        stream.set_write_timeout(config.write_timeout())?;

        // Clone stream for separate read/write/control handles
        let read_stream = stream.try_clone()?;
        let control = stream.try_clone()?;

        tracing::debug!("Connected to {}", peer_addr);

        Ok(Self {
            reader: Mutex::new(FrameReader {
                stream: read_stream,
                buffer: BytesMut::with_capacity(config.read_buffer_size),
                scanner: FrameScanner::new(),
                chunk: vec![0; config.read_buffer_size.max(MIN_READ_CHUNK)],
                timeout: None,
            }),
            writer: Mutex::new(BufWriter::new(stream)),
            control,
            state: Mutex::new(State {
                mode: Mode::Idle,
                closed: false,
            }),
            session: Mutex::new(SessionInfo::default()),
            peer_addr,
        })
    }

    // =========================================================================
    // I/O
    // =========================================================================

    /// Write all bytes and flush
    ///
    /// Any failure is fatal: the connection is closed.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;

        let outcome = {
            let mut writer = self.writer.lock();
            writer.write_all(bytes).and_then(|_| writer.flush())
        };

        match outcome {
            Ok(()) => {
                tracing::trace!("Wrote {} bytes to {}", bytes.len(), self.peer_addr);
                Ok(())
            }
            Err(e) => Err(self.fail(RedwireError::Io(e))),
        }
    }

    /// Block until one full frame has been decoded
    ///
    /// `owner` must match the current mode. `timeout` bounds the wait for
    /// socket data; expiry is fatal because a late reply would leave the
    /// stream out of step.
    pub fn read_frame(&self, owner: Mode, timeout: Option<Duration>) -> Result<Frame> {
        self.check_owner(owner)?;

        let outcome = {
            let mut reader = self.reader.lock();
            reader.next_frame(timeout)
        };

        match outcome {
            Ok(frame) => {
                tracing::trace!("Frame from {}: {:?}", self.peer_addr, frame);
                Ok(frame)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Release the socket; idempotent
    ///
    /// Unblocks any pending read or write on other threads.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.mode = Mode::Idle;
        }

        if let Err(e) = self.control.shutdown(Shutdown::Both) {
            // Already torn down by the peer
            tracing::trace!("Shutdown of {} reported: {}", self.peer_addr, e);
        }
        tracing::debug!("Connection to {} closed", self.peer_addr);
    }

    /// Tear the connection down after a fatal error
    ///
    /// Returns the error the caller should see: `Closed` when someone closed
    /// the connection first (that is what made the I/O fail).
    pub(crate) fn fail(&self, err: RedwireError) -> RedwireError {
        if self.is_closed() {
            return RedwireError::Closed;
        }
        tracing::warn!("Connection to {} failed: {}", self.peer_addr, err);
        self.close();
        err
    }

    // =========================================================================
    // Mode Token
    // =========================================================================

    /// Current mode
    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Guarded mode change: succeeds only from `from`
    ///
    /// On failure nothing is changed.
    pub fn transition(&self, from: Mode, to: Mode) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RedwireError::Closed);
        }
        if state.mode != from {
            return Err(RedwireError::InvalidState(format!(
                "cannot enter {} mode while the connection is {}",
                to, state.mode
            )));
        }
        tracing::trace!("Mode {} -> {} on {}", from, to, self.peer_addr);
        state.mode = to;
        Ok(())
    }

    /// Hand the read side back: `from` -> Idle, if `from` still holds it
    pub(crate) fn release(&self, from: Mode) {
        let mut state = self.state.lock();
        if !state.closed && state.mode == from {
            tracing::trace!("Mode {} -> idle on {}", from, self.peer_addr);
            state.mode = Mode::Idle;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(RedwireError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_owner(&self, owner: Mode) -> Result<()> {
        let state = self.state.lock();
        if state.closed {
            return Err(RedwireError::Closed);
        }
        if state.mode != owner {
            return Err(RedwireError::InvalidState(format!(
                "read reserved for {} mode but the connection is {}",
                owner, state.mode
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Snapshot of the session state
    pub fn session(&self) -> SessionInfo {
        self.session.lock().clone()
    }

    pub(crate) fn update_session(&self, f: impl FnOnce(&mut SessionInfo)) {
        f(&mut *self.session.lock());
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Try every resolved address in turn
fn dial(addr: &str, timeout: Option<Duration>) -> Result<TcpStream> {
    let mut last_err = None;

    for sock_addr in addr.to_socket_addrs()? {
        let attempt = match timeout {
            Some(t) => TcpStream::connect_timeout(&sock_addr, t),
            None => TcpStream::connect(sock_addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", sock_addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => RedwireError::Io(e),
        None => RedwireError::Config(format!("{addr} did not resolve to any address")),
    })
}
