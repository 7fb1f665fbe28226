//! Client Module
//!
//! The entry point that ties the engine together.
//!
//! ## Responsibilities
//! - Open the connection and run the connect handshake
//! - Route request/reply traffic to the Dispatcher
//! - Route subscribe/unsubscribe to the Router
//! - Close, and reconnect on request

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::{Config, ProtocolVersion};
use crate::dispatch::Dispatcher;
use crate::error::{RedwireError, Result};
use crate::network::{Connection, Mode, SessionInfo};
use crate::protocol::{Command, Frame, Reply, ToArg};
use crate::pubsub::{Listener, Router, SubscriptionKey, SubscriptionKind};

/// A client bound to one server connection
///
/// ## Modes
/// - Idle / RequestResponse: `dispatch`, `pipeline` and the raw calls work
/// - Subscribed: only pub/sub calls work; everything else fails with
///   `InvalidState` until the last subscription is gone
///
/// Listeners run on a dedicated thread and must not call back into the
/// client.
pub struct Client {
    config: Config,
    conn: Arc<Connection>,
    dispatcher: Dispatcher,
    router: Router,
}

impl Client {
    /// Connect and run the handshake
    ///
    /// On startup:
    /// 1. Open the TCP connection
    /// 2. `HELLO 3` (protocol 3) or `AUTH` / `CLIENT SETNAME` (protocol 2)
    /// 3. `SELECT` when a database other than 0 is configured
    pub fn open(config: Config) -> Result<Self> {
        let (conn, dispatcher, router) = establish(&config)?;
        Ok(Self {
            config,
            conn,
            dispatcher,
            router,
        })
    }

    /// Connect using a `redis://` URL
    pub fn from_url(url: &str) -> Result<Self> {
        Self::open(Config::from_url(url)?)
    }

    // =========================================================================
    // Request / Reply
    // =========================================================================

    /// Send one command, wait for its reply
    ///
    /// Error replies are returned as `Reply::Error`, not as `Err`.
    pub fn dispatch(&self, command: &Command) -> Result<Reply> {
        self.dispatcher.dispatch(command)
    }

    /// `dispatch` with a local deadline; expiry closes the connection
    pub fn dispatch_with_deadline(&self, command: &Command, deadline: Duration) -> Result<Reply> {
        self.dispatcher.dispatch_with_deadline(command, deadline)
    }

    /// Send all commands, then read one reply per command
    pub fn pipeline(&self, commands: &[Command]) -> Result<Vec<Reply>> {
        self.dispatcher.pipeline(commands)
    }

    /// Write raw bytes
    pub fn raw_send(&self, bytes: &[u8]) -> Result<()> {
        self.dispatcher.raw_send(bytes)
    }

    /// Read one raw frame
    pub fn raw_read(&self) -> Result<Frame> {
        self.dispatcher.raw_read()
    }

    /// Read `count` raw frames
    pub fn raw_read_n(&self, count: usize) -> Result<Vec<Frame>> {
        self.dispatcher.raw_read_n(count)
    }

    // =========================================================================
    // Pub/Sub
    // =========================================================================

    /// Subscribe to channels; returns once the server confirmed every one
    pub fn subscribe<T: ToArg>(
        &self,
        channels: &[T],
        listener: impl Listener + 'static,
    ) -> Result<()> {
        self.router
            .subscribe(SubscriptionKind::Channel, to_names(channels), Arc::new(listener))
    }

    /// Subscribe to glob patterns
    pub fn psubscribe<T: ToArg>(
        &self,
        patterns: &[T],
        listener: impl Listener + 'static,
    ) -> Result<()> {
        self.router
            .subscribe(SubscriptionKind::Pattern, to_names(patterns), Arc::new(listener))
    }

    /// Register one shared listener under several calls
    pub fn subscribe_shared<T: ToArg>(
        &self,
        kind: SubscriptionKind,
        names: &[T],
        listener: Arc<dyn Listener>,
    ) -> Result<()> {
        self.router.subscribe(kind, to_names(names), listener)
    }

    /// Unsubscribe channels (an empty slice means all of them)
    pub fn unsubscribe<T: ToArg>(&self, channels: &[T]) -> Result<()> {
        self.router
            .unsubscribe(SubscriptionKind::Channel, Some(to_names(channels)))
    }

    /// Unsubscribe every channel
    pub fn unsubscribe_all(&self) -> Result<()> {
        self.router.unsubscribe(SubscriptionKind::Channel, None)
    }

    /// Unsubscribe patterns (an empty slice means all of them)
    pub fn punsubscribe<T: ToArg>(&self, patterns: &[T]) -> Result<()> {
        self.router
            .unsubscribe(SubscriptionKind::Pattern, Some(to_names(patterns)))
    }

    /// Unsubscribe every pattern
    pub fn punsubscribe_all(&self) -> Result<()> {
        self.router.unsubscribe(SubscriptionKind::Pattern, None)
    }

    /// Keys with a registered listener
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.router.subscriptions()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Current read-ownership mode
    pub fn mode(&self) -> Mode {
        self.conn.mode()
    }

    /// Protocol, database and auth state of the session
    pub fn session(&self) -> SessionInfo {
        self.conn.session()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Close the connection; idempotent
    ///
    /// Every listener gets `on_closed` before this returns.
    pub fn close(&self) {
        self.conn.close();
        self.router.teardown(&RedwireError::Closed);
    }

    /// Drop the current connection and open a fresh one with the same config
    ///
    /// Subscriptions are not carried over.
    pub fn reconnect(&mut self) -> Result<()> {
        tracing::info!("Reconnecting to {}", self.config.addr());
        self.close();

        let (conn, dispatcher, router) = establish(&self.config)?;
        self.conn = conn;
        self.dispatcher = dispatcher;
        self.router = router;
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn establish(config: &Config) -> Result<(Arc<Connection>, Dispatcher, Router)> {
    let conn = Arc::new(Connection::open(config)?);
    let dispatcher = Dispatcher::new(Arc::clone(&conn), config.read_timeout());

    if let Err(e) = handshake(&dispatcher, config) {
        tracing::warn!("Handshake with {} failed: {}", config.addr(), e);
        conn.close();
        return Err(e);
    }

    let router = Router::new(
        Arc::clone(&conn),
        config.confirm_timeout(),
        config.slow_listener(),
    );
    Ok((conn, dispatcher, router))
}

/// Commands issued right after connect, in order
pub fn handshake_commands(config: &Config) -> Vec<Command> {
    let mut commands = Vec::new();

    match config.protocol {
        ProtocolVersion::Resp3 => {
            let mut hello = Command::new("HELLO").arg(u32::from(config.protocol.number()));
            if let Some(password) = &config.password {
                let user = config.username.as_deref().unwrap_or("default");
                hello = hello.arg("AUTH").arg(user).arg(password);
            }
            if let Some(name) = &config.client_name {
                hello = hello.arg("SETNAME").arg(name);
            }
            commands.push(hello);
        }
        ProtocolVersion::Resp2 => {
            if let Some(password) = &config.password {
                let auth = match &config.username {
                    Some(user) => Command::new("AUTH").arg(user).arg(password),
                    None => Command::new("AUTH").arg(password),
                };
                commands.push(auth);
            }
            if let Some(name) = &config.client_name {
                commands.push(Command::new("CLIENT").arg("SETNAME").arg(name));
            }
        }
    }

    if config.database != 0 {
        commands.push(Command::new("SELECT").arg(config.database));
    }

    commands
}

fn handshake(dispatcher: &Dispatcher, config: &Config) -> Result<()> {
    for command in handshake_commands(config) {
        dispatcher.dispatch(&command)?.into_result()?;
    }
    tracing::debug!("Handshake with {} complete", config.addr());
    Ok(())
}

fn to_names<T: ToArg>(names: &[T]) -> Vec<Bytes> {
    names.iter().map(ToArg::to_arg).collect()
}
