//! Subscription Router
//!
//! Owns the read side of the connection while subscribed.
//!
//! ## Threads
//! - Control calls (subscribe / unsubscribe) run on the caller's thread,
//!   serialized by `control`. They only ever *write*.
//! - The read loop runs on its own thread and is the only reader while the
//!   connection is in Subscribed mode. It applies confirmations to the
//!   registry, forwards them to the waiting control call over a channel,
//!   and delivers messages to listeners.
//! - When the server reports zero remaining subscriptions the loop hands the
//!   mode back to Idle and exits before reading again.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::message::{classify, Action, Confirmation, Push};
use super::{Listener, Message, SubscriptionKey, SubscriptionKind};
use crate::error::{RedwireError, Result, ServerError};
use crate::network::{Connection, Mode};
use crate::protocol::{encode_command, Command, Frame};

/// Events from the read loop to the control call waiting on them
enum Event {
    Confirmed(Confirmation),
    Rejected(ServerError),
    Failed(RedwireError),
}

type Registry = HashMap<SubscriptionKey, Arc<dyn Listener>>;

/// State shared between the control side and the read loop
struct Shared {
    registry: Mutex<Registry>,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    slow_listener: Option<Duration>,
}

impl Shared {
    fn send(&self, event: Event) {
        // Both ends live in `Shared`, so the channel never disconnects
        let _ = self.events_tx.send(event);
    }

    fn deliver(&self, message: &Message) {
        let key = message.key();
        let listener = self.registry.lock().get(&key).cloned();

        match listener {
            Some(listener) => self.invoke(&key, "on_message", || listener.on_message(message)),
            None => tracing::debug!("No listener for {}, dropping message", key),
        }
    }

    fn apply(&self, confirmation: &Confirmation) {
        let Some(key) = confirmation.key() else {
            return;
        };

        let listener = match confirmation.action {
            Action::Subscribed => self.registry.lock().get(&key).cloned(),
            Action::Unsubscribed => self.registry.lock().remove(&key),
        };

        if let Some(listener) = listener {
            let count = confirmation.remaining;
            match confirmation.action {
                Action::Subscribed => self.invoke(&key, "on_subscribed", || {
                    listener.on_subscribed(&key, count)
                }),
                Action::Unsubscribed => self.invoke(&key, "on_unsubscribed", || {
                    listener.on_unsubscribed(&key, count)
                }),
            }
        }
    }

    /// Forward a rejected control command; true when the loop must stop
    fn reject(&self, conn: &Connection, error: ServerError, remaining: i64) -> bool {
        tracing::debug!("Server rejected a pub/sub command: {}", error);

        // Nothing subscribed server-side: the server left pub/sub mode
        let finished = remaining == 0;
        if finished {
            self.registry.lock().clear();
            conn.release(Mode::Subscribed);
        }
        self.send(Event::Rejected(error));
        finished
    }

    fn has_kind(&self, kind: SubscriptionKind) -> bool {
        self.registry.lock().keys().any(|k| k.kind == kind)
    }

    /// Drop every subscription and tell each distinct listener once
    fn teardown(&self, reason: &RedwireError) {
        let drained: Vec<(SubscriptionKey, Arc<dyn Listener>)> =
            self.registry.lock().drain().collect();
        if drained.is_empty() {
            return;
        }

        tracing::debug!("Clearing {} subscriptions: {}", drained.len(), reason);

        let mut notified: HashSet<*const ()> = HashSet::new();
        for (key, listener) in drained {
            if notified.insert(Arc::as_ptr(&listener) as *const ()) {
                self.invoke(&key, "on_closed", || listener.on_closed(reason));
            }
        }
    }

    /// Run a listener callback, containing panics and timing it
    fn invoke(&self, key: &SubscriptionKey, hook: &str, f: impl FnOnce()) {
        let started = Instant::now();

        if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
            tracing::error!("Listener for {} panicked in {}", key, hook);
        }

        if let Some(limit) = self.slow_listener {
            let elapsed = started.elapsed();
            if elapsed > limit {
                tracing::warn!(
                    "Listener for {} spent {:?} in {} (limit {:?}); later messages were held back",
                    key,
                    elapsed,
                    hook,
                    limit
                );
            }
        }
    }
}

/// Drop repeated names, keeping first-seen order
///
/// The server confirms each occurrence, and a confirmation left over from one
/// call must not satisfy the next.
fn distinct(names: Vec<Bytes>) -> Vec<Bytes> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// The read loop body
fn read_loop(conn: Arc<Connection>, shared: Arc<Shared>) {
    tracing::debug!("Subscription read loop started for {}", conn.peer_addr());

    // Server-side subscription count as of the last confirmation
    let mut remaining: i64 = 0;

    loop {
        let frame = match conn.read_frame(Mode::Subscribed, None) {
            Ok(frame) => frame,
            Err(e) => {
                shared.teardown(&e);
                shared.send(Event::Failed(e));
                break;
            }
        };

        match classify(frame) {
            Ok(Push::Message(message)) => shared.deliver(&message),
            Ok(Push::Confirm(confirmation)) => {
                remaining = confirmation.remaining;
                shared.apply(&confirmation);

                let finished = confirmation.action == Action::Unsubscribed && remaining == 0;
                if finished {
                    shared.registry.lock().clear();
                    conn.release(Mode::Subscribed);
                }
                shared.send(Event::Confirmed(confirmation));
                if finished {
                    break;
                }
            }
            Ok(Push::Pong) => tracing::trace!("Pong while subscribed"),
            Err(Frame::Error(msg)) => {
                if shared.reject(&conn, ServerError::new(msg), remaining) {
                    break;
                }
            }
            Err(Frame::BulkError(msg)) => {
                let error = ServerError::new(String::from_utf8_lossy(&msg).into_owned());
                if shared.reject(&conn, error, remaining) {
                    break;
                }
            }
            Err(frame) => tracing::warn!("Dropping unexpected frame while subscribed: {:?}", frame),
        }
    }

    tracing::debug!("Subscription read loop stopped for {}", conn.peer_addr());
}

/// Fan-in of push frames to per-key listeners
pub struct Router {
    conn: Arc<Connection>,
    shared: Arc<Shared>,

    /// Serializes subscribe / unsubscribe
    control: Mutex<()>,

    /// Read loop thread, while one runs
    reader: Mutex<Option<JoinHandle<()>>>,

    /// Id of the read loop thread, to refuse re-entrant control calls
    reader_id: Mutex<Option<ThreadId>>,

    confirm_timeout: Option<Duration>,
}

impl Router {
    pub fn new(
        conn: Arc<Connection>,
        confirm_timeout: Option<Duration>,
        slow_listener: Option<Duration>,
    ) -> Self {
        let (events_tx, events_rx) = channel::unbounded();
        Self {
            conn,
            shared: Arc::new(Shared {
                registry: Mutex::new(HashMap::new()),
                events_tx,
                events_rx,
                slow_listener,
            }),
            control: Mutex::new(()),
            reader: Mutex::new(None),
            reader_id: Mutex::new(None),
            confirm_timeout,
        }
    }

    /// Register `listener` under each name and wait for the server's confirmations
    ///
    /// A name that already has a listener gets the new one.
    pub fn subscribe(
        &self,
        kind: SubscriptionKind,
        names: Vec<Bytes>,
        listener: Arc<dyn Listener>,
    ) -> Result<()> {
        if names.is_empty() {
            return Err(RedwireError::InvalidState(format!(
                "{} needs at least one name",
                kind.subscribe_command()
            )));
        }
        self.refuse_reentry()?;
        let names = distinct(names);

        let _control = self.control.lock();
        self.reap();
        self.drain_events();

        let newly_subscribed = match self.conn.mode() {
            Mode::Subscribed => false,
            _ => {
                self.conn.transition(Mode::Idle, Mode::Subscribed)?;
                true
            }
        };

        // Register first so a message right behind the confirmation finds its listener
        let previous: Vec<(SubscriptionKey, Option<Arc<dyn Listener>>)> = {
            let mut registry = self.shared.registry.lock();
            names
                .iter()
                .map(|name| {
                    let key = SubscriptionKey {
                        kind,
                        name: name.clone(),
                    };
                    let old = registry.insert(key.clone(), Arc::clone(&listener));
                    (key, old)
                })
                .collect()
        };

        if newly_subscribed {
            self.spawn_reader()?;
        }

        let command = Command::new(kind.subscribe_command()).args(&names);
        self.send_control(&command)?;

        let mut pending: HashSet<Bytes> = names.into_iter().collect();
        while !pending.is_empty() {
            match self.next_event()? {
                Event::Confirmed(c) if c.action == Action::Subscribed && c.kind == kind => {
                    if let Some(name) = &c.name {
                        pending.remove(name);
                    }
                }
                Event::Confirmed(_) => {}
                Event::Rejected(error) => {
                    self.rollback(previous);
                    self.reap();
                    return Err(RedwireError::Server(error));
                }
                Event::Failed(error) => return Err(error),
            }
        }

        tracing::debug!("{} confirmed", command.name());
        Ok(())
    }

    /// Unsubscribe the given names, or every name of `kind` when `None`
    ///
    /// Returns once the server confirmed. When nothing remains subscribed the
    /// read loop has exited and the connection is Idle again.
    pub fn unsubscribe(&self, kind: SubscriptionKind, names: Option<Vec<Bytes>>) -> Result<()> {
        self.refuse_reentry()?;

        let _control = self.control.lock();
        if self.conn.is_closed() {
            return Err(RedwireError::Closed);
        }
        if self.conn.mode() != Mode::Subscribed {
            self.reap();
            return Ok(());
        }
        self.drain_events();

        let names = names.filter(|n| !n.is_empty()).map(distinct);
        let command = Command::new(kind.unsubscribe_command()).args(names.iter().flatten());
        self.send_control(&command)?;

        let mut pending: Option<HashSet<Bytes>> = names.map(|n| n.into_iter().collect());
        loop {
            match self.next_event()? {
                Event::Confirmed(c) if c.action == Action::Unsubscribed && c.kind == kind => {
                    let done = match pending.as_mut() {
                        Some(pending) => {
                            if let Some(name) = &c.name {
                                pending.remove(name);
                            }
                            pending.is_empty()
                        }
                        None => !self.shared.has_kind(kind),
                    };
                    if done || c.remaining == 0 {
                        break;
                    }
                }
                Event::Confirmed(_) => {}
                Event::Rejected(error) => {
                    self.reap();
                    return Err(RedwireError::Server(error));
                }
                Event::Failed(error) => return Err(error),
            }
        }

        self.reap();
        tracing::debug!("{} confirmed", command.name());
        Ok(())
    }

    /// Keys currently registered
    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        self.shared.registry.lock().keys().cloned().collect()
    }

    /// Drop all subscriptions after the connection went away
    ///
    /// Listeners hear about it synchronously, before this returns.
    pub fn teardown(&self, reason: &RedwireError) {
        self.shared.teardown(reason);
        if self.conn.is_closed() {
            self.reap();
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn spawn_reader(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let shared = Arc::clone(&self.shared);

        let spawned = thread::Builder::new()
            .name("redwire-pubsub".to_string())
            .spawn(move || read_loop(conn, shared));

        match spawned {
            Ok(handle) => {
                *self.reader_id.lock() = Some(handle.thread().id());
                *self.reader.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.registry.lock().clear();
                self.conn.release(Mode::Subscribed);
                Err(RedwireError::Io(e))
            }
        }
    }

    /// Join the read loop once it no longer owns the connection
    fn reap(&self) {
        if self.conn.mode() == Mode::Subscribed {
            return;
        }
        if self.is_reader_thread() {
            return;
        }
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Subscription read loop panicked");
            }
            *self.reader_id.lock() = None;
        }
    }

    fn send_control(&self, command: &Command) -> Result<()> {
        tracing::trace!("Sending {:?}", command);
        if let Err(e) = self.conn.write(&encode_command(command)) {
            self.shared.teardown(&e);
            self.reap();
            return Err(e);
        }
        Ok(())
    }

    fn next_event(&self) -> Result<Event> {
        let received = match self.confirm_timeout {
            Some(limit) => self.shared.events_rx.recv_timeout(limit),
            None => self
                .shared
                .events_rx
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => {
                let error = RedwireError::Timeout(format!(
                    "no pub/sub confirmation within {:?}",
                    self.confirm_timeout.unwrap_or_default()
                ));
                // Registry and server no longer agree; start over on a new connection
                let error = self.conn.fail(error);
                self.shared.teardown(&error);
                self.reap();
                Err(error)
            }
            Err(RecvTimeoutError::Disconnected) => Err(RedwireError::Closed),
        }
    }

    fn drain_events(&self) {
        while self.shared.events_rx.try_recv().is_ok() {}
    }

    fn rollback(&self, previous: Vec<(SubscriptionKey, Option<Arc<dyn Listener>>)>) {
        let mut registry = self.shared.registry.lock();
        for (key, old) in previous {
            match old {
                Some(listener) => {
                    registry.insert(key, listener);
                }
                None => {
                    registry.remove(&key);
                }
            }
        }
    }

    fn is_reader_thread(&self) -> bool {
        *self.reader_id.lock() == Some(thread::current().id())
    }

    fn refuse_reentry(&self) -> Result<()> {
        if self.is_reader_thread() {
            return Err(RedwireError::InvalidState(
                "listeners must not call back into the client".to_string(),
            ));
        }
        Ok(())
    }
}
