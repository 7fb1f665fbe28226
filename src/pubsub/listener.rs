//! Listener capability
//!
//! Callbacks run on the router's read thread, one at a time. A slow listener
//! delays every message behind it, and a listener must never call back into
//! the same client: hand the work to another thread instead (a channel send
//! is the usual move).

use super::{Message, SubscriptionKey};
use crate::error::RedwireError;

/// Receives pub/sub traffic for the keys it was registered under
pub trait Listener: Send + Sync {
    /// A message for one of this listener's keys
    fn on_message(&self, message: &Message);

    /// The server confirmed a subscription; `count` is its running total
    fn on_subscribed(&self, _key: &SubscriptionKey, _count: i64) {}

    /// The server confirmed an unsubscribe; `count` is what remains
    fn on_unsubscribed(&self, _key: &SubscriptionKey, _count: i64) {}

    /// The connection went away; called once per listener
    fn on_closed(&self, _reason: &RedwireError) {}
}

impl<F> Listener for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn on_message(&self, message: &Message) {
        self(message)
    }
}
