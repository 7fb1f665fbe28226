//! Pub/Sub Module
//!
//! Subscription registry and the dedicated read loop that serves it.
//!
//! ## Frame Shapes (RESP2 arrays, RESP3 pushes)
//! ```text
//! ["subscribe",    channel, count]      confirmation
//! ["unsubscribe",  channel, count]      confirmation (channel may be nil)
//! ["psubscribe",   pattern, count]      confirmation
//! ["punsubscribe", pattern, count]      confirmation
//! ["message",      channel, payload]    delivered to the channel's listener
//! ["pmessage",     pattern, channel, payload]
//! ```

mod listener;
mod message;
mod router;

pub use listener::Listener;
pub use message::{Message, SubscriptionKey, SubscriptionKind};
pub use router::Router;
