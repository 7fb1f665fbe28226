//! Push frames
//!
//! Classifies frames received while subscribed into messages and
//! confirmations.

use std::fmt;

use bytes::Bytes;

use crate::protocol::Frame;

/// Channel literal or glob pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Channel,
    Pattern,
}

impl SubscriptionKind {
    pub(crate) fn subscribe_command(self) -> &'static str {
        match self {
            SubscriptionKind::Channel => "SUBSCRIBE",
            SubscriptionKind::Pattern => "PSUBSCRIBE",
        }
    }

    pub(crate) fn unsubscribe_command(self) -> &'static str {
        match self {
            SubscriptionKind::Channel => "UNSUBSCRIBE",
            SubscriptionKind::Pattern => "PUNSUBSCRIBE",
        }
    }
}

/// Registry key: at most one listener per key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub kind: SubscriptionKind,
    pub name: Bytes,
}

impl SubscriptionKey {
    pub fn channel(name: impl Into<Bytes>) -> Self {
        Self {
            kind: SubscriptionKind::Channel,
            name: name.into(),
        }
    }

    pub fn pattern(name: impl Into<Bytes>) -> Self {
        Self {
            kind: SubscriptionKind::Pattern,
            name: name.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SubscriptionKind::Channel => "channel",
            SubscriptionKind::Pattern => "pattern",
        };
        write!(f, "{} {:?}", kind, String::from_utf8_lossy(&self.name))
    }
}

/// A published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published to
    pub channel: Bytes,

    /// Pattern that matched, for pattern subscriptions
    pub pattern: Option<Bytes>,

    /// Payload exactly as published
    pub payload: Bytes,
}

impl Message {
    /// Registry key of the subscription this message belongs to
    pub fn key(&self) -> SubscriptionKey {
        match &self.pattern {
            Some(pattern) => SubscriptionKey::pattern(pattern.clone()),
            None => SubscriptionKey::channel(self.channel.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Subscribed,
    Unsubscribed,
}

/// Server acknowledgement of a subscribe or unsubscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Confirmation {
    pub action: Action,
    pub kind: SubscriptionKind,

    /// Nil when unsubscribing everything while nothing was subscribed
    pub name: Option<Bytes>,

    /// Subscriptions (channels and patterns) the server still holds for us
    pub remaining: i64,
}

impl Confirmation {
    pub fn key(&self) -> Option<SubscriptionKey> {
        self.name.as_ref().map(|name| SubscriptionKey {
            kind: self.kind,
            name: name.clone(),
        })
    }
}

pub(crate) enum Push {
    Message(Message),
    Confirm(Confirmation),
    Pong,
}

/// Sort a frame read in subscribed mode; non-push frames come back untouched
pub(crate) fn classify(frame: Frame) -> std::result::Result<Push, Frame> {
    let parsed = match &frame {
        Frame::Array(items) | Frame::Push(items) => parse_push(items),
        _ => None,
    };
    parsed.ok_or(frame)
}

fn parse_push(items: &[Frame]) -> Option<Push> {
    let kind = items.first()?.as_bytes()?.to_ascii_lowercase();

    match (kind.as_slice(), items) {
        (b"message", [_, channel, payload]) => Some(Push::Message(Message {
            channel: bytes_of(channel)?,
            pattern: None,
            payload: bytes_of(payload)?,
        })),
        (b"pmessage", [_, pattern, channel, payload]) => Some(Push::Message(Message {
            channel: bytes_of(channel)?,
            pattern: Some(bytes_of(pattern)?),
            payload: bytes_of(payload)?,
        })),
        (b"subscribe", [_, name, count]) => {
            confirmation(Action::Subscribed, SubscriptionKind::Channel, name, count)
        }
        (b"psubscribe", [_, name, count]) => {
            confirmation(Action::Subscribed, SubscriptionKind::Pattern, name, count)
        }
        (b"unsubscribe", [_, name, count]) => {
            confirmation(Action::Unsubscribed, SubscriptionKind::Channel, name, count)
        }
        (b"punsubscribe", [_, name, count]) => {
            confirmation(Action::Unsubscribed, SubscriptionKind::Pattern, name, count)
        }
        (b"pong", _) => Some(Push::Pong),
        _ => None,
    }
}

fn confirmation(
    action: Action,
    kind: SubscriptionKind,
    name: &Frame,
    count: &Frame,
) -> Option<Push> {
    let remaining = match count {
        Frame::Integer(n) => *n,
        _ => return None,
    };
    let name = if name.is_nil() { None } else { Some(bytes_of(name)?) };

    Some(Push::Confirm(Confirmation {
        action,
        kind,
        name,
        remaining,
    }))
}

fn bytes_of(frame: &Frame) -> Option<Bytes> {
    match frame {
        Frame::Bulk(data) => Some(data.clone()),
        other => other.as_bytes().map(Bytes::copy_from_slice),
    }
}
