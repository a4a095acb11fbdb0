//! Channel lifecycle events and the bus they are published on.
//!
//! The persistent channel republishes every transport callback as a
//! [`ChannelEvent`]. Whoever tracks publisher confirms or logs returned
//! messages subscribes to the bus; the channel never knows who listens.

use burrow_core::properties::MessageProperties;
use tokio::sync::broadcast;

use crate::transport::{ChannelId, ShutdownReason};

/// Capacity of the broadcast ring used by [`BroadcastEventBus::default`].
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Broker acknowledged or rejected published messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageConfirmationEvent {
    pub channel: ChannelId,
    pub delivery_tag: u64,
    /// Covers every outstanding tag up to and including `delivery_tag`.
    pub multiple: bool,
    pub is_nack: bool,
}

impl MessageConfirmationEvent {
    #[must_use]
    pub fn ack(channel: ChannelId, delivery_tag: u64, multiple: bool) -> Self {
        Self {
            channel,
            delivery_tag,
            multiple,
            is_nack: false,
        }
    }

    #[must_use]
    pub fn nack(channel: ChannelId, delivery_tag: u64, multiple: bool) -> Self {
        Self {
            channel,
            delivery_tag,
            multiple,
            is_nack: true,
        }
    }
}

/// Routing details of a returned message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReturnedInfo {
    pub exchange: String,
    pub routing_key: String,
    pub reply_text: String,
}

/// A published message came back unroutable.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnedMessageEvent {
    pub channel: ChannelId,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    pub info: MessageReturnedInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelShutdownEvent {
    pub channel: ChannelId,
    pub reason: Option<ShutdownReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecoveredEvent {
    pub channel: ChannelId,
}

/// Everything a persistent channel publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Confirmation(MessageConfirmationEvent),
    Returned(ReturnedMessageEvent),
    Shutdown(ChannelShutdownEvent),
    Recovered(ChannelRecoveredEvent),
}

impl ChannelEvent {
    /// Channel the event originated from.
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::Confirmation(e) => e.channel,
            Self::Returned(e) => e.channel,
            Self::Shutdown(e) => e.channel,
            Self::Recovered(e) => e.channel,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Fire-and-forget publish target.
///
/// Implementations must not block and must not fail; callers publish from
/// transport callback threads.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: ChannelEvent);
}

/// `EventBus` over a `tokio::sync::broadcast` ring.
///
/// Publishing never waits. A subscriber that falls more than the ring
/// capacity behind sees `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<ChannelEvent>,
}

impl BroadcastEventBus {
    /// Bus retaining up to `capacity` events per lagging subscriber. A zero
    /// capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receives every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: ChannelEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
