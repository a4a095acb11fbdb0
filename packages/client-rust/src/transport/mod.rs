//! Transport seam: the channel-level operations the persistent channel needs
//! from a broker client.
//!
//! Wire framing, authentication and connection-level recovery all live on
//! the far side of these traits. The [`memory`] transport implements them
//! in-process.

pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use burrow_core::properties::BasicProperties;

/// AMQP reply codes the default exception policy distinguishes.
pub mod reply_codes {
    pub const CONNECTION_FORCED: u16 = 320;
    pub const ACCESS_REFUSED: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const RESOURCE_LOCKED: u16 = 405;
    pub const PRECONDITION_FAILED: u16 = 406;
    pub const INTERNAL_ERROR: u16 = 541;
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identity of a transport channel, unique per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned when a listener is attached; used to detach it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

// ---------------------------------------------------------------------------
// Shutdown and return payloads
// ---------------------------------------------------------------------------

/// Which side initiated a channel or connection shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownInitiator {
    Application,
    Library,
    Peer,
}

/// Why a channel or connection was shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReason {
    pub initiator: ShutdownInitiator,
    pub reply_code: u16,
    pub reply_text: String,
}

impl ShutdownReason {
    #[must_use]
    pub fn new(initiator: ShutdownInitiator, reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self {
            initiator,
            reply_code,
            reply_text: reply_text.into(),
        }
    }

    /// Shutdown initiated by the broker.
    #[must_use]
    pub fn peer(reply_code: u16, reply_text: impl Into<String>) -> Self {
        Self::new(ShutdownInitiator::Peer, reply_code, reply_text)
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} initiated, code={}, text={}",
            self.initiator, self.reply_code, self.reply_text
        )
    }
}

/// A published message the broker could not route and sent back.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicReturn {
    pub exchange: String,
    pub routing_key: String,
    pub reply_code: u16,
    pub reply_text: String,
    pub properties: BasicProperties,
    pub body: Vec<u8>,
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Failures raised by a transport or by a channel action.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The operation was cut short by a channel or connection shutdown.
    #[error(
        "operation interrupted: {}",
        .reason.as_ref().map_or_else(|| "no reason given".to_string(), ToString::to_string)
    )]
    OperationInterrupted { reason: Option<ShutdownReason> },
    /// The transport refused an operation it does not support.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// No broker could be reached when opening a connection or channel.
    #[error("broker unreachable: {0}")]
    BrokerUnreachable(String),
    /// An expected, transient error raised by the client itself.
    #[error("client error: {0}")]
    Client(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    /// Interruption carrying the broker's shutdown reason.
    #[must_use]
    pub fn interrupted(reason: ShutdownReason) -> Self {
        Self::OperationInterrupted {
            reason: Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Receives channel lifecycle callbacks. Callbacks may fire on transport
/// threads and must not block.
pub trait ChannelListener: Send + Sync {
    /// The broker confirmed `delivery_tag` (and all earlier ones if `multiple`).
    fn on_ack(&self, _delivery_tag: u64, _multiple: bool) {}

    /// The broker rejected `delivery_tag` (and all earlier ones if `multiple`).
    fn on_nack(&self, _delivery_tag: u64, _multiple: bool) {}

    /// An unroutable mandatory message came back.
    fn on_return(&self, _returned: &BasicReturn) {}

    /// The channel shut down. `None` when the transport gave no reason.
    fn on_shutdown(&self, _reason: Option<&ShutdownReason>) {}
}

/// Receives transport-level auto-recovery notifications.
pub trait RecoveryListener: Send + Sync {
    /// The transport reopened the channel after a connection loss.
    fn on_recovered(&self);
}

/// Capability of channels that the transport recovers automatically.
pub trait RecoverableChannel: Send + Sync {
    /// Attaches `listener` for recovery notifications.
    fn add_recovery_listener(&self, listener: Arc<dyn RecoveryListener>) -> ListenerId;

    /// Detaches a recovery listener. Unknown ids are ignored.
    fn remove_recovery_listener(&self, id: ListenerId);
}

/// A logical session on a broker connection.
pub trait TransportChannel: Send + Sync {
    /// Channel number on its connection.
    fn id(&self) -> ChannelId;

    /// `false` once the channel has been closed from either side.
    fn is_open(&self) -> bool;

    /// Enables publisher confirms on this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed or the broker refuses.
    fn confirm_select(&self) -> Result<(), TransportError>;

    /// Attaches `listener` for lifecycle callbacks.
    fn add_listener(&self, listener: Arc<dyn ChannelListener>) -> ListenerId;

    /// Detaches a listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);

    /// The recovery capability, if this channel has one.
    fn as_recoverable(&self) -> Option<&dyn RecoverableChannel>;

    /// Closes the channel. Closing an already closed channel is a no-op.
    fn close(&self);
}

/// Opens channels on a broker connection.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Opens a new channel.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the connection cannot provide a channel.
    async fn create_channel(&self) -> Result<Arc<dyn TransportChannel>, TransportError>;
}
