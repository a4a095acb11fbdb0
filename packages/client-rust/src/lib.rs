//! Burrow Client: persistent channel invocation, lifecycle events, and the
//! transport seam they sit on.

pub mod events;
pub mod persistent;
pub mod telemetry;
pub mod transport;

pub use events::{BroadcastEventBus, ChannelEvent, EventBus};
pub use persistent::{
    ChannelState, ExceptionClassifier, ExceptionVerdict, InvokeError, PersistentChannel,
    PersistentChannelFactory, PersistentChannelOptions,
};
pub use telemetry::{init_tracing, LoggingConfig};
pub use transport::{ChannelFactory, TransportChannel, TransportError};
