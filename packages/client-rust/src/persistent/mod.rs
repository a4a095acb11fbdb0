//! Resilient channel invocation: failure classification, retry backoff and
//! the persistent channel engine.

pub mod backoff;
pub mod channel;
pub mod classify;
pub mod config;
pub mod factory;

pub use backoff::RetryBackoff;
pub use channel::{ChannelState, InvokeError, PersistentChannel};
pub use classify::{is_pipelining_forbidden, ExceptionClassifier, ExceptionVerdict};
pub use config::PersistentChannelOptions;
pub use factory::PersistentChannelFactory;
