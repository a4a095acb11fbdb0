//! Builds persistent channels that share one connection and one event bus.

use std::sync::Arc;

use super::channel::PersistentChannel;
use super::config::PersistentChannelOptions;
use crate::events::EventBus;
use crate::transport::ChannelFactory;

/// Creates persistent channels bound to one connection and one event bus.
#[derive(Clone)]
pub struct PersistentChannelFactory {
    connection: Arc<dyn ChannelFactory>,
    events: Arc<dyn EventBus>,
}

impl PersistentChannelFactory {
    #[must_use]
    pub fn new(connection: Arc<dyn ChannelFactory>, events: Arc<dyn EventBus>) -> Self {
        Self { connection, events }
    }

    #[must_use]
    pub fn create_persistent_channel(&self, options: PersistentChannelOptions) -> PersistentChannel {
        PersistentChannel::new(
            Arc::clone(&self.connection),
            Arc::clone(&self.events),
            options,
        )
    }
}
