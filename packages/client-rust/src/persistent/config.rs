//! Persistent channel configuration.

use std::time::Duration;

use super::classify::ExceptionClassifier;

/// Settings for one persistent channel.
#[derive(Debug, Clone)]
pub struct PersistentChannelOptions {
    /// Issue `confirm.select` on every new channel and forward acks/nacks.
    pub publisher_confirms: bool,
    /// First backoff delay of every invocation.
    pub min_retry_delay: Duration,
    /// Backoff ceiling.
    pub max_retry_delay: Duration,
    /// Failure policy applied to every failed attempt.
    pub classifier: ExceptionClassifier,
}

impl Default for PersistentChannelOptions {
    fn default() -> Self {
        Self {
            publisher_confirms: false,
            min_retry_delay: Duration::from_millis(50),
            max_retry_delay: Duration::from_millis(5000),
            classifier: ExceptionClassifier::default(),
        }
    }
}
