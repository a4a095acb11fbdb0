//! Consumer configuration as plain immutable data.
//!
//! Every `with_*` function borrows the receiver and returns a new value.

use std::collections::BTreeMap;

use crate::properties::HeaderValue;

/// Prefetch count applied when none is configured.
pub const DEFAULT_PREFETCH_COUNT: u16 = 50;

/// Settings for consuming from a single queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerQueueConsumeConfiguration {
    /// Acknowledge deliveries as soon as the broker sends them.
    pub auto_ack: bool,
    /// Consumer tag; empty lets the broker assign one.
    pub consumer_tag: String,
    pub exclusive: bool,
    /// Raw arguments passed on consumer declaration.
    pub arguments: BTreeMap<String, HeaderValue>,
}

impl PerQueueConsumeConfiguration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_auto_ack(&self) -> Self {
        Self {
            auto_ack: true,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_consumer_tag(&self, consumer_tag: impl Into<String>) -> Self {
        Self {
            consumer_tag: consumer_tag.into(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_exclusive(&self, exclusive: bool) -> Self {
        Self {
            exclusive,
            ..self.clone()
        }
    }

    /// Sets one argument, replacing any previous value under `name`.
    #[must_use]
    pub fn with_argument(&self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        let mut arguments = self.arguments.clone();
        arguments.insert(name.into(), value.into());
        Self {
            arguments,
            ..self.clone()
        }
    }
}

/// Settings for a consumer spanning one or more queues.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeConfiguration {
    pub prefetch_count: u16,
    /// Queues in the order they were added.
    pub queues: Vec<(String, PerQueueConsumeConfiguration)>,
}

impl Default for ConsumeConfiguration {
    fn default() -> Self {
        Self {
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            queues: Vec::new(),
        }
    }
}

impl ConsumeConfiguration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prefetch_count(&self, prefetch_count: u16) -> Self {
        Self {
            prefetch_count,
            ..self.clone()
        }
    }

    /// Adds a queue with its per-queue settings.
    #[must_use]
    pub fn for_queue(&self, queue: impl Into<String>, config: PerQueueConsumeConfiguration) -> Self {
        let mut queues = self.queues.clone();
        queues.push((queue.into(), config));
        Self {
            queues,
            ..self.clone()
        }
    }

    /// Settings of the first entry for `queue`, if any.
    #[must_use]
    pub fn queue(&self, queue: &str) -> Option<&PerQueueConsumeConfiguration> {
        self.queues
            .iter()
            .find(|(name, _)| name == queue)
            .map(|(_, config)| config)
    }
}
