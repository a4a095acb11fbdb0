//! Correlation id generation for outgoing messages.

use uuid::Uuid;

/// Produces correlation ids for messages that do not carry one.
pub trait CorrelationIdGenerator: Send + Sync {
    fn correlation_id(&self) -> String;
}

/// Random v4 UUIDs. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidCorrelationIdGenerator;

impl CorrelationIdGenerator for UuidCorrelationIdGenerator {
    fn correlation_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Always returns the same id.
#[derive(Debug, Clone)]
pub struct StaticCorrelationIdGenerator {
    correlation_id: String,
}

impl StaticCorrelationIdGenerator {
    #[must_use]
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }
}

impl CorrelationIdGenerator for StaticCorrelationIdGenerator {
    fn correlation_id(&self) -> String {
        self.correlation_id.clone()
    }
}
