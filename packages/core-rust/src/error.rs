//! Error types for message encoding and decoding.

use crate::message::MessageType;

/// None of the candidate wire type names maps to a known message type.
///
/// This is a data or configuration problem and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot resolve a message type from {candidates:?}")]
pub struct TypeResolutionError {
    /// Every name that was tried, in resolution order.
    pub candidates: Vec<String>,
}

impl TypeResolutionError {
    /// Builds an error for a single unresolvable name.
    #[must_use]
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            candidates: vec![name.into()],
        }
    }
}

/// Errors from the serialization strategies and their collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error(transparent)]
    TypeResolution(#[from] TypeResolutionError),
    #[error("type name `{name}` is longer than {max} characters")]
    TypeNameTooLong { name: String, max: usize },
    #[error("supersession chain of `{message_type}` contains a cycle")]
    SupersessionCycle { message_type: MessageType },
    #[error("failed to encode body of `{message_type}`: {source}")]
    Encode {
        message_type: MessageType,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to decode body of `{message_type}`: {source}")]
    Decode {
        message_type: MessageType,
        #[source]
        source: anyhow::Error,
    },
    /// Converting between a typed body and its dynamic form failed.
    #[error("message body does not match `{message_type}`: {reason}")]
    Body {
        message_type: MessageType,
        reason: String,
    },
}
