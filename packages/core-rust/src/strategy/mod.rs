//! Serialization strategies: typed message ⇄ (properties, payload bytes).
//!
//! Two strategies share one contract:
//! - [`DefaultMessageSerializationStrategy`] stamps a single wire type name.
//! - [`VersionedMessageSerializationStrategy`] also stamps the names of every
//!   superseded type, so consumers that only know an older contract can still
//!   decode newer messages.

pub mod default;
pub mod versioned;

pub use default::DefaultMessageSerializationStrategy;
pub use versioned::{
    MessageTypeProperty, SupersessionMap, VersionedMessageSerializationStrategy,
    ALTERNATIVE_MESSAGE_TYPES_HEADER,
};

use crate::codec::Serializer;
use crate::correlation::CorrelationIdGenerator;
use crate::error::SerializationError;
use crate::message::{Message, MessageType, SerializedMessage};
use crate::properties::MessageProperties;

/// Encode/decode contract used by the publish and consume paths.
pub trait MessageSerializationStrategy: Send + Sync {
    /// Encodes `message` into properties plus payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the type name or body cannot be encoded.
    fn serialize_message(&self, message: &Message) -> Result<SerializedMessage, SerializationError>;

    /// Decodes a received payload.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError::TypeResolution` if no type name resolves,
    /// or `SerializationError::Decode` if the payload is malformed.
    fn deserialize_message(
        &self,
        properties: MessageProperties,
        body: &[u8],
    ) -> Result<Message, SerializationError>;
}

/// Stamps a fresh correlation id unless one is already set. Empty ids count as unset.
fn ensure_correlation_id(
    properties: MessageProperties,
    generator: &dyn CorrelationIdGenerator,
) -> MessageProperties {
    match properties.correlation_id() {
        Some(id) if !id.is_empty() => properties,
        _ => properties.with_correlation_id(generator.correlation_id()),
    }
}

/// Encodes the message body, or an empty payload for a body-less message.
fn encode_body(
    serializer: &dyn Serializer,
    message: &Message,
) -> Result<Vec<u8>, SerializationError> {
    match message.body() {
        None => Ok(Vec::new()),
        Some(body) => serializer
            .message_to_bytes(message.message_type(), body)
            .map_err(|source| SerializationError::Encode {
                message_type: message.message_type().clone(),
                source,
            }),
    }
}

/// Decodes a payload against `message_type`. An empty payload means no body.
fn decode_body(
    serializer: &dyn Serializer,
    message_type: &MessageType,
    body: &[u8],
) -> Result<Option<serde_json::Value>, SerializationError> {
    if body.is_empty() {
        return Ok(None);
    }
    serializer
        .bytes_to_message(message_type, body)
        .map(Some)
        .map_err(|source| SerializationError::Decode {
            message_type: message_type.clone(),
            source,
        })
}
