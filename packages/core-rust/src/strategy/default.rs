//! Single-type-name serialization strategy.

use std::sync::Arc;

use super::{decode_body, encode_body, ensure_correlation_id, MessageSerializationStrategy};
use crate::codec::Serializer;
use crate::correlation::CorrelationIdGenerator;
use crate::error::{SerializationError, TypeResolutionError};
use crate::message::{Message, SerializedMessage};
use crate::properties::MessageProperties;
use crate::type_name::TypeNameSerializer;

/// Writes the wire name of the message type to the `Type` property and
/// resolves it again on decode.
pub struct DefaultMessageSerializationStrategy {
    type_names: Arc<dyn TypeNameSerializer>,
    serializer: Arc<dyn Serializer>,
    correlation_ids: Arc<dyn CorrelationIdGenerator>,
}

impl DefaultMessageSerializationStrategy {
    #[must_use]
    pub fn new(
        type_names: Arc<dyn TypeNameSerializer>,
        serializer: Arc<dyn Serializer>,
        correlation_ids: Arc<dyn CorrelationIdGenerator>,
    ) -> Self {
        Self {
            type_names,
            serializer,
            correlation_ids,
        }
    }
}

impl MessageSerializationStrategy for DefaultMessageSerializationStrategy {
    fn serialize_message(&self, message: &Message) -> Result<SerializedMessage, SerializationError> {
        let type_name = self.type_names.serialize(message.message_type())?;
        let body = encode_body(self.serializer.as_ref(), message)?;
        let properties = message.properties().with_type(type_name);
        let properties = ensure_correlation_id(properties, self.correlation_ids.as_ref());
        Ok(SerializedMessage::new(properties, body))
    }

    fn deserialize_message(
        &self,
        properties: MessageProperties,
        body: &[u8],
    ) -> Result<Message, SerializationError> {
        let Some(type_name) = properties.type_name() else {
            return Err(TypeResolutionError {
                candidates: Vec::new(),
            }
            .into());
        };
        let message_type = self.type_names.deserialize(type_name)?;
        let body = decode_body(self.serializer.as_ref(), &message_type, body)?;
        Ok(Message::from_parts(message_type, body, properties))
    }
}
