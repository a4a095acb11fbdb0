//! Type-name codec: maps message types to wire type names and back.

use std::collections::HashMap;

use crate::error::{SerializationError, TypeResolutionError};
use crate::message::{MessageContract, MessageType};

/// Maximum length of a wire type name (AMQP short string).
pub const MAX_TYPE_NAME_LEN: usize = 255;

/// Converts between message types and the names written to `Type` properties.
pub trait TypeNameSerializer: Send + Sync {
    /// Renders the wire name of `message_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the type cannot be represented on the wire.
    fn serialize(&self, message_type: &MessageType) -> Result<String, SerializationError>;

    /// Resolves a wire name to a known message type.
    ///
    /// # Errors
    ///
    /// Returns `TypeResolutionError` if `name` is not recognised.
    fn deserialize(&self, name: &str) -> Result<MessageType, TypeResolutionError>;
}

/// Registry-backed type-name codec.
///
/// The wire name of a type is its identity. Only registered types resolve on
/// decode; the registry is built up front and never changes afterwards.
#[derive(Debug, Clone, Default)]
pub struct DefaultTypeNameSerializer {
    known: HashMap<String, MessageType>,
}

impl DefaultTypeNameSerializer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a registry that additionally knows `T`.
    #[must_use]
    pub fn register<T: MessageContract>(self) -> Self {
        self.with_type(MessageType::of::<T>())
    }

    /// Returns a registry that additionally knows `message_type`.
    #[must_use]
    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.known
            .insert(message_type.as_str().to_string(), message_type);
        self
    }
}

impl TypeNameSerializer for DefaultTypeNameSerializer {
    fn serialize(&self, message_type: &MessageType) -> Result<String, SerializationError> {
        let name = message_type.as_str();
        if name.chars().count() > MAX_TYPE_NAME_LEN {
            return Err(SerializationError::TypeNameTooLong {
                name: name.to_string(),
                max: MAX_TYPE_NAME_LEN,
            });
        }
        Ok(name.to_string())
    }

    fn deserialize(&self, name: &str) -> Result<MessageType, TypeResolutionError> {
        self.known
            .get(name)
            .cloned()
            .ok_or_else(|| TypeResolutionError::unknown(name))
    }
}
