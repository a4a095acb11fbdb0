//! Message model: type identity, typed contracts, and the dynamic message
//! envelope exchanged with the serialization strategies.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SerializationError;
use crate::properties::MessageProperties;

/// Identity of an application message type, e.g. `"orders::OrderPlacedV2"`.
///
/// Cheap to clone. Two values are the same type iff their identifiers match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(Arc<str>);

impl MessageType {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Identity declared by a [`MessageContract`] implementor.
    #[must_use]
    pub fn of<T: MessageContract>() -> Self {
        Self::new(T::MESSAGE_TYPE)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A typed application message body.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct OrderPlaced { id: u64 }
///
/// impl MessageContract for OrderPlaced {
///     const MESSAGE_TYPE: &'static str = "orders::OrderPlaced";
/// }
/// ```
pub trait MessageContract: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identity of this type. Must be unique across the application.
    const MESSAGE_TYPE: &'static str;
}

/// A message whose body is held in dynamic form.
///
/// The body is `None` for messages that carry only properties (an empty
/// payload on the wire).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    message_type: MessageType,
    body: Option<serde_json::Value>,
    properties: MessageProperties,
}

impl Message {
    /// Wraps a typed body with empty properties.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError::Body` if `body` cannot be represented
    /// dynamically (e.g. a map with non-string keys).
    pub fn new<T: MessageContract>(body: &T) -> Result<Self, SerializationError> {
        Self::with_properties(body, MessageProperties::new())
    }

    /// Wraps a typed body with the given properties.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError::Body` if `body` cannot be represented dynamically.
    pub fn with_properties<T: MessageContract>(
        body: &T,
        properties: MessageProperties,
    ) -> Result<Self, SerializationError> {
        let message_type = MessageType::of::<T>();
        let value = serde_json::to_value(body).map_err(|e| SerializationError::Body {
            message_type: message_type.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            message_type,
            body: Some(value),
            properties,
        })
    }

    /// A properties-only message.
    #[must_use]
    pub fn without_body(message_type: MessageType, properties: MessageProperties) -> Self {
        Self {
            message_type,
            body: None,
            properties,
        }
    }

    #[must_use]
    pub fn from_parts(
        message_type: MessageType,
        body: Option<serde_json::Value>,
        properties: MessageProperties,
    ) -> Self {
        Self {
            message_type,
            body,
            properties,
        }
    }

    #[must_use]
    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    #[must_use]
    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    /// Reads the body back as `T`. Fields unknown to `T` are ignored, which
    /// is what lets an older contract read a newer message.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError::Body` if the body does not fit `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<Option<T>, SerializationError> {
        self.body
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| SerializationError::Body {
                message_type: self.message_type.clone(),
                reason: e.to_string(),
            })
    }
}

/// Encoded message ready to hand to the transport.
///
/// The payload is owned; it is moved, never shared, across the transport
/// boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedMessage {
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

impl SerializedMessage {
    #[must_use]
    pub fn new(properties: MessageProperties, body: Vec<u8>) -> Self {
        Self { properties, body }
    }
}
