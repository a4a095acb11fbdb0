//! Versioned serialization strategy.
//!
//! A message type may declare that it supersedes an older type. On encode the
//! primary wire name goes to the `Type` property and the names of every
//! superseded type, most recent first, go to the
//! [`ALTERNATIVE_MESSAGE_TYPES_HEADER`] header. On decode the first name that
//! the local type-name codec recognises wins, so a consumer built against an
//! older contract can still read messages published as a newer one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::{decode_body, encode_body, ensure_correlation_id, MessageSerializationStrategy};
use crate::codec::Serializer;
use crate::correlation::CorrelationIdGenerator;
use crate::error::{SerializationError, TypeResolutionError};
use crate::message::{Message, MessageContract, MessageType, SerializedMessage};
use crate::properties::MessageProperties;
use crate::type_name::TypeNameSerializer;

/// Header holding the `;`-separated wire names of superseded types.
pub const ALTERNATIVE_MESSAGE_TYPES_HEADER: &str = "Alternative-Message-Types";

const ALTERNATIVE_MESSAGE_TYPES_SEPARATOR: char = ';';

// ---------------------------------------------------------------------------
// SupersessionMap
// ---------------------------------------------------------------------------

/// Static declarations of which type supersedes which.
///
/// Each type supersedes at most one direct predecessor; chains are followed
/// transitively.
#[derive(Debug, Clone, Default)]
pub struct SupersessionMap {
    supersedes: HashMap<MessageType, MessageType>,
}

impl SupersessionMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `newer` supersedes `older`.
    #[must_use]
    pub fn declare(mut self, newer: MessageType, older: MessageType) -> Self {
        self.supersedes.insert(newer, older);
        self
    }

    /// Declares that `N` supersedes `O`.
    #[must_use]
    pub fn declare_types<N: MessageContract, O: MessageContract>(self) -> Self {
        self.declare(MessageType::of::<N>(), MessageType::of::<O>())
    }

    /// `message_type` followed by every type it transitively supersedes,
    /// most recent first.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError::SupersessionCycle` if the declarations loop.
    pub fn chain(&self, message_type: &MessageType) -> Result<Vec<MessageType>, SerializationError> {
        let mut chain = vec![message_type.clone()];
        let mut seen: HashSet<&MessageType> = HashSet::from([message_type]);
        let mut current = message_type;

        while let Some(older) = self.supersedes.get(current) {
            if !seen.insert(older) {
                return Err(SerializationError::SupersessionCycle {
                    message_type: message_type.clone(),
                });
            }
            chain.push(older.clone());
            current = older;
        }
        Ok(chain)
    }
}

// ---------------------------------------------------------------------------
// MessageTypeProperty
// ---------------------------------------------------------------------------

/// View over the `Type` property plus the alternative-types header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypeProperty {
    message_type: String,
    alternative_types: Vec<String>,
}

impl MessageTypeProperty {
    /// Renders the supersession chain of `message_type` to wire names.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is cyclic or a name cannot be rendered.
    pub fn for_message_type(
        message_type: &MessageType,
        type_names: &dyn TypeNameSerializer,
        supersession: &SupersessionMap,
    ) -> Result<Self, SerializationError> {
        let mut names = supersession
            .chain(message_type)?
            .iter()
            .map(|ty| type_names.serialize(ty))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter();

        // `chain` always yields at least `message_type` itself.
        let primary = names.next().unwrap_or_default();
        Ok(Self {
            message_type: primary,
            alternative_types: names.collect(),
        })
    }

    /// Reads the type names back from received properties.
    ///
    /// The header may arrive as a string or as raw bytes; empty segments are ignored.
    #[must_use]
    pub fn extract_from(properties: &MessageProperties) -> Self {
        let alternative_types = properties
            .header(ALTERNATIVE_MESSAGE_TYPES_HEADER)
            .and_then(|value| value.as_text())
            .map(|text| {
                text.split(ALTERNATIVE_MESSAGE_TYPES_SEPARATOR)
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            message_type: properties.type_name().unwrap_or_default().to_string(),
            alternative_types,
        }
    }

    /// Writes the primary name to `Type` and, when there are any, the
    /// alternatives to the header.
    #[must_use]
    pub fn append_to(&self, properties: &MessageProperties) -> MessageProperties {
        let properties = properties.with_type(self.message_type.clone());
        if self.alternative_types.is_empty() {
            return properties;
        }
        let joined = self
            .alternative_types
            .join(&ALTERNATIVE_MESSAGE_TYPES_SEPARATOR.to_string());
        properties.with_header(ALTERNATIVE_MESSAGE_TYPES_HEADER, joined)
    }

    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    #[must_use]
    pub fn alternative_types(&self) -> &[String] {
        &self.alternative_types
    }

    /// Candidate names in resolution order: primary first, then alternatives.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.message_type.as_str())
            .filter(|name| !name.is_empty())
            .chain(self.alternative_types.iter().map(String::as_str))
    }

    /// Resolves the first candidate known to `type_names`.
    ///
    /// # Errors
    ///
    /// Returns `TypeResolutionError` listing every candidate if none resolves.
    pub fn resolve(
        &self,
        type_names: &dyn TypeNameSerializer,
    ) -> Result<MessageType, TypeResolutionError> {
        for name in self.candidates() {
            match type_names.deserialize(name) {
                Ok(message_type) => return Ok(message_type),
                Err(_) => debug!(type_name = name, "message type not known locally, trying next"),
            }
        }
        Err(TypeResolutionError {
            candidates: self.candidates().map(str::to_string).collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// VersionedMessageSerializationStrategy
// ---------------------------------------------------------------------------

/// Serialization strategy that tolerates type evolution between producers
/// and consumers.
pub struct VersionedMessageSerializationStrategy {
    type_names: Arc<dyn TypeNameSerializer>,
    serializer: Arc<dyn Serializer>,
    correlation_ids: Arc<dyn CorrelationIdGenerator>,
    supersession: SupersessionMap,
}

impl VersionedMessageSerializationStrategy {
    #[must_use]
    pub fn new(
        type_names: Arc<dyn TypeNameSerializer>,
        serializer: Arc<dyn Serializer>,
        correlation_ids: Arc<dyn CorrelationIdGenerator>,
        supersession: SupersessionMap,
    ) -> Self {
        Self {
            type_names,
            serializer,
            correlation_ids,
            supersession,
        }
    }
}

impl MessageSerializationStrategy for VersionedMessageSerializationStrategy {
    fn serialize_message(&self, message: &Message) -> Result<SerializedMessage, SerializationError> {
        let body = encode_body(self.serializer.as_ref(), message)?;
        let type_property = MessageTypeProperty::for_message_type(
            message.message_type(),
            self.type_names.as_ref(),
            &self.supersession,
        )?;
        let properties = type_property.append_to(message.properties());
        let properties = ensure_correlation_id(properties, self.correlation_ids.as_ref());
        Ok(SerializedMessage::new(properties, body))
    }

    fn deserialize_message(
        &self,
        properties: MessageProperties,
        body: &[u8],
    ) -> Result<Message, SerializationError> {
        let message_type =
            MessageTypeProperty::extract_from(&properties).resolve(self.type_names.as_ref())?;
        let body = decode_body(self.serializer.as_ref(), &message_type, body)?;
        Ok(Message::from_parts(message_type, body, properties))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
