//! Burrow Core: message properties, type names, body codecs, and the
//! serialization strategies that turn typed messages into wire payloads.

pub mod codec;
pub mod consume;
pub mod correlation;
pub mod error;
pub mod message;
pub mod properties;
pub mod strategy;
pub mod type_name;

pub use codec::{JsonSerializer, MsgPackSerializer, Serializer};
pub use consume::{ConsumeConfiguration, PerQueueConsumeConfiguration};
pub use correlation::{
    CorrelationIdGenerator, StaticCorrelationIdGenerator, UuidCorrelationIdGenerator,
};
pub use error::{SerializationError, TypeResolutionError};
pub use message::{Message, MessageContract, MessageType, SerializedMessage};
pub use properties::{BasicProperties, HeaderValue, Headers, MessageProperties};
pub use strategy::{
    DefaultMessageSerializationStrategy, MessageSerializationStrategy, SupersessionMap,
    VersionedMessageSerializationStrategy,
};
pub use type_name::{DefaultTypeNameSerializer, TypeNameSerializer};
