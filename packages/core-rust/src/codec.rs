//! Byte codecs turning dynamic message bodies into payload bytes and back.
//!
//! `MsgPackSerializer` writes named `MsgPack` (maps keyed by field name), so
//! a reader with fewer fields than the writer can still decode the payload.

use crate::message::MessageType;

/// Pluggable body codec.
pub trait Serializer: Send + Sync {
    /// Encodes `body`, declared as `message_type`, to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be encoded.
    fn message_to_bytes(
        &self,
        message_type: &MessageType,
        body: &serde_json::Value,
    ) -> anyhow::Result<Vec<u8>>;

    /// Decodes `bytes` as a body of `message_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding.
    fn bytes_to_message(
        &self,
        message_type: &MessageType,
        bytes: &[u8],
    ) -> anyhow::Result<serde_json::Value>;
}

/// Named `MsgPack` codec built on `rmp-serde`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackSerializer;

impl Serializer for MsgPackSerializer {
    fn message_to_bytes(
        &self,
        _message_type: &MessageType,
        body: &serde_json::Value,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(body)?)
    }

    fn bytes_to_message(
        &self,
        _message_type: &MessageType,
        bytes: &[u8],
    ) -> anyhow::Result<serde_json::Value> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// UTF-8 JSON codec built on `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn message_to_bytes(
        &self,
        _message_type: &MessageType,
        body: &serde_json::Value,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(body)?)
    }

    fn bytes_to_message(
        &self,
        _message_type: &MessageType,
        bytes: &[u8],
    ) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
