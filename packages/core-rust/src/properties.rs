//! Message properties: immutable metadata carried alongside a message body.
//!
//! `MessageProperties` is a value type. Every `with_*` method returns a new
//! value and leaves the receiver untouched. Headers live in a persistent
//! `im::HashMap`, so a derived value shares all unmodified header storage
//! with the value it was derived from.
//!
//! Every scalar field is an `Option`: presence is tracked explicitly and never
//! inferred from a zero value. Headers are the one exception: they are
//! "present" when the map is non-empty.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Header carrying the publisher-confirm sequence number of a published message.
pub const CONFIRMATION_ID_HEADER: &str = "Burrow.Confirmation.Id";

// ---------------------------------------------------------------------------
// HeaderValue
// ---------------------------------------------------------------------------

/// A header field value, mirroring the AMQP field-table value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    /// Explicitly empty value.
    Void,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Raw bytes. Brokers commonly hand string headers back in this form.
    Bytes(Vec<u8>),
    Array(Vec<HeaderValue>),
    /// Nested table. `BTreeMap` keeps rendering deterministic.
    Table(BTreeMap<String, HeaderValue>),
}

impl HeaderValue {
    /// Returns the textual content of a `String` or UTF-8 `Bytes` value.
    ///
    /// Transports that coerce header strings to raw bytes round-trip through
    /// here, so callers should prefer this over matching on `String` alone.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Bytes(v) => match std::str::from_utf8(v) {
                Ok(s) => f.write_str(s),
                Err(_) => write!(f, "{v:?}"),
            },
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Table(table) => {
                f.write_str("[")?;
                for (i, (k, v)) in table.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for HeaderValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// Persistent header map shared between derived property values.
pub type Headers = im::HashMap<String, HeaderValue>;

// ---------------------------------------------------------------------------
// MessageProperties
// ---------------------------------------------------------------------------

/// Immutable message metadata.
///
/// Constructed once when a message is produced or received and never mutated
/// afterwards. Cloning is cheap: strings are copied but the header map is
/// shared.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageProperties {
    content_type: Option<String>,
    content_encoding: Option<String>,
    headers: Headers,
    /// Non-persistent (1) or persistent (2).
    delivery_mode: Option<u8>,
    /// 0 to 9.
    priority: Option<u8>,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    expiration: Option<Duration>,
    message_id: Option<String>,
    /// Unix time in seconds.
    timestamp: Option<i64>,
    type_name: Option<String>,
    user_id: Option<String>,
    app_id: Option<String>,
    cluster_id: Option<String>,
}

impl MessageProperties {
    /// Creates an empty property set with no field present.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---- accessors ----

    /// MIME type of the body, e.g. `application/json`.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Body encoding, e.g. `gzip`.
    #[must_use]
    pub fn content_encoding(&self) -> Option<&str> {
        self.content_encoding.as_deref()
    }

    /// All application headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Looks up a single header.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    /// `1` for transient, `2` for persistent delivery.
    #[must_use]
    pub fn delivery_mode(&self) -> Option<u8> {
        self.delivery_mode
    }

    /// Message priority, `0` to `9`.
    #[must_use]
    pub fn priority(&self) -> Option<u8> {
        self.priority
    }

    /// Id tying this message to a request or conversation.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Queue the consumer should reply to.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Per-message TTL.
    #[must_use]
    pub fn expiration(&self) -> Option<Duration> {
        self.expiration
    }

    /// Application-assigned message id.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Unix time in seconds.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Wire type name of the message body.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Authenticated user that published the message.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Id of the publishing application.
    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    /// Broker cluster id. Deprecated in AMQP 0-9-1 but still carried.
    #[must_use]
    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    // ---- presence ----

    /// Whether the content type field is set.
    #[must_use]
    pub fn content_type_present(&self) -> bool {
        self.content_type.is_some()
    }

    /// Whether the content encoding field is set.
    #[must_use]
    pub fn content_encoding_present(&self) -> bool {
        self.content_encoding.is_some()
    }

    /// Headers are present when at least one header is set.
    /// Whether the headers field is set.
    #[must_use]
    pub fn headers_present(&self) -> bool {
        !self.headers.is_empty()
    }

    /// Whether the delivery mode field is set.
    #[must_use]
    pub fn delivery_mode_present(&self) -> bool {
        self.delivery_mode.is_some()
    }

    /// Whether the priority field is set.
    #[must_use]
    pub fn priority_present(&self) -> bool {
        self.priority.is_some()
    }

    /// Whether the correlation id field is set.
    #[must_use]
    pub fn correlation_id_present(&self) -> bool {
        self.correlation_id.is_some()
    }

    /// Whether the reply to field is set.
    #[must_use]
    pub fn reply_to_present(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Whether the expiration field is set.
    #[must_use]
    pub fn expiration_present(&self) -> bool {
        self.expiration.is_some()
    }

    /// Whether the message id field is set.
    #[must_use]
    pub fn message_id_present(&self) -> bool {
        self.message_id.is_some()
    }

    /// Whether the timestamp field is set.
    #[must_use]
    pub fn timestamp_present(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Whether the type name field is set.
    #[must_use]
    pub fn type_name_present(&self) -> bool {
        self.type_name.is_some()
    }

    /// Whether the user id field is set.
    #[must_use]
    pub fn user_id_present(&self) -> bool {
        self.user_id.is_some()
    }

    /// Whether the app id field is set.
    #[must_use]
    pub fn app_id_present(&self) -> bool {
        self.app_id.is_some()
    }

    /// Whether the cluster id field is set.
    #[must_use]
    pub fn cluster_id_present(&self) -> bool {
        self.cluster_id.is_some()
    }

    // ---- update algebra ----

    #[must_use]
    pub fn with_content_type(&self, content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_content_encoding(&self, content_encoding: impl Into<String>) -> Self {
        Self {
            content_encoding: Some(content_encoding.into()),
            ..self.clone()
        }
    }

    /// Sets a single header, replacing any previous value under `key`.
    #[must_use]
    pub fn with_header(&self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        Self {
            headers: self.headers.update(key.into(), value.into()),
            ..self.clone()
        }
    }

    /// Merges `headers` over the existing ones. An empty input returns an
    /// unchanged copy.
    #[must_use]
    pub fn with_headers<I, K, V>(&self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<HeaderValue>,
    {
        let mut merged = self.headers.clone();
        for (key, value) in headers {
            merged.insert(key.into(), value.into());
        }
        Self {
            headers: merged,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn without_header(&self, key: &str) -> Self {
        Self {
            headers: self.headers.without(key),
            ..self.clone()
        }
    }

    /// Replaces the whole header map with the result of `replace`.
    #[must_use]
    pub fn replace_headers(&self, replace: impl FnOnce(&Headers) -> Headers) -> Self {
        Self {
            headers: replace(&self.headers),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_delivery_mode(&self, delivery_mode: u8) -> Self {
        Self {
            delivery_mode: Some(delivery_mode),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_priority(&self, priority: u8) -> Self {
        Self {
            priority: Some(priority),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_correlation_id(&self, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_reply_to(&self, reply_to: impl Into<String>) -> Self {
        Self {
            reply_to: Some(reply_to.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_expiration(&self, expiration: Duration) -> Self {
        Self {
            expiration: Some(expiration),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_message_id(&self, message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_timestamp(&self, timestamp: i64) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_type(&self, type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_user_id(&self, user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_app_id(&self, app_id: impl Into<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_cluster_id(&self, cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: Some(cluster_id.into()),
            ..self.clone()
        }
    }

    // ---- publisher confirms ----

    /// Stamps the publisher-confirm sequence number as a header.
    #[must_use]
    pub fn with_confirmation_id(&self, confirmation_id: u64) -> Self {
        self.with_header(CONFIRMATION_ID_HEADER, confirmation_id.to_string())
    }

    /// Reads back the publisher-confirm sequence number, if present and valid.
    #[must_use]
    pub fn confirmation_id(&self) -> Option<u64> {
        self.header(CONFIRMATION_ID_HEADER)?.as_text()?.parse().ok()
    }

    // ---- transport bridge ----

    /// Writes every present field onto `target`, leaving absent ones alone.
    pub fn copy_to(&self, target: &mut BasicProperties) {
        if let Some(v) = &self.content_type {
            target.content_type = Some(v.clone());
        }
        if let Some(v) = &self.content_encoding {
            target.content_encoding = Some(v.clone());
        }
        if let Some(v) = self.delivery_mode {
            target.delivery_mode = Some(v);
        }
        if let Some(v) = self.priority {
            target.priority = Some(v);
        }
        if let Some(v) = &self.correlation_id {
            target.correlation_id = Some(v.clone());
        }
        if let Some(v) = &self.reply_to {
            target.reply_to = Some(v.clone());
        }
        if let Some(v) = self.expiration {
            target.expiration = Some(v.as_millis().to_string());
        }
        if let Some(v) = &self.message_id {
            target.message_id = Some(v.clone());
        }
        if let Some(v) = self.timestamp {
            target.timestamp = Some(v);
        }
        if let Some(v) = &self.type_name {
            target.type_name = Some(v.clone());
        }
        if let Some(v) = &self.user_id {
            target.user_id = Some(v.clone());
        }
        if let Some(v) = &self.app_id {
            target.app_id = Some(v.clone());
        }
        if let Some(v) = &self.cluster_id {
            target.cluster_id = Some(v.clone());
        }
        if self.headers_present() {
            target.headers = Some(
                self.headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
        }
    }
}

impl From<&BasicProperties> for MessageProperties {
    fn from(basic: &BasicProperties) -> Self {
        Self {
            content_type: basic.content_type.clone(),
            content_encoding: basic.content_encoding.clone(),
            headers: basic
                .headers
                .as_ref()
                .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            delivery_mode: basic.delivery_mode,
            priority: basic.priority,
            correlation_id: basic.correlation_id.clone(),
            reply_to: basic.reply_to.clone(),
            // Unparseable expirations are dropped rather than rejected.
            expiration: basic
                .expiration
                .as_deref()
                .and_then(|ms| ms.parse::<u64>().ok())
                .map(Duration::from_millis),
            message_id: basic.message_id.clone(),
            timestamp: basic.timestamp,
            type_name: basic.type_name.clone(),
            user_id: basic.user_id.clone(),
            app_id: basic.app_id.clone(),
            cluster_id: basic.cluster_id.clone(),
        }
    }
}

fn write_field<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    value: Option<T>,
) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{name}={v}"),
        None => write!(f, "{name}=NULL"),
    }
}

impl fmt::Display for MessageProperties {
    /// Renders `Field=value` pairs, absent fields as `NULL` and headers sorted by key.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_field(f, "ContentType", self.content_type.as_deref())?;
        f.write_str(", ")?;
        write_field(f, "ContentEncoding", self.content_encoding.as_deref())?;
        f.write_str(", Headers=")?;
        if self.headers.is_empty() {
            f.write_str("NULL")?;
        } else {
            let sorted: BTreeMap<&String, &HeaderValue> = self.headers.iter().collect();
            f.write_str("[")?;
            for (i, (k, v)) in sorted.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{k}={v}")?;
            }
            f.write_str("]")?;
        }
        f.write_str(", ")?;
        write_field(f, "DeliveryMode", self.delivery_mode)?;
        f.write_str(", ")?;
        write_field(f, "Priority", self.priority)?;
        f.write_str(", ")?;
        write_field(f, "CorrelationId", self.correlation_id.as_deref())?;
        f.write_str(", ")?;
        write_field(f, "ReplyTo", self.reply_to.as_deref())?;
        f.write_str(", ")?;
        write_field(
            f,
            "Expiration",
            self.expiration.map(|e| format!("{}ms", e.as_millis())),
        )?;
        f.write_str(", ")?;
        write_field(f, "MessageId", self.message_id.as_deref())?;
        f.write_str(", ")?;
        write_field(f, "Timestamp", self.timestamp)?;
        f.write_str(", ")?;
        write_field(f, "Type", self.type_name.as_deref())?;
        f.write_str(", ")?;
        write_field(f, "UserId", self.user_id.as_deref())?;
        f.write_str(", ")?;
        write_field(f, "AppId", self.app_id.as_deref())?;
        f.write_str(", ")?;
        write_field(f, "ClusterId", self.cluster_id.as_deref())
    }
}

// ---------------------------------------------------------------------------
// BasicProperties
// ---------------------------------------------------------------------------

/// Property record in the shape the transport exchanges with the broker.
///
/// Expiration travels as a decimal millisecond string and headers as a plain
/// table; `MessageProperties` converts to and from this form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<HashMap<String, HeaderValue>>,
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<i64>,
    pub type_name: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
