//! Failure classification: decides whether a failed channel action is
//! retried and whether the channel it ran on is discarded.

use std::collections::HashMap;

use crate::transport::{reply_codes, TransportError};

/// Message fragment the transport uses when a channel sees concurrent requests.
const PIPELINING_FORBIDDEN: &str = "Pipelining of requests forbidden";

/// Outcome of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionVerdict {
    /// Retry after backoff on the same channel.
    Suppress,
    /// Retry after backoff on a fresh channel.
    SuppressAndCloseChannel,
    /// Surface to the caller; the channel stays.
    Throw,
    /// Surface to the caller and discard the channel.
    ThrowAndCloseChannel,
}

impl ExceptionVerdict {
    /// Whether the failure goes back to the caller instead of being retried.
    #[must_use]
    pub const fn rethrow(self) -> bool {
        matches!(self, Self::Throw | Self::ThrowAndCloseChannel)
    }

    /// Whether the current channel is discarded before the next attempt.
    #[must_use]
    pub const fn close_channel(self) -> bool {
        matches!(self, Self::SuppressAndCloseChannel | Self::ThrowAndCloseChannel)
    }
}

/// Whether `message` is the transport's pipelining-forbidden complaint.
///
/// Matched by substring until the transport exposes a structured code.
#[must_use]
pub fn is_pipelining_forbidden(message: &str) -> bool {
    message.contains(PIPELINING_FORBIDDEN)
}

/// Maps transport failures to verdicts.
///
/// Interruptions are looked up by broker reply code in a policy table.
/// Codes missing from the table, and interruptions without a reason, are
/// fatal and leave the channel alone.
#[derive(Debug, Clone)]
pub struct ExceptionClassifier {
    reply_codes: HashMap<u16, ExceptionVerdict>,
}

impl Default for ExceptionClassifier {
    fn default() -> Self {
        let reply_codes = HashMap::from([
            (reply_codes::CONNECTION_FORCED, ExceptionVerdict::Suppress),
            (reply_codes::ACCESS_REFUSED, ExceptionVerdict::ThrowAndCloseChannel),
            (reply_codes::NOT_FOUND, ExceptionVerdict::ThrowAndCloseChannel),
            (reply_codes::RESOURCE_LOCKED, ExceptionVerdict::ThrowAndCloseChannel),
            (reply_codes::PRECONDITION_FAILED, ExceptionVerdict::ThrowAndCloseChannel),
            (reply_codes::INTERNAL_ERROR, ExceptionVerdict::SuppressAndCloseChannel),
        ]);
        Self { reply_codes }
    }
}

impl ExceptionClassifier {
    /// Classifier with the default reply-code policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the verdict for one broker reply code.
    #[must_use]
    pub fn with_reply_code(mut self, reply_code: u16, verdict: ExceptionVerdict) -> Self {
        self.reply_codes.insert(reply_code, verdict);
        self
    }

    #[must_use]
    pub fn verdict_for_reply_code(&self, reply_code: u16) -> ExceptionVerdict {
        self.reply_codes
            .get(&reply_code)
            .copied()
            .unwrap_or(ExceptionVerdict::Throw)
    }

    #[must_use]
    pub fn classify(&self, error: &TransportError) -> ExceptionVerdict {
        match error {
            TransportError::OperationInterrupted { reason: Some(reason) } => {
                self.verdict_for_reply_code(reason.reply_code)
            }
            TransportError::OperationInterrupted { reason: None } | TransportError::Other(_) => {
                ExceptionVerdict::Throw
            }
            TransportError::NotSupported(message) if is_pipelining_forbidden(message) => {
                ExceptionVerdict::SuppressAndCloseChannel
            }
            TransportError::NotSupported(_) => ExceptionVerdict::Throw,
            TransportError::BrokerUnreachable(_) | TransportError::Client(_) => {
                ExceptionVerdict::Suppress
            }
        }
    }
}
