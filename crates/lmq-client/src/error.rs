//! Error types for message decoding, property encoding and queue operations.

use thiserror::Error;

/// Errors raised while turning a message body into an application value
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{decoder} decoder cannot write into a {destination} destination")]
    UnsupportedDestination {
        decoder: &'static str,
        destination: &'static str,
    },

    #[error("JSON decoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack decoding failed: {message}")]
    MessagePack { message: String },

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    #[error("Malformed compound part: {reason}")]
    MalformedPart { reason: String },

    #[error("Unknown message type: {message_type}")]
    UnknownMessageType { message_type: String },

    #[error("Decoder finished without producing a value")]
    NothingDecoded,

    #[error("Decoding failed: {message}")]
    Custom { message: String },
}

impl DecodeError {
    /// Build an error for decoders registered by applications
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

/// Outcome of a failed [`Message::decode_into`](crate::message::Message::decode_into) call
#[derive(Debug, Error)]
pub enum MessageError {
    /// Every part of the message has been consumed. Not a failure.
    #[error("lmq: message reached end")]
    EndOfMessage,

    #[error("lmq: message decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl MessageError {
    /// Check if this is the normal exhaustion signal rather than a decode failure
    pub fn is_end_of_message(&self) -> bool {
        matches!(self, Self::EndOfMessage)
    }
}

/// Errors while encoding or decoding queue properties
#[derive(Debug, Error)]
pub enum PropertyError {
    /// Wire data could not be parsed into a property
    #[error("Property parsing failed: {0}")]
    Parse(#[source] serde_json::Error),

    /// Encoding the property to JSON failed
    #[error("Property encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Default property pattern is not a valid regular expression
    #[error("Invalid queue name pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Errors returned by queue service operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LMQ error: {status} {message}")]
    Status { status: u16, message: String },

    #[error("Invalid queue name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Property error: {0}")]
    Property(#[from] PropertyError),

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ClientError {
    /// Check if error is transient and the operation may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidPattern(_) => false,
            Self::Property(_) => false,
            Self::InvalidResponse { .. } => false,
            Self::Configuration { .. } => false,
        }
    }

    /// Get the HTTP status code returned by the service, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
