//! Messages delivered by the queue service and their decode state machine.

use crate::decode::{read_msgpack, DecoderRegistry, Destination, Payload, Typed};
use crate::error::{DecodeError, MessageError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

/// Metadata key holding the content type of a compound part
pub const PART_CONTENT_TYPE_KEY: &str = "content-type";

/// Shape of a delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Single body, decoded exactly once
    Normal,
    /// Sequence of independently typed parts, decoded one per call
    Compound,
    /// Tag not understood by this client
    Other(String),
}

impl MessageType {
    /// Get the wire tag
    pub fn as_str(&self) -> &str {
        match self {
            Self::Normal => "normal",
            Self::Compound => "compound",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s {
            "normal" => Self::Normal,
            "compound" => Self::Compound,
            other => Self::Other(other.to_string()),
        }
    }
}

impl FromStr for MessageType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// Everything the transport knows about one received delivery
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Identifier assigned by the server
    pub id: String,
    /// Queue the delivery was taken from
    pub queue: String,
    pub message_type: MessageType,
    /// Declared content type of the body
    pub content_type: String,
    /// Remaining retries, `None` when the server did not report one
    pub retry_remaining: Option<u32>,
    pub body: Bytes,
}

impl Delivery {
    /// Create a normal delivery with the given content type and body
    pub fn normal(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            id: String::new(),
            queue: String::new(),
            message_type: MessageType::Normal,
            content_type: content_type.into(),
            retry_remaining: None,
            body: body.into(),
        }
    }

    /// Create a compound delivery from a MessagePack framed body
    pub fn compound(body: impl Into<Bytes>) -> Self {
        Self {
            message_type: MessageType::Compound,
            content_type: crate::decode::CONTENT_TYPE_MSGPACK.to_string(),
            ..Self::normal(String::new(), body)
        }
    }

    /// Set the message identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the queue name
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Set the remaining retry count
    pub fn with_retry_remaining(mut self, retry: u32) -> Self {
        self.retry_remaining = Some(retry);
        self
    }
}

/// One delivery from the queue.
///
/// Call [`decode`](Self::decode) or [`decode_into`](Self::decode_into)
/// repeatedly until it returns [`MessageError::EndOfMessage`]. A normal
/// message yields exactly one result; a compound message yields one result
/// per part, in order.
///
/// # Examples
///
/// ```
/// use lmq_client::message::{Delivery, Message};
///
/// #[derive(Debug, serde::Deserialize)]
/// struct Job {
///     id: u32,
/// }
///
/// let mut message = Message::with_builtin_decoders(Delivery::normal(
///     "application/json",
///     br#"{"id":1}"#.to_vec(),
/// ));
/// let job: Job = message.decode().unwrap();
/// assert_eq!(job.id, 1);
/// assert!(message.decode::<Job>().unwrap_err().is_end_of_message());
/// ```
#[derive(Debug)]
pub struct Message {
    id: String,
    queue: String,
    message_type: MessageType,
    content_type: String,
    retry_remaining: Option<u32>,
    body: Bytes,
    parts: Option<VecDeque<rmpv::Value>>,
    exhausted: bool,
    registry: Arc<DecoderRegistry>,
}

impl Message {
    /// Wrap a delivery, decoding its body with `registry`
    pub fn new(delivery: Delivery, registry: Arc<DecoderRegistry>) -> Self {
        Self {
            id: delivery.id,
            queue: delivery.queue,
            message_type: delivery.message_type,
            content_type: delivery.content_type,
            retry_remaining: delivery.retry_remaining,
            body: delivery.body,
            parts: None,
            exhausted: false,
            registry,
        }
    }

    /// Wrap a delivery using a fresh registry holding only the built-in decoders
    pub fn with_builtin_decoders(delivery: Delivery) -> Self {
        Self::new(delivery, Arc::new(DecoderRegistry::with_builtins()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Remaining retries, `None` when unknown. Distinct from `Some(0)`.
    pub fn retry_remaining(&self) -> Option<u32> {
        self.retry_remaining
    }

    /// Raw body as received
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Check whether every decode from now on returns `EndOfMessage`
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Decode the next body or part into `destination`.
    ///
    /// # Errors
    ///
    /// - [`MessageError::EndOfMessage`] once the message is exhausted
    /// - [`MessageError::Decode`] when the body or part cannot be decoded.
    ///   A normal message is exhausted even when its single decode fails.
    ///   A failed compound part is consumed; later parts stay available.
    pub fn decode_into(&mut self, destination: Destination<'_>) -> Result<(), MessageError> {
        if self.exhausted {
            return Err(MessageError::EndOfMessage);
        }

        match self.message_type {
            MessageType::Normal => {
                self.exhausted = true;
                self.registry
                    .decode(&self.content_type, &self.body, destination)
                    .map_err(MessageError::from)
            }
            MessageType::Compound => self.decode_next_part(destination),
            MessageType::Other(ref tag) => Err(DecodeError::UnknownMessageType {
                message_type: tag.clone(),
            }
            .into()),
        }
    }

    /// Decode the next body or part into a deserializable type
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<T, MessageError> {
        let mut slot = Typed::<T>::new();
        self.decode_into(Destination::Typed(&mut slot))?;
        slot.into_inner()
            .ok_or(MessageError::Decode(DecodeError::NothingDecoded))
    }

    /// Decode the next body or part into a generic [`Payload`]
    pub fn decode_payload(&mut self) -> Result<Payload, MessageError> {
        let mut payload = Payload::default();
        self.decode_into(Destination::Payload(&mut payload))?;
        Ok(payload)
    }

    fn decode_next_part(&mut self, destination: Destination<'_>) -> Result<(), MessageError> {
        if self.parts.is_none() {
            match unpack_compound(&self.body) {
                Ok(parts) => {
                    debug!(
                        message_id = %self.id,
                        parts = parts.len(),
                        "Unpacked compound message"
                    );
                    self.parts = Some(parts);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Err(e.into());
                }
            }
        }

        let Some(part) = self.parts.as_mut().and_then(VecDeque::pop_front) else {
            self.exhausted = true;
            return Err(MessageError::EndOfMessage);
        };
        if self.parts.as_ref().is_some_and(VecDeque::is_empty) {
            self.exhausted = true;
        }

        let (content_type, content) = split_part(part).inspect_err(|e| {
            warn!(message_id = %self.id, error = %e, "Skipping malformed compound part");
        })?;
        self.registry
            .decode(&content_type, &content, destination)
            .map_err(MessageError::from)
    }
}

/// Read the compound framing: an array of `[metadata, content]` pairs.
/// Individual pairs are validated lazily as they are consumed.
fn unpack_compound(body: &[u8]) -> Result<VecDeque<rmpv::Value>, DecodeError> {
    match read_msgpack(body)? {
        rmpv::Value::Array(parts) => Ok(parts.into()),
        other => Err(DecodeError::MalformedPart {
            reason: format!("compound body must be an array, found {}", other),
        }),
    }
}

fn split_part(part: rmpv::Value) -> Result<(String, Vec<u8>), DecodeError> {
    let rmpv::Value::Array(mut pair) = part else {
        return Err(DecodeError::MalformedPart {
            reason: "part is not an array".to_string(),
        });
    };
    if pair.len() != 2 {
        return Err(DecodeError::MalformedPart {
            reason: format!("part has {} elements, expected 2", pair.len()),
        });
    }

    let content = match pair.pop() {
        Some(rmpv::Value::Binary(b)) => b,
        Some(rmpv::Value::String(s)) => s.into_bytes(),
        _ => {
            return Err(DecodeError::MalformedPart {
                reason: "content is not binary".to_string(),
            })
        }
    };

    let content_type = pair
        .pop()
        .as_ref()
        .and_then(rmpv::Value::as_map)
        .and_then(|meta| {
            meta.iter()
                .find(|(k, _)| k.as_str() == Some(PART_CONTENT_TYPE_KEY))
                .and_then(|(_, v)| v.as_str())
                .map(str::to_string)
        })
        .ok_or_else(|| DecodeError::MalformedPart {
            reason: format!("metadata has no {} entry", PART_CONTENT_TYPE_KEY),
        })?;

    Ok((content_type, content))
}
