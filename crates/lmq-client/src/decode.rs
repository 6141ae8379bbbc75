//! Content-type driven decoding of message bodies.
//!
//! A [`DecoderRegistry`] maps exact content-type strings to [`Decoder`]
//! implementations. Bodies whose content type has no entry fall through to
//! [`RawDecoder`], which only knows how to move bytes around.
//!
//! Decoders write into a [`Destination`], a closed set of slots an
//! application can hand to [`Message::decode_into`](crate::message::Message::decode_into):
//!
//! - [`Destination::Buffer`] - fixed-capacity buffer, filled best effort
//! - [`Destination::Bytes`] - growable buffer, replaced with the full body
//! - [`Destination::Payload`] - generic slot holding bytes, text or structured data
//! - [`Destination::Typed`] - a deserializable application type, see [`Typed`]
//!
//! Structured decoders (JSON, MessagePack) share `serde_json::Value` as their
//! intermediate form so that a type deserializable from JSON can also be read
//! from a MessagePack body.

use crate::error::DecodeError;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

#[cfg(test)]
#[path = "decode_tests.rs"]
mod tests;

/// Content type of MessagePack bodies, also used for compound message framing
pub const CONTENT_TYPE_MSGPACK: &str = "application/x-msgpack";

/// Content type of JSON bodies
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type of plain text bodies
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

// ============================================================================
// Destinations
// ============================================================================

/// Generic decode result for callers that do not know the body type up front
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes, produced by the passthrough decoder
    Bytes(Vec<u8>),
    /// UTF-8 text, produced by the `text/plain` decoder
    Text(String),
    /// Structured data, produced by the JSON and MessagePack decoders
    Structured(serde_json::Value),
}

impl Payload {
    /// Get the payload as bytes if it holds raw bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the payload as text if it holds text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get the payload as structured data if it holds a structured value
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(v) => Some(v),
            _ => None,
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::Bytes(Vec::new())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Self::Text(s) => f.write_str(s),
            Self::Structured(v) => write!(f, "{}", v),
        }
    }
}

/// Slot that accepts a structured value and converts it to a concrete type
pub trait TypedSlot {
    /// Store `value` in the slot, converting it to the slot's type
    fn fill(&mut self, value: serde_json::Value) -> Result<(), DecodeError>;
}

/// Typed destination for any deserializable application type
///
/// # Examples
///
/// ```
/// use lmq_client::decode::{Destination, DecoderRegistry, Typed, CONTENT_TYPE_JSON};
///
/// #[derive(serde::Deserialize)]
/// struct Job {
///     id: u32,
/// }
///
/// let registry = DecoderRegistry::with_builtins();
/// let mut slot = Typed::<Job>::new();
/// registry
///     .decode(CONTENT_TYPE_JSON, br#"{"id":7}"#, Destination::Typed(&mut slot))
///     .unwrap();
/// assert_eq!(slot.into_inner().unwrap().id, 7);
/// ```
#[derive(Debug)]
pub struct Typed<T> {
    value: Option<T>,
}

impl<T> Typed<T> {
    /// Create an empty slot
    pub fn new() -> Self {
        Self { value: None }
    }

    /// Get the decoded value, if any
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Take the decoded value out of the slot
    pub fn into_inner(self) -> Option<T> {
        self.value
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> TypedSlot for Typed<T> {
    fn fill(&mut self, value: serde_json::Value) -> Result<(), DecodeError> {
        self.value = Some(serde_json::from_value(value)?);
        Ok(())
    }
}

/// Where a decoder writes its result
pub enum Destination<'a> {
    /// Fixed-capacity buffer. Bodies longer than the buffer are truncated
    /// without error.
    Buffer(&'a mut [u8]),
    /// Growable buffer. Its contents are replaced with the full body.
    Bytes(&'a mut Vec<u8>),
    /// Generic slot
    Payload(&'a mut Payload),
    /// Deserializable application type
    Typed(&'a mut dyn TypedSlot),
}

impl Destination<'_> {
    /// Short name of the destination shape, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Bytes(_) => "bytes",
            Self::Payload(_) => "payload",
            Self::Typed(_) => "typed",
        }
    }
}

impl fmt::Debug for Destination<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Destination").field(&self.kind()).finish()
    }
}

// ============================================================================
// Decoders
// ============================================================================

/// Capability to decode a raw body into a [`Destination`]
pub trait Decoder: Send + Sync {
    /// Decode `body` and write the result into `destination`
    fn decode(&self, body: &[u8], destination: Destination<'_>) -> Result<(), DecodeError>;
}

/// Adapter turning a closure into a [`Decoder`]
pub struct FnDecoder<F>(pub F);

impl<F> Decoder for FnDecoder<F>
where
    F: for<'a, 'b> Fn(&'a [u8], Destination<'b>) -> Result<(), DecodeError> + Send + Sync,
{
    fn decode(&self, body: &[u8], destination: Destination<'_>) -> Result<(), DecodeError> {
        (self.0)(body, destination)
    }
}

/// Passthrough decoder applied when no decoder is registered for a content type
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn decode(&self, body: &[u8], destination: Destination<'_>) -> Result<(), DecodeError> {
        match destination {
            Destination::Buffer(buf) => {
                let n = buf.len().min(body.len());
                buf[..n].copy_from_slice(&body[..n]);
                Ok(())
            }
            Destination::Bytes(out) => {
                out.clear();
                out.extend_from_slice(body);
                Ok(())
            }
            Destination::Payload(slot) => {
                *slot = Payload::Bytes(body.to_vec());
                Ok(())
            }
            other => Err(DecodeError::UnsupportedDestination {
                decoder: "raw",
                destination: other.kind(),
            }),
        }
    }
}

/// `text/plain` decoder. Prefers string output for generic and typed slots
/// and behaves like [`RawDecoder`] for byte buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl Decoder for TextDecoder {
    fn decode(&self, body: &[u8], destination: Destination<'_>) -> Result<(), DecodeError> {
        match destination {
            Destination::Payload(slot) => {
                *slot = Payload::Text(utf8(body)?);
                Ok(())
            }
            Destination::Typed(slot) => slot.fill(serde_json::Value::String(utf8(body)?)),
            other => RawDecoder.decode(body, other),
        }
    }
}

/// JSON decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, body: &[u8], destination: Destination<'_>) -> Result<(), DecodeError> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        write_structured("json", value, destination)
    }
}

/// MessagePack decoder. Binary fields are decoded as strings so MessagePack
/// and JSON bodies can target the same types. Values JSON cannot represent
/// (NaN or infinite floats, non-UTF-8 map keys, extension types) fail with
/// [`DecodeError::MessagePack`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackDecoder;

impl Decoder for MessagePackDecoder {
    fn decode(&self, body: &[u8], destination: Destination<'_>) -> Result<(), DecodeError> {
        let value = read_msgpack(body)?;
        write_structured("msgpack", msgpack_to_json(value)?, destination)
    }
}

fn write_structured(
    decoder: &'static str,
    value: serde_json::Value,
    destination: Destination<'_>,
) -> Result<(), DecodeError> {
    match destination {
        Destination::Typed(slot) => slot.fill(value),
        Destination::Payload(slot) => {
            *slot = Payload::Structured(value);
            Ok(())
        }
        other => Err(DecodeError::UnsupportedDestination {
            decoder,
            destination: other.kind(),
        }),
    }
}

fn utf8(body: &[u8]) -> Result<String, DecodeError> {
    String::from_utf8(body.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

/// Read exactly one MessagePack value from `body`
pub(crate) fn read_msgpack(body: &[u8]) -> Result<rmpv::Value, DecodeError> {
    let mut reader = body;
    rmpv::decode::read_value(&mut reader).map_err(|e| DecodeError::MessagePack {
        message: e.to_string(),
    })
}

/// Convert a MessagePack value to its JSON counterpart.
///
/// Binary data becomes a string when it is valid UTF-8 and an array of
/// byte values otherwise. Non-string map keys are rendered as text; a key
/// that is not valid UTF-8 is an error, as is a NaN or infinite float.
pub(crate) fn msgpack_to_json(value: rmpv::Value) -> Result<serde_json::Value, DecodeError> {
    use rmpv::Value as Mp;
    use serde_json::Value as Json;

    Ok(match value {
        Mp::Nil => Json::Null,
        Mp::Boolean(b) => Json::Bool(b),
        Mp::Integer(i) => {
            if let Some(n) = i.as_i64() {
                Json::from(n)
            } else if let Some(n) = i.as_u64() {
                Json::from(n)
            } else {
                return Err(DecodeError::MessagePack {
                    message: format!("integer out of range: {:?}", i),
                });
            }
        }
        Mp::F32(f) => float(f64::from(f))?,
        Mp::F64(f) => float(f)?,
        Mp::String(s) => Json::String(match s.into_str() {
            Some(s) => s,
            None => {
                return Err(DecodeError::MessagePack {
                    message: "string is not valid UTF-8".to_string(),
                })
            }
        }),
        Mp::Binary(b) => binary_to_json(b),
        Mp::Array(items) => Json::Array(
            items
                .into_iter()
                .map(msgpack_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Mp::Map(entries) => {
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match key {
                    Mp::String(s) => s.into_str().ok_or_else(invalid_key)?,
                    Mp::Binary(b) => String::from_utf8(b).map_err(|_| invalid_key())?,
                    other => other.to_string(),
                };
                object.insert(key, msgpack_to_json(value)?);
            }
            Json::Object(object)
        }
        Mp::Ext(tag, _) => {
            return Err(DecodeError::MessagePack {
                message: format!("unsupported extension type {}", tag),
            })
        }
    })
}

/// JSON has no NaN or infinity
fn float(f: f64) -> Result<serde_json::Value, DecodeError> {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .ok_or_else(|| DecodeError::MessagePack {
            message: format!("non-finite float {} has no structured form", f),
        })
}

fn invalid_key() -> DecodeError {
    DecodeError::MessagePack {
        message: "map key is not valid UTF-8".to_string(),
    }
}

fn binary_to_json(bytes: Vec<u8>) -> serde_json::Value {
    match String::from_utf8(bytes) {
        Ok(s) => serde_json::Value::String(s),
        Err(e) => serde_json::Value::Array(
            e.into_bytes()
                .into_iter()
                .map(serde_json::Value::from)
                .collect(),
        ),
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry mapping content types to decoders.
///
/// Lookups take a shared read lock and release it before decoding, so
/// concurrent decodes never block each other. Registration takes the write
/// lock briefly and may happen at any time, though it is expected at start-up.
///
/// # Examples
///
/// ```
/// use lmq_client::decode::{DecoderRegistry, Destination, Payload};
/// use lmq_client::error::DecodeError;
///
/// let registry = DecoderRegistry::with_builtins();
/// registry.register_fn("application/x-upper", |body: &[u8], dest: Destination<'_>| {
///     match dest {
///         Destination::Payload(slot) => {
///             *slot = Payload::Text(String::from_utf8_lossy(body).to_uppercase());
///             Ok(())
///         }
///         _ => Err(DecodeError::custom("payload only")),
///     }
/// });
///
/// let mut payload = Payload::default();
/// registry
///     .decode("application/x-upper", b"hi", Destination::Payload(&mut payload))
///     .unwrap();
/// assert_eq!(payload.as_text(), Some("HI"));
/// ```
pub struct DecoderRegistry {
    decoders: RwLock<HashMap<String, Arc<dyn Decoder>>>,
}

impl DecoderRegistry {
    /// Create a registry with no entries. Every body is handled by [`RawDecoder`].
    pub fn new() -> Self {
        Self {
            decoders: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with the MessagePack, JSON and plain text decoders
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(CONTENT_TYPE_MSGPACK, Arc::new(MessagePackDecoder));
        registry.register(CONTENT_TYPE_JSON, Arc::new(JsonDecoder));
        registry.register(CONTENT_TYPE_TEXT, Arc::new(TextDecoder));
        registry
    }

    /// Install or replace the decoder for an exact content type
    pub fn register(&self, content_type: impl Into<String>, decoder: Arc<dyn Decoder>) {
        let content_type = content_type.into();
        debug!(content_type = %content_type, "Registering decoder");
        self.decoders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(content_type, decoder);
    }

    /// Install or replace the decoder for an exact content type using a closure
    pub fn register_fn<F>(&self, content_type: impl Into<String>, decoder: F)
    where
        F: for<'a, 'b> Fn(&'a [u8], Destination<'b>) -> Result<(), DecodeError>
            + Send
            + Sync
            + 'static,
    {
        self.register(content_type, Arc::new(FnDecoder(decoder)));
    }

    /// Look up the decoder registered for a content type
    pub fn get(&self, content_type: &str) -> Option<Arc<dyn Decoder>> {
        self.decoders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(content_type)
            .cloned()
    }

    /// Check whether a decoder is registered for a content type
    pub fn contains(&self, content_type: &str) -> bool {
        self.decoders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(content_type)
    }

    /// Decode `body` with the decoder registered for `content_type`, falling
    /// back to [`RawDecoder`]
    pub fn decode(
        &self,
        content_type: &str,
        body: &[u8],
        destination: Destination<'_>,
    ) -> Result<(), DecodeError> {
        match self.get(content_type) {
            Some(decoder) => decoder.decode(body, destination),
            None => {
                debug!(content_type = %content_type, "No decoder registered, using raw decoder");
                RawDecoder.decode(body, destination)
            }
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decoders = self.decoders.read().unwrap_or_else(PoisonError::into_inner);
        let mut content_types: Vec<&String> = decoders.keys().collect();
        content_types.sort();
        f.debug_struct("DecoderRegistry")
            .field("content_types", &content_types)
            .finish()
    }
}
