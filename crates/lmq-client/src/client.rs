//! HTTP client for the queue service.
//!
//! [`HttpClient`] maps each queue operation onto the service's REST surface
//! and turns pulled responses into [`Message`] values that decode with the
//! client's [`DecoderRegistry`].
//!
//! Queue names are sent as a single percent-encoded path segment, so a name
//! such as `jobs/high` becomes `/messages/jobs%2Fhigh`. Patterns used by
//! [`push_all`](LmqClient::push_all) and [`pull_any`](LmqClient::pull_any)
//! are validated locally before any request is made.

use crate::config::ClientConfig;
use crate::decode::{DecoderRegistry, CONTENT_TYPE_JSON};
use crate::error::ClientError;
use crate::message::{Delivery, Message, MessageType};
use crate::property::{
    decode_default_properties, encode_default_properties, DefaultProperty, Property,
};
use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

pub const HEADER_MESSAGE_ID: &str = "X-Lmq-Message-Id";
pub const HEADER_QUEUE_NAME: &str = "X-Lmq-Queue-Name";
pub const HEADER_MESSAGE_TYPE: &str = "X-Lmq-Message-Type";
pub const HEADER_RETRY_REMAINING: &str = "X-Lmq-Retry-Remaining";

/// Body format requested for compound deliveries
const COMPOUND_FORMAT: &str = "msgpack";

/// How a consumer settles a pulled message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyType {
    /// Processing succeeded, remove the message
    Ack,
    /// Processing failed, make the message available again
    Nack,
    /// Processing continues, extend the response timeout
    Ext,
}

impl ReplyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nack => "nack",
            Self::Ext => "ext",
        }
    }
}

impl fmt::Display for ReplyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of pushing a message to one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Accumulation state reported by the server, e.g. `"no"`
    pub accum: String,
}

/// Queue service operations
#[async_trait]
pub trait LmqClient: Send + Sync {
    /// Push a message to a single queue
    async fn push(
        &self,
        queue: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<PushResponse, ClientError>;

    /// Push a message to every queue whose name matches `pattern`
    async fn push_all(
        &self,
        pattern: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<HashMap<String, PushResponse>, ClientError>;

    /// Pull a message from a queue, waiting up to `timeout` for one to arrive.
    /// Returns `None` when the queue stayed empty.
    async fn pull(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, ClientError>;

    /// Pull a message from any queue whose name matches `pattern`
    async fn pull_any(
        &self,
        pattern: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, ClientError>;

    /// Settle a pulled message
    async fn reply(&self, message: &Message, reply: ReplyType) -> Result<(), ClientError> {
        self.reply_to(message.queue(), message.id(), reply).await
    }

    /// Settle a message by queue name and identifier
    async fn reply_to(&self, queue: &str, id: &str, reply: ReplyType) -> Result<(), ClientError>;

    /// Delete a queue and its messages
    async fn delete_queue(&self, queue: &str) -> Result<(), ClientError>;

    /// Get the resolved settings of a queue
    async fn get_property(&self, queue: &str) -> Result<Property, ClientError>;

    /// Update the settings of a queue. Unset fields are left unchanged.
    async fn update_property(&self, queue: &str, property: &Property) -> Result<(), ClientError>;

    /// Reset the settings of a queue to the defaults
    async fn delete_property(&self, queue: &str) -> Result<(), ClientError>;

    /// Get the default property table, in precedence order
    async fn get_default_properties(&self) -> Result<Vec<DefaultProperty>, ClientError>;

    /// Replace the default property table
    async fn set_default_properties(&self, defaults: &[DefaultProperty])
        -> Result<(), ClientError>;

    /// Remove the default property table
    async fn delete_default_properties(&self) -> Result<(), ClientError>;
}

/// HTTP implementation of [`LmqClient`].
///
/// # Examples
///
/// ```no_run
/// # use lmq_client::{ClientConfig, HttpClient, LmqClient, ReplyType};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new(ClientConfig::default().with_base_url("http://localhost:9980"))?;
/// client.push("jobs", "application/json", r#"{"id":1}"#.into()).await?;
///
/// if let Some(mut message) = client.pull("jobs", Some(std::time::Duration::from_secs(5))).await? {
///     let job: serde_json::Value = message.decode()?;
///     println!("{}", job);
///     client.reply(&message, ReplyType::Ack).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpClient {
    http_client: reqwest::Client,
    config: ClientConfig,
    registry: Arc<DecoderRegistry>,
}

impl HttpClient {
    /// Create a client whose messages decode with the built-in decoders
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_registry(config, Arc::new(DecoderRegistry::with_builtins()))
    }

    /// Create a client whose messages decode with `registry`
    pub fn with_registry(
        config: ClientConfig,
        registry: Arc<DecoderRegistry>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http_client,
            config,
            registry,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Registry handed to every pulled message. Decoders registered here
    /// apply to messages pulled afterwards as well as to live ones.
    pub fn registry(&self) -> &Arc<DecoderRegistry> {
        &self.registry
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.trimmed_base_url(), path)
    }

    /// Send with the regular deadline and require `expected` status
    async fn send(
        &self,
        request: RequestBuilder,
        expected: StatusCode,
    ) -> Result<Response, ClientError> {
        let response = request.timeout(self.config.request_timeout).send().await?;
        check_status(response, expected).await
    }

    async fn push_to(
        &self,
        request: RequestBuilder,
        content_type: &str,
        body: Bytes,
    ) -> Result<Response, ClientError> {
        let request = request.header(CONTENT_TYPE, content_type).body(body);
        self.send(request, StatusCode::OK).await
    }

    async fn pull_from(
        &self,
        mut request: RequestBuilder,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, ClientError> {
        request = request.query(&[("cf", COMPOUND_FORMAT)]);
        if let Some(wait) = timeout {
            request = request.query(&[("t", wait.as_secs())]);
            // A wait too long to extend gets no client deadline at all
            if let Some(deadline) = wait.checked_add(self.config.request_timeout) {
                request = request.timeout(deadline);
            }
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::OK => {
                let delivery = delivery_from_response(response).await?;
                debug!(
                    queue = %delivery.queue,
                    message_id = %delivery.id,
                    message_type = %delivery.message_type,
                    "Pulled message"
                );
                Ok(Some(Message::new(delivery, Arc::clone(&self.registry))))
            }
            _ => Err(status_error(response).await),
        }
    }

    async fn put_property(
        &self,
        request: RequestBuilder,
        body: Vec<u8>,
    ) -> Result<(), ClientError> {
        let request = request
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(body);
        self.send(request, StatusCode::NO_CONTENT).await?;
        Ok(())
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

#[async_trait]
impl LmqClient for HttpClient {
    async fn push(
        &self,
        queue: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<PushResponse, ClientError> {
        debug!(queue = %queue, content_type = %content_type, size = body.len(), "Pushing message");
        let request = self
            .http_client
            .post(self.url(&format!("/messages/{}", encode_segment(queue))));
        let response = self.push_to(request, content_type, body).await?;
        read_json(response).await
    }

    async fn push_all(
        &self,
        pattern: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<HashMap<String, PushResponse>, ClientError> {
        Regex::new(pattern)?;
        debug!(pattern = %pattern, content_type = %content_type, "Pushing message to matching queues");
        let request = self
            .http_client
            .post(self.url("/messages"))
            .query(&[("qre", pattern)]);
        let response = self.push_to(request, content_type, body).await?;
        read_json(response).await
    }

    async fn pull(
        &self,
        queue: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, ClientError> {
        let request = self
            .http_client
            .get(self.url(&format!("/messages/{}", encode_segment(queue))));
        self.pull_from(request, timeout).await
    }

    async fn pull_any(
        &self,
        pattern: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, ClientError> {
        Regex::new(pattern)?;
        let request = self
            .http_client
            .get(self.url("/messages"))
            .query(&[("qre", pattern)]);
        self.pull_from(request, timeout).await
    }

    async fn reply_to(&self, queue: &str, id: &str, reply: ReplyType) -> Result<(), ClientError> {
        let url = self.url(&format!(
            "/messages/{}/{}",
            encode_segment(queue),
            encode_segment(id)
        ));
        debug!(queue = %queue, message_id = %id, reply = %reply, "Replying to message");
        let request = self.http_client.post(url).query(&[("reply", reply.as_str())]);
        self.send(request, StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), ClientError> {
        debug!(queue = %queue, "Deleting queue");
        let request = self
            .http_client
            .delete(self.url(&format!("/queues/{}", encode_segment(queue))));
        self.send(request, StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    async fn get_property(&self, queue: &str) -> Result<Property, ClientError> {
        let request = self
            .http_client
            .get(self.url(&format!("/properties/{}", encode_segment(queue))));
        let response = self.send(request, StatusCode::OK).await?;
        let body = response.bytes().await?;
        Ok(Property::from_json(&body)?)
    }

    async fn update_property(&self, queue: &str, property: &Property) -> Result<(), ClientError> {
        debug!(queue = %queue, property = ?property, "Updating queue property");
        let body = property.to_json()?;
        let request = self
            .http_client
            .patch(self.url(&format!("/properties/{}", encode_segment(queue))));
        self.put_property(request, body).await
    }

    async fn delete_property(&self, queue: &str) -> Result<(), ClientError> {
        let request = self
            .http_client
            .delete(self.url(&format!("/properties/{}", encode_segment(queue))));
        self.send(request, StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    async fn get_default_properties(&self) -> Result<Vec<DefaultProperty>, ClientError> {
        let request = self.http_client.get(self.url("/properties"));
        let response = self.send(request, StatusCode::OK).await?;
        let body = response.bytes().await?;
        Ok(decode_default_properties(&body)?)
    }

    async fn set_default_properties(
        &self,
        defaults: &[DefaultProperty],
    ) -> Result<(), ClientError> {
        debug!(count = defaults.len(), "Replacing default properties");
        let body = encode_default_properties(defaults)?;
        let request = self.http_client.put(self.url("/properties"));
        self.put_property(request, body).await
    }

    async fn delete_default_properties(&self) -> Result<(), ClientError> {
        let request = self.http_client.delete(self.url("/properties"));
        self.send(request, StatusCode::NO_CONTENT).await?;
        Ok(())
    }
}

/// Encode a queue name or message id as one path segment
fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

async fn check_status(response: Response, expected: StatusCode) -> Result<Response, ClientError> {
    if response.status() == expected {
        Ok(response)
    } else {
        Err(status_error(response).await)
    }
}

async fn status_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error body".to_string());
    warn!(status, message = %message, "Queue service returned an error");
    ClientError::Status { status, message }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ClientError::InvalidResponse {
        message: format!("failed to parse response body: {}", e),
    })
}

async fn delivery_from_response(response: Response) -> Result<Delivery, ClientError> {
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    Ok(delivery_from_headers(&headers, body))
}

/// Map response headers and body to a delivery descriptor.
/// Missing headers become empty strings; a missing or unparsable retry count
/// becomes unknown.
pub(crate) fn delivery_from_headers(headers: &HeaderMap, body: Bytes) -> Delivery {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    Delivery {
        id: header(HEADER_MESSAGE_ID),
        queue: header(HEADER_QUEUE_NAME),
        message_type: MessageType::from(header(HEADER_MESSAGE_TYPE).as_str()),
        content_type: header(CONTENT_TYPE.as_str()),
        retry_remaining: header(HEADER_RETRY_REMAINING).parse().ok(),
        body,
    }
}
