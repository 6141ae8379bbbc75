//! # LMQ Client
//!
//! Client library for the LMQ HTTP message queue.
//!
//! The crate is organised around two concerns:
//!
//! - **Decoding**: a [`DecoderRegistry`] maps content types to [`Decoder`]s, and
//!   a pulled [`Message`] decodes its body (or each part of a compound body)
//!   through that registry.
//! - **Properties**: [`Property`] and [`DefaultProperty`] describe per-queue
//!   settings and the pattern based default table.
//!
//! [`HttpClient`] ties both to the queue service's REST API.
//!
//! ```no_run
//! use lmq_client::{ClientConfig, HttpClient, LmqClient, Property, ReplyType};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(ClientConfig::default())?;
//! client
//!     .update_property("jobs", &Property::new().with_retry(3))
//!     .await?;
//!
//! while let Some(mut message) = client.pull("jobs", Some(Duration::from_secs(30))).await? {
//!     let payload = message.decode_payload()?;
//!     println!("{}: {}", message.id(), payload);
//!     client.reply(&message, ReplyType::Ack).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod message;
pub mod property;

pub use client::{HttpClient, LmqClient, PushResponse, ReplyType};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use decode::{
    Decoder, DecoderRegistry, Destination, JsonDecoder, MessagePackDecoder, Payload, RawDecoder,
    TextDecoder, Typed, TypedSlot,
};
pub use error::{ClientError, DecodeError, MessageError, PropertyError};
pub use message::{Delivery, Message, MessageType};
pub use property::{DefaultProperty, Property};
