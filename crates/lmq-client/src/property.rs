//! Queue properties and the default property table.
//!
//! A [`Property`] is sparse: each of its three settings is either specified
//! or left to the service default. On the wire an unspecified setting is an
//! absent key. Durations travel as fractional seconds.
//!
//! ```text
//! {"accum": 0.5, "retry": 2, "timeout": 30.0}   fully resolved (server response)
//! {"retry": 2}                                  partial update (client request)
//! ```
//!
//! A [`DefaultProperty`] pairs a queue name pattern with a property and is
//! encoded as a two element array `[pattern, property]`. The server consults
//! the default table in order, so list order is preserved in both directions.

use crate::error::PropertyError;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::{self, SerializeMap, SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(test)]
#[path = "property_tests.rs"]
mod tests;

const ACCUM_KEY: &str = "accum";
const RETRY_KEY: &str = "retry";
const TIMEOUT_KEY: &str = "timeout";

/// Sparse set of queue settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Property {
    /// Accumulation window
    pub accum: Option<Duration>,
    /// Retry count
    pub retry: Option<u32>,
    /// Response timeout
    pub timeout: Option<Duration>,
}

impl Property {
    /// Create a property with every setting left to the service default
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accumulation window
    pub fn with_accum(mut self, accum: Duration) -> Self {
        self.accum = Some(accum);
        self
    }

    /// Set the retry count
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the response timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check whether no setting is specified
    pub fn is_empty(&self) -> bool {
        self.accum.is_none() && self.retry.is_none() && self.timeout.is_none()
    }

    /// Encode to the JSON wire form
    pub fn to_json(&self) -> Result<Vec<u8>, PropertyError> {
        serde_json::to_vec(self).map_err(PropertyError::Encode)
    }

    /// Decode from the JSON wire form. Absent keys stay unset.
    ///
    /// A present key with a non-numeric value is a [`PropertyError::Parse`]
    /// rather than being skipped and left unset.
    pub fn from_json(bytes: &[u8]) -> Result<Self, PropertyError> {
        serde_json::from_slice(bytes).map_err(PropertyError::Parse)
    }
}

impl Serialize for Property {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let len = [self.accum.is_some(), self.retry.is_some(), self.timeout.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(accum) = self.accum {
            map.serialize_entry(ACCUM_KEY, &accum.as_secs_f64())?;
        }
        if let Some(retry) = self.retry {
            map.serialize_entry(RETRY_KEY, &retry)?;
        }
        if let Some(timeout) = self.timeout {
            map.serialize_entry(TIMEOUT_KEY, &timeout.as_secs_f64())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Property {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let fields = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut property = Property::new();

        if let Some(secs) = number_field(&fields, ACCUM_KEY).map_err(de::Error::custom)? {
            property.accum = duration_from_secs(ACCUM_KEY, secs).map_err(de::Error::custom)?;
        }
        if let Some(count) = number_field(&fields, RETRY_KEY).map_err(de::Error::custom)? {
            property.retry = retry_from_number(count).map_err(de::Error::custom)?;
        }
        if let Some(secs) = number_field(&fields, TIMEOUT_KEY).map_err(de::Error::custom)? {
            property.timeout = duration_from_secs(TIMEOUT_KEY, secs).map_err(de::Error::custom)?;
        }

        Ok(property)
    }
}

/// Read a numeric field. Absent and `null` both mean unset.
fn number_field(
    fields: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<f64>, String> {
    match fields.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{} must be a number, found {}", key, value)),
    }
}

/// Negative values are the legacy "unset" marker
fn duration_from_secs(key: &str, secs: f64) -> Result<Option<Duration>, String> {
    if secs < 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|e| format!("{} is not a valid duration: {}", key, e))
}

fn retry_from_number(count: f64) -> Result<Option<u32>, String> {
    if count < 0.0 {
        return Ok(None);
    }
    if count > f64::from(u32::MAX) {
        return Err(format!("{} is out of range: {}", RETRY_KEY, count));
    }
    Ok(Some(count.trunc() as u32))
}

/// Queue name pattern paired with the settings applied to matching queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultProperty {
    /// Regular expression matched against queue names
    pub pattern: String,
    pub property: Property,
}

impl DefaultProperty {
    pub fn new(pattern: impl Into<String>, property: Property) -> Self {
        Self {
            pattern: pattern.into(),
            property,
        }
    }

    /// Check that the pattern is a valid regular expression
    pub fn validate(&self) -> Result<(), PropertyError> {
        Regex::new(&self.pattern)?;
        Ok(())
    }

    /// Encode to the JSON wire form, rejecting an invalid pattern
    pub fn to_json(&self) -> Result<Vec<u8>, PropertyError> {
        self.validate()?;
        serde_json::to_vec(self).map_err(PropertyError::Encode)
    }

    /// Decode from the JSON wire form
    pub fn from_json(bytes: &[u8]) -> Result<Self, PropertyError> {
        serde_json::from_slice(bytes).map_err(PropertyError::Parse)
    }
}

impl Serialize for DefaultProperty {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Regex::new(&self.pattern).map_err(ser::Error::custom)?;
        let mut pair = serializer.serialize_tuple(2)?;
        pair.serialize_element(&self.pattern)?;
        pair.serialize_element(&self.property)?;
        pair.end()
    }
}

impl<'de> Deserialize<'de> for DefaultProperty {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (pattern, property) = <(String, Property)>::deserialize(deserializer)?;
        Ok(Self { pattern, property })
    }
}

/// Encode a default property table, validating every pattern first
pub fn encode_default_properties(defaults: &[DefaultProperty]) -> Result<Vec<u8>, PropertyError> {
    for default in defaults {
        default.validate()?;
    }
    serde_json::to_vec(defaults).map_err(PropertyError::Encode)
}

/// Decode a default property table, preserving its order
pub fn decode_default_properties(bytes: &[u8]) -> Result<Vec<DefaultProperty>, PropertyError> {
    serde_json::from_slice(bytes).map_err(PropertyError::Parse)
}
