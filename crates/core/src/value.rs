//! Type-erased values used for metadata, tool arguments and tool results.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A serializable value whose shape is only known to its producer and consumer.
///
/// The runtime never inspects these; it only moves them between hooks, models,
/// tools and storage. Callers encode a concrete type in and decode it back out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaqueValue(serde_json::Value);

impl OpaqueValue {
    /// The empty value
    pub fn null() -> Self {
        Self(serde_json::Value::Null)
    }

    /// Encode any serializable value
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Decode into a concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| Error::InvalidJsonResponse(e.to_string()))
    }

    /// Parse from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map(Self)
            .map_err(|e| Error::InvalidJsonResponse(e.to_string()))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for OpaqueValue {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<&str> for OpaqueValue {
    fn from(value: &str) -> Self {
        Self(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for OpaqueValue {
    fn from(value: String) -> Self {
        Self(serde_json::Value::String(value))
    }
}

/// Renders strings bare and everything else as compact JSON.
impl fmt::Display for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other),
        }
    }
}
