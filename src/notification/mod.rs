//! Notification payloads and the sinks that display them
//!
//! A payload is an open set of named fields. The notifier never enumerates
//! required fields; each [`NotificationSink`] decides which names it
//! understands.
//!
//! ```rust
//! use mqtt_notifier::notification::{FieldValue, NotificationPayload};
//!
//! let payload = NotificationPayload::decode(br#"{"title": "Broker", "timeout": 30}"#).unwrap();
//! assert_eq!(payload.get("title"), Some(&FieldValue::Text("Broker".to_string())));
//! assert_eq!(payload.get("timeout"), Some(&FieldValue::Integer(30)));
//! ```

pub mod desktop;

pub use desktop::DesktopNotifier;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_TITLE: &str = "MQTT Notification";
pub const DEFAULT_APP_NAME: &str = "MQTTNotifier";
pub const DEFAULT_APP_ICON: &str = "dialog-information";
pub const DEFAULT_TIMEOUT_SECS: i64 = 15;

/// Errors raised while decoding or displaying a notification
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("Payload is not a JSON object: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Failed to display notification: {0}")]
    Display(String),
}

/// Value of a single notification field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Integer(i64),
    Text(String),
    /// Anything else (floats, nulls, nested values) is carried through as-is
    Other(Value),
}

impl FieldValue {
    /// Interpret the value as a whole number of seconds
    pub fn as_seconds(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(seconds) => Some(*seconds),
            FieldValue::Text(text) => text.trim().parse().ok(),
            FieldValue::Other(Value::Number(number)) => number.as_f64().map(|s| s.round() as i64),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Flag(flag) => write!(f, "{flag}"),
            FieldValue::Integer(number) => write!(f, "{number}"),
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Other(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(flag: bool) -> Self {
        FieldValue::Flag(flag)
    }
}

impl From<i64> for FieldValue {
    fn from(number: i64) -> Self {
        FieldValue::Integer(number)
    }
}

impl From<u32> for FieldValue {
    fn from(number: u32) -> Self {
        FieldValue::Integer(i64::from(number))
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

/// Ordered mapping of field name to value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationPayload {
    fields: BTreeMap<String, FieldValue>,
}

impl NotificationPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode raw message bytes: UTF-8 text holding a JSON object
    pub fn decode(payload: &[u8]) -> Result<Self, NotificationError> {
        let text = std::str::from_utf8(payload)?;
        Ok(serde_json::from_str(text)?)
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Remove a control flag; only a literal `true` counts as set
    pub fn take_flag(&mut self, name: &str) -> Option<bool> {
        self.remove(name)
            .map(|value| matches!(value, FieldValue::Flag(true)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), field_to_value(value)))
                .collect(),
        )
    }
}

fn field_to_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Flag(flag) => Value::Bool(*flag),
        FieldValue::Integer(number) => Value::from(*number),
        FieldValue::Text(text) => Value::String(text.clone()),
        FieldValue::Other(other) => other.clone(),
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for NotificationPayload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Something that can show a notification
///
/// Called from the network event loop, so implementations must return
/// quickly.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, payload: &NotificationPayload) -> Result<(), NotificationError>;
}
