//! MQTT Notifier
//!
//! Displays desktop notifications received as JSON objects over MQTT, and
//! publishes test notifications to the same topic.
//!
//! # Overview
//!
//! - Console logging with a fixed prefix, thresholds and a `tracing` bridge
//! - MQTT session management with reconnection and confirmed publishes
//! - Credential resolution from arguments, prompt and environment
//! - Dispatch of inbound payloads to a notification sink
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_notifier::notification::{FieldValue, NotificationPayload};
//! use mqtt_notifier::publisher::TestMessage;
//!
//! let fields = TestMessage::default().to_fields();
//! assert_eq!(fields.get("title"), Some(&FieldValue::from("MQTTNotifier Test")));
//!
//! let inbound = NotificationPayload::decode(br#"{"message": "Door open"}"#).unwrap();
//! assert_eq!(inbound.len(), 1);
//! ```

pub mod commands;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod notification;
pub mod observability;
pub mod publisher;
pub mod testing;
pub mod transport;

pub use config::{NotifierConfig, Settings};
pub use error::{NotifierError, NotifierResult};
pub use notification::{DesktopNotifier, FieldValue, NotificationPayload, NotificationSink};
pub use observability::{logger, EmitOptions, Level, Logger};
pub use transport::mqtt::MqttClient;
pub use transport::Transport;
