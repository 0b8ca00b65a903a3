//! MQTT client implementation for the notifier
//!
//! Pure functions are kept apart from I/O so they can be tested without a
//! broker.
//!
//! # Architecture
//!
//! - [`connection`] - Connection configuration, state and errors
//! - [`message_handler`] - Event routing and topic filter matching
//! - [`health_monitor`] - Reconnection decisions and state transitions
//! - [`client`] - The event loop task and the public client
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_notifier::observability::logger;
//! use mqtt_notifier::transport::mqtt::{process_client_id, ConnectionConfig, MqttClient};
//!
//! # tokio_test::block_on(async {
//! let config = ConnectionConfig::new("127.0.0.1", 1883, process_client_id());
//! let mut client = MqttClient::connect(config, logger())?;
//! client.publish_and_wait("mqttnotifier/notifications", br#"{"message": "hi"}"#.to_vec()).await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::{Delivery, DeliveryTracker, MqttClient};
pub use connection::{
    generate_client_id, process_client_id, ConnectionConfig, ConnectionState, MqttError,
    ReconnectConfig,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{topic_matches, EventRoute, EventRouter};
