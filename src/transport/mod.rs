//! Transport layer between the notifier and the message broker
//!
//! [`Transport`] abstracts the broker session so dispatch and the commands
//! can be exercised against [`MockTransport`](crate::testing::mocks::MockTransport).
//! Inbound messages are handed to a [`MessageHandler`] registered per topic
//! filter.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

pub mod mqtt;

use mqtt::{topic_matches, ConnectionState, MqttError};

/// Receives messages delivered on a subscribed topic filter
///
/// Runs on the network event loop; keep it short.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Result of a subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// First registration; a SUBSCRIBE was issued
    Subscribed,
    /// Filter was already registered; its handler was replaced
    AlreadySubscribed,
}

/// Topic filter to handler table shared with the event loop
///
/// One handler per filter, so subscribing twice never doubles delivery.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn MessageHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, filter: &str, handler: Arc<dyn MessageHandler>) -> SubscribeOutcome {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match handlers.insert(filter.to_string(), handler) {
            Some(_) => SubscribeOutcome::AlreadySubscribed,
            None => SubscribeOutcome::Subscribed,
        }
    }

    pub fn unregister(&self, filter: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(filter)
            .is_some()
    }

    pub fn filters(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Hand a message to every handler whose filter matches; returns how many ran
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        let matching: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, handler)| handler.clone())
            .collect();

        for handler in &matching {
            handler.on_message(topic, payload);
        }
        matching.len()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("filters", &self.filters())
            .finish()
    }
}

/// Broker session used by the notifier
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Register `handler` for `topic`, subscribing on first registration
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscribeOutcome, MqttError>;

    /// Publish with QoS 1 and wait until the broker confirms delivery
    async fn publish_and_wait(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError>;

    /// Resolves once the session ends without being asked to; yields why
    async fn closed(&self) -> MqttError;

    /// Send DISCONNECT and stop the event loop
    async fn disconnect(&mut self) -> Result<(), MqttError>;

    fn connection_state(&self) -> ConnectionState;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
