//! Mock implementations for testing
//!
//! Provides a mock [`Transport`], a recording [`NotificationSink`] and an
//! in-memory console writer so the notifier can be exercised without a
//! broker or a desktop session.

use crate::notification::{NotificationError, NotificationPayload, NotificationSink};
use crate::transport::mqtt::{ConnectionState, MqttError};
use crate::transport::{HandlerRegistry, MessageHandler, SubscribeOutcome, Transport};
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

pub type PublishedMessage = (String, Vec<u8>);

/// Mock transport for testing
///
/// Publishes are recorded and acknowledged immediately; [`deliver`](Self::deliver)
/// simulates an inbound message through the registered handlers.
#[derive(Debug)]
pub struct MockTransport {
    pub registry: HandlerRegistry,
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscribe_requests: Arc<Mutex<Vec<String>>>,
    pub disconnects: Arc<Mutex<u32>>,
    should_fail: Arc<Mutex<bool>>,
    closed_tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (closed_tx, _) = watch::channel(None);
        Self {
            registry: HandlerRegistry::new(),
            published_messages: Arc::new(Mutex::new(Vec::new())),
            subscribe_requests: Arc::new(Mutex::new(Vec::new())),
            disconnects: Arc::new(Mutex::new(0)),
            should_fail: Arc::new(Mutex::new(false)),
            closed_tx: Arc::new(closed_tx),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_should_fail(&self, should_fail: bool) {
        *self.should_fail.lock().await = should_fail;
    }

    /// End the simulated session; `closed()` resolves with `reason`
    pub fn close(&self, reason: &str) {
        self.closed_tx.send_replace(Some(reason.to_string()));
    }

    /// Handle ending the simulated session from another task
    pub fn closer(&self) -> Arc<watch::Sender<Option<String>>> {
        self.closed_tx.clone()
    }

    /// Simulate an inbound message; returns how many handlers ran
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        self.registry.dispatch(topic, payload)
    }

    pub async fn get_published(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Topics for which a SUBSCRIBE would have reached the broker
    pub async fn get_subscribe_requests(&self) -> Vec<String> {
        self.subscribe_requests.lock().await.clone()
    }

    pub async fn disconnect_count(&self) -> u32 {
        *self.disconnects.lock().await
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
        self.subscribe_requests.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscribeOutcome, MqttError> {
        if *self.should_fail.lock().await {
            return Err(MqttError::SubscriptionFailed("Mock subscribe failure".into()));
        }

        let outcome = self.registry.register(topic, handler);
        if outcome == SubscribeOutcome::Subscribed {
            self.subscribe_requests.lock().await.push(topic.to_string());
        }
        Ok(outcome)
    }

    async fn publish_and_wait(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        if *self.should_fail.lock().await {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }

        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(())
    }

    async fn closed(&self) -> MqttError {
        let mut closed_rx = self.closed_tx.subscribe();
        loop {
            let reason = closed_rx.borrow_and_update().clone();
            if let Some(reason) = reason {
                return MqttError::EventLoopClosed(reason);
            }
            if closed_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        *self.disconnects.lock().await += 1;
        self.closed_tx.send_replace(Some("client disconnected".to_string()));
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        match self.closed_tx.borrow().clone() {
            Some(reason) => ConnectionState::Closed(reason),
            None => ConnectionState::Connected,
        }
    }
}

/// Notification sink that remembers what it was given
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: std::sync::Mutex<Vec<NotificationPayload>>,
    should_fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<NotificationPayload> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Display(
                "Mock notification failure".to_string(),
            ));
        }
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(payload.clone());
        Ok(())
    }
}

/// Console writer capturing everything in memory
#[derive(Debug, Clone, Default)]
pub struct CaptureWriter {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buffer = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(String::from).collect()
    }

    pub fn clear(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
