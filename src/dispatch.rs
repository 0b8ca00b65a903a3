//! Subscription dispatcher: decode inbound messages and hand them to a sink
//!
//! Decode failures are logged and dropped; the handler stays registered and
//! keeps processing later messages.

use crate::isolog;
use crate::notification::{NotificationPayload, NotificationSink};
use crate::observability::{EmitOptions, Level, Logger};
use crate::transport::mqtt::MqttError;
use crate::transport::{MessageHandler, SubscribeOutcome, Transport};
use std::sync::Arc;

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Payload was not a UTF-8 JSON object
    Dropped,
    /// Decoded fine but the sink failed
    SinkFailed,
}

/// Message handler forwarding decoded payloads to a [`NotificationSink`]
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    log: Arc<Logger>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, log: Arc<Logger>) -> Self {
        Self { sink, log }
    }

    pub fn handle(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        isolog!(self.log; "Received notification");

        let fields = match NotificationPayload::decode(payload) {
            Ok(fields) => fields,
            Err(error) => {
                isolog!(
                    self.log,
                    lvl = Level::Error,
                    opts = EmitOptions::new().exception(&error);
                    "Error decoding json, offending message:",
                    String::from_utf8_lossy(payload).into_owned()
                );
                return DispatchOutcome::Dropped;
            }
        };

        isolog!(
            self.log,
            lvl = Level::Debug,
            opts = EmitOptions::new().pretty();
            "Received",
            fields.to_value(),
            "from",
            topic,
            "topic"
        );

        match self.sink.notify(&fields) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(error) => {
                isolog!(self.log, lvl = Level::Error, opts = EmitOptions::new().exception(&error); "Failed to display notification");
                DispatchOutcome::SinkFailed
            }
        }
    }
}

impl MessageHandler for NotificationDispatcher {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.handle(topic, payload);
    }
}

/// Route notifications arriving on `topic` to `sink`
///
/// Subscribing again to the same topic replaces the previous sink instead
/// of adding a second one.
pub async fn subscribe<T: Transport + ?Sized>(
    client: &T,
    topic: &str,
    sink: Arc<dyn NotificationSink>,
    log: Arc<Logger>,
) -> Result<SubscribeOutcome, MqttError> {
    let dispatcher = Arc::new(NotificationDispatcher::new(sink, log.clone()));
    let outcome = client.subscribe(topic, dispatcher).await?;

    match outcome {
        SubscribeOutcome::Subscribed => {
            isolog!(log, lvl = Level::Debug; "Subscribed to", topic);
        }
        SubscribeOutcome::AlreadySubscribed => {
            isolog!(log, lvl = Level::Debug; "Already subscribed to", topic, "- handler replaced");
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::FieldValue;
    use crate::testing::mocks::{CaptureWriter, RecordingSink};

    fn dispatcher() -> (NotificationDispatcher, Arc<RecordingSink>, CaptureWriter) {
        let capture = CaptureWriter::new();
        let log = Arc::new(Logger::with_writer(capture.clone()));
        log.configure("DISPATCH", false, Level::Debug.value(), Level::Debug.value());
        let sink = Arc::new(RecordingSink::new());
        (NotificationDispatcher::new(sink.clone(), log), sink, capture)
    }

    #[test]
    fn test_well_formed_message_is_forwarded() {
        let (dispatcher, sink, capture) = dispatcher();

        let outcome = dispatcher.handle("alerts", br#"{"title": "Door", "timeout": 5}"#);

        assert_eq!(outcome, DispatchOutcome::Delivered);
        let received = sink.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].get("title"), Some(&FieldValue::from("Door")));
        assert_eq!(received[0].get("timeout"), Some(&FieldValue::Integer(5)));
        assert!(capture.contents().contains("from alerts topic"));
    }

    #[test]
    fn test_malformed_message_is_dropped_with_one_error() {
        let (dispatcher, sink, capture) = dispatcher();

        let outcome = dispatcher.handle("alerts", br#"{"title": "Do"#);

        assert_eq!(outcome, DispatchOutcome::Dropped);
        assert!(sink.received().is_empty());
        let errors: Vec<String> = capture
            .lines()
            .into_iter()
            .filter(|line| line.contains(":ERROR:"))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains(r#"{"title": "Do"#));
    }

    #[test]
    fn test_sink_failure_is_logged() {
        let (dispatcher, sink, capture) = dispatcher();
        sink.set_should_fail(true);

        let outcome = dispatcher.handle("alerts", br#"{"message": "x"}"#);

        assert_eq!(outcome, DispatchOutcome::SinkFailed);
        assert!(capture.contents().contains("Failed to display notification"));
    }
}
