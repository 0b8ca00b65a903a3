//! Test publisher: send one notification and wait for the broker to confirm it

use crate::isolog;
use crate::notification::{
    NotificationPayload, DEFAULT_APP_ICON, DEFAULT_APP_NAME, DEFAULT_TIMEOUT_SECS,
};
use crate::observability::{Level, Logger};
use crate::transport::mqtt::MqttError;
use crate::transport::Transport;

/// Control field stripped from the payload before it is sent
pub const SHOW_FIELD: &str = "show";

pub const DEFAULT_TEST_TITLE: &str = "MQTTNotifier Test";
pub const DEFAULT_TEST_MESSAGE: &str = "Hello World!";

/// Content of a test notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    /// Echo the payload to the log before sending
    pub show: bool,
    pub title: String,
    pub message: String,
    pub timeout: u32,
    pub app_name: String,
    pub app_icon: String,
}

impl Default for TestMessage {
    fn default() -> Self {
        Self {
            show: false,
            title: DEFAULT_TEST_TITLE.to_string(),
            message: DEFAULT_TEST_MESSAGE.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS as u32,
            app_name: DEFAULT_APP_NAME.to_string(),
            app_icon: DEFAULT_APP_ICON.to_string(),
        }
    }
}

impl TestMessage {
    /// Field mapping including the `show` control flag
    pub fn to_fields(&self) -> NotificationPayload {
        let mut fields = NotificationPayload::new();
        fields.insert("message", self.message.as_str());
        fields.insert(SHOW_FIELD, self.show);
        fields.insert("title", self.title.as_str());
        fields.insert("timeout", self.timeout);
        fields.insert("app_name", self.app_name.as_str());
        fields.insert("app_icon", self.app_icon.as_str());
        fields
    }
}

/// Publish `fields` to `topic` and wait for the broker's acknowledgement
///
/// A `show` field, if present, is removed and ORed with `show`. Returns the
/// JSON text that was sent.
pub async fn publish_test<T: Transport + ?Sized>(
    client: &T,
    topic: &str,
    mut fields: NotificationPayload,
    show: bool,
    log: &Logger,
) -> Result<String, MqttError> {
    let message = fields
        .get("message")
        .map(ToString::to_string)
        .unwrap_or_default();
    isolog!(log, lvl = Level::Verbose; format!("Publishing test message to {topic}: {message}"));

    let show = fields.take_flag(SHOW_FIELD).unwrap_or(false) || show;
    let payload = fields.to_json().map_err(MqttError::SerializationError)?;
    if show {
        isolog!(log, lvl = Level::Hilight; payload.as_str());
    }

    client
        .publish_and_wait(topic, payload.clone().into_bytes())
        .await?;
    isolog!(log; "Delivered");
    Ok(payload)
}
