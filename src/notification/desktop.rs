//! Desktop notification sink backed by notify-rust

use super::{
    FieldValue, NotificationError, NotificationPayload, NotificationSink, DEFAULT_APP_ICON,
    DEFAULT_APP_NAME, DEFAULT_TIMEOUT_SECS, DEFAULT_TITLE,
};
use crate::isolog;
use crate::observability::{Level, Logger};
use notify_rust::{Notification, Timeout};
use std::sync::Arc;

/// Puts a built notification on screen
type Presenter = fn(&Notification) -> Result<(), String>;

fn show_on_desktop(notification: &Notification) -> Result<(), String> {
    notification
        .show()
        .map(|_| ())
        .map_err(|error| error.to_string())
}

/// Shows payloads as native desktop notifications
///
/// Recognised fields: `title`, `message`, `timeout` (seconds), `app_name`
/// and `app_icon`. Anything else is logged and ignored.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    log: Arc<Logger>,
    present: Presenter,
}

impl DesktopNotifier {
    pub fn new(log: Arc<Logger>) -> Self {
        Self {
            log,
            present: show_on_desktop,
        }
    }

    /// Translate a payload into a notify-rust notification without showing it
    pub fn build(&self, payload: &NotificationPayload) -> Notification {
        let mut notification = Notification::new();
        notification
            .summary(DEFAULT_TITLE)
            .body("")
            .appname(DEFAULT_APP_NAME)
            .icon(DEFAULT_APP_ICON)
            .timeout(timeout_from_secs(DEFAULT_TIMEOUT_SECS).unwrap_or(Timeout::Default));

        for (name, value) in payload.iter() {
            match name.as_str() {
                "title" => {
                    notification.summary(&value.to_string());
                }
                "message" => {
                    notification.body(&value.to_string());
                }
                "app_name" => {
                    notification.appname(&value.to_string());
                }
                "app_icon" => {
                    notification.icon(&value.to_string());
                }
                "timeout" => match value.as_seconds().and_then(timeout_from_secs) {
                    Some(timeout) => {
                        notification.timeout(timeout);
                    }
                    None => {
                        isolog!(self.log, lvl = Level::Warn; "Ignoring invalid notification timeout:", value);
                    }
                },
                other => {
                    isolog!(self.log, lvl = Level::Debug; "Ignoring unsupported notification field", other);
                }
            }
        }

        notification
    }
}

fn timeout_from_secs(seconds: i64) -> Option<Timeout> {
    if seconds <= 0 {
        return None;
    }
    let millis = u32::try_from(seconds.checked_mul(1000)?).ok()?;
    Some(Timeout::Milliseconds(millis))
}

impl NotificationSink for DesktopNotifier {
    /// Inside a tokio runtime the D-Bus round trip runs on the blocking pool
    /// and failures are logged from there; otherwise it runs inline.
    fn notify(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        let notification = self.build(payload);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return (self.present)(&notification).map_err(NotificationError::Display);
        };

        let present = self.present;
        let log = self.log.clone();
        runtime.spawn_blocking(move || {
            if let Err(error) = present(&notification) {
                isolog!(log, lvl = Level::Error; "Failed to display notification:", error);
            }
        });
        Ok(())
    }
}
