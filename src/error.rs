//! Crate-level error type
//!
//! Module errors roll up here so the binary has a single type to report.

use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::notification::NotificationError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for notifier operations
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}

/// Result type for notifier operations
pub type NotifierResult<T> = Result<T, NotifierError>;
