//! Pure connection state management for the MQTT client
//!
//! Configuration, client identity, connection states and the error type
//! shared by the rest of the transport.

use once_cell::sync::Lazy;
use rand::Rng;
use rumqttc::MqttOptions;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
/// How long a confirmed publish waits for the broker's PUBACK
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

const CLIENT_ID_PREFIX: &str = "mqttnotifier";
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

static PROCESS_CLIENT_ID: Lazy<String> = Lazy::new(generate_client_id);

/// Build a fresh `mqttnotifier-<n>` identifier, `n` drawn from 0..=1000
pub fn generate_client_id() -> String {
    let suffix = rand::thread_rng().gen_range(0..=1000);
    format!("{CLIENT_ID_PREFIX}-{suffix}")
}

/// Identifier chosen once for the lifetime of the process
pub fn process_client_id() -> &'static str {
    PROCESS_CLIENT_ID.as_str()
}

/// Connection state for the MQTT client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Event loop started, no CONNACK seen yet
    Connecting,
    /// CONNACK accepted
    Connected,
    /// Broker answered with a non-zero return code
    Refused(u8),
    /// Lost or failed connection with reason; reconnection continues
    Disconnected(String),
    /// Event loop has ended and will not reconnect
    Closed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Refused(code) => write!(f, "refused (return code {code})"),
            ConnectionState::Disconnected(reason) => write!(f, "disconnected: {reason}"),
            ConnectionState::Closed(reason) => write!(f, "closed: {reason}"),
        }
    }
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
    /// First delay after the broker refuses the session, doubled per refusal
    pub refused_initial_delay: u64,
    /// Upper bound for the refusal backoff
    pub refused_max_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
            refused_initial_delay: 1_000,
            refused_max_delay: 120_000,
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay for given attempt using the pattern
    /// Pattern: 25ms, 50ms, 100ms, 250ms, then sustain at 250ms forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Delay before retrying after the `refusals`-th consecutive refused CONNACK
    /// Pattern: 1s, 2s, 4s, ... capped at 120s
    pub fn calculate_refused_delay(&self, refusals: u32) -> u64 {
        let doublings = refusals.saturating_sub(1).min(31);
        self.refused_initial_delay
            .saturating_mul(1u64 << doublings)
            .min(self.refused_max_delay)
    }
}

/// Everything needed to open a broker session
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Empty means anonymous
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub ack_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            username: String::new(),
            password: String::new(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    /// Credentials are only sent when a username is present
    pub fn uses_auth(&self) -> bool {
        !self.username.is_empty()
    }

    pub fn validate(&self) -> Result<(), MqttError> {
        if self.host.trim().is_empty() || self.host.chars().any(char::is_whitespace) {
            return Err(MqttError::InvalidBroker(format!("invalid hostname {:?}", self.host)));
        }
        if self.port == 0 {
            return Err(MqttError::InvalidBroker("port must be non-zero".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(MqttError::InvalidClientId("client id must not be empty".to_string()));
        }
        if self.keep_alive < MIN_KEEP_ALIVE {
            return Err(MqttError::InvalidBroker(format!(
                "keep alive must be at least {}s",
                MIN_KEEP_ALIVE.as_secs()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .field("keep_alive", &self.keep_alive)
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker configuration: {0}")]
    InvalidBroker(String),
    #[error("Invalid client id: {0}")]
    InvalidClientId(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("No delivery confirmation on {topic} within {}ms", timeout.as_millis())]
    DeliveryTimeout { topic: String, timeout: Duration },
    #[error("MQTT event loop closed: {0}")]
    EventLoopClosed(String),
}

/// Pure function to configure rumqttc options from a connection config
pub fn configure_mqtt_options(config: &ConnectionConfig) -> Result<MqttOptions, MqttError> {
    config.validate()?;

    let mut mqtt_options = MqttOptions::new(&config.client_id, &config.host, config.port);
    mqtt_options.set_keep_alive(config.keep_alive);
    mqtt_options.set_clean_session(true);

    if config.uses_auth() {
        mqtt_options.set_credentials(&config.username, &config.password);
    }

    Ok(mqtt_options)
}
