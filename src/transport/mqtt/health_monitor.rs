//! Pure health monitoring and reconnection logic for the MQTT client
//!
//! Decides whether the event loop keeps retrying and which state follows a
//! connection event. Nothing in here performs I/O.

use super::connection::{ConnectionState, ReconnectConfig};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine if reconnection should be attempted
    /// Retries forever when `max_attempts` is None
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let Some(max_attempts) = config.max_attempts {
            if current_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after a connection event
    pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::Refused(code) => ConnectionState::Refused(code),
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
            ConnectionEvent::Stopped(reason) => ConnectionState::Closed(reason),
        }
    }

    /// Check if connection state allows a confirmed publish to be attempted
    ///
    /// Transient disconnects still queue the message; the ack wait bounds it.
    pub fn can_publish(state: &ConnectionState) -> bool {
        !matches!(state, ConnectionState::Refused(_) | ConnectionState::Closed(_))
    }

    /// Validate reconnection configuration
    pub fn validate_connection_config(config: &ReconnectConfig) -> Result<(), String> {
        if let Some(max_attempts) = config.max_attempts {
            if max_attempts == 0 {
                return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
            }
        }

        if config.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }

        if config.refused_initial_delay == 0 || config.refused_max_delay < config.refused_initial_delay {
            return Err("refused delays must be non-zero and ordered".to_string());
        }

        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnAckReceived,
    /// CONNACK carried a non-zero return code
    Refused(u8),
    DisconnectedByBroker,
    NetworkError(String),
    /// Event loop ended, either on request or after giving up
    Stopped(String),
}
