//! Pure message routing logic for MQTT events
//!
//! Turns rumqttc events into routing decisions and matches topics against
//! subscription filters.

use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure routing decisions based on MQTT events
pub struct EventRouter;

impl EventRouter {
    /// Route MQTT event to appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    code: Self::return_code_value(&connack.code),
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::PubAck(puback) => EventRoute::PublishAcknowledged(puback.pkid),
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failed: Self::count_failed_subscriptions(&suback.return_codes),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent(*pkid),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Numeric CONNACK return code as defined by MQTT 3.1.1
    pub fn return_code_value(code: &ConnectReturnCode) -> u8 {
        match code {
            ConnectReturnCode::Success => 0,
            ConnectReturnCode::RefusedProtocolVersion => 1,
            ConnectReturnCode::BadClientId => 2,
            ConnectReturnCode::ServiceUnavailable => 3,
            ConnectReturnCode::BadUserNamePassword => 4,
            ConnectReturnCode::NotAuthorized => 5,
        }
    }

    fn count_failed_subscriptions(return_codes: &[SubscribeReasonCode]) -> usize {
        return_codes
            .iter()
            .filter(|code| matches!(code, SubscribeReasonCode::Failure))
            .count()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// CONNACK received; `code` 0 means accepted
    ConnectionAcknowledged { code: u8, session_present: bool },
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    /// Our PUBLISH left the client with this packet id
    PublishSent(u16),
    /// Broker confirmed a QoS 1 publish
    PublishAcknowledged(u16),
    /// Subscription confirmed; `failed` counts refused filters
    SubscriptionConfirmed { packet_id: u16, failed: usize },
    /// Broker sent DISCONNECT
    Disconnected,
    /// We sent DISCONNECT
    DisconnectSent,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Match a topic name against a subscription filter with `+` and `#`
/// wildcards
///
/// Topics starting with `$` are never matched by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
