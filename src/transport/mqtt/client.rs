//! Impure I/O operations for the MQTT client
//!
//! The client owns a background task driving the rumqttc event loop. The
//! task publishes connection state over a `watch` channel and publish
//! confirmations over a `broadcast` channel; callers only ever talk to the
//! broker through the cloned `AsyncClient`.

use super::connection::{
    configure_mqtt_options, ConnectionConfig, ConnectionState, MqttError, ReconnectConfig,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, EventRouter};
use crate::isolog;
use crate::observability::{EmitOptions, Level, Logger};
use crate::transport::{HandlerRegistry, MessageHandler, SubscribeOutcome, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

const REQUEST_CAPACITY: usize = 10;
const DELIVERY_CAPACITY: usize = 64;
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Progress of an outgoing QoS 1 publish
///
/// `seq` numbers publishes in the order they were requested, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// PUBLISH written to the socket with this packet id
    Sent { seq: u64, pkid: u16 },
    /// PUBACK received for this packet id
    Acknowledged { seq: u64, pkid: u16 },
}

impl Delivery {
    /// Whether this event confirms the `seq`-th publish
    pub fn acknowledges(&self, seq: u64) -> bool {
        matches!(self, Delivery::Acknowledged { seq: acked, .. } if *acked == seq)
    }
}

/// Numbers outgoing publishes and pairs each PUBACK with its publish
///
/// Requests leave the client in order, so the n-th new PUBLISH on the wire
/// is the n-th request. Retransmissions after a reconnect reuse their packet
/// id and keep their number.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    sent: u64,
    in_flight: HashMap<u16, u64>,
}

impl DeliveryTracker {
    pub fn on_sent(&mut self, pkid: u16) -> Option<Delivery> {
        if self.in_flight.contains_key(&pkid) {
            return None;
        }
        self.sent += 1;
        self.in_flight.insert(pkid, self.sent);
        Some(Delivery::Sent {
            seq: self.sent,
            pkid,
        })
    }

    pub fn on_acknowledged(&mut self, pkid: u16) -> Option<Delivery> {
        self.in_flight
            .remove(&pkid)
            .map(|seq| Delivery::Acknowledged { seq, pkid })
    }
}

/// MQTT transport client
pub struct MqttClient {
    client: AsyncClient,
    config: ConnectionConfig,
    registry: HandlerRegistry,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    deliveries: broadcast::Sender<Delivery>,
    /// Number of publish requests handed to rumqttc so far
    publish_lock: Mutex<u64>,
    event_loop_handle: Option<JoinHandle<()>>,
    log: Arc<Logger>,
}

impl MqttClient {
    /// Start a session against the configured broker
    ///
    /// Returns as soon as the event loop is running; the CONNACK arrives
    /// asynchronously and is reflected in [`connection_state`](Self::connection_state).
    /// Must be called from within a tokio runtime.
    pub fn connect(config: ConnectionConfig, log: Arc<Logger>) -> Result<Self, MqttError> {
        Self::connect_with(config, ReconnectConfig::default(), log)
    }

    pub fn connect_with(
        config: ConnectionConfig,
        reconnect: ReconnectConfig,
        log: Arc<Logger>,
    ) -> Result<Self, MqttError> {
        HealthMonitor::validate_connection_config(&reconnect).map_err(MqttError::InvalidBroker)?;
        let mqtt_options = configure_mqtt_options(&config)?;
        if config.uses_auth() {
            isolog!(log, lvl = Level::Debug; "Authenticating as", config.username.as_str());
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (deliveries, _) = broadcast::channel(DELIVERY_CAPACITY);
        let registry = HandlerRegistry::new();

        let supervisor = EventLoopSupervisor {
            event_loop,
            client: client.clone(),
            registry: registry.clone(),
            state_tx,
            deliveries: deliveries.clone(),
            shutdown_rx,
            reconnect,
            log: log.clone(),
            reconnect_attempts: 0,
            has_connected: false,
            tracker: DeliveryTracker::default(),
            last_refusal: None,
            refusals: 0,
        };

        isolog!(
            log,
            lvl = Level::Debug;
            "Connecting to",
            format!("{}:{}", config.host, config.port),
            "as",
            config.client_id.as_str()
        );
        let handle = tokio::spawn(supervisor.run());

        Ok(Self {
            client,
            config,
            registry,
            state_rx,
            shutdown_tx,
            deliveries,
            publish_lock: Mutex::new(0),
            event_loop_handle: Some(handle),
            log,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Wait until the broker accepts the session or `timeout` elapses
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), MqttError> {
        let mut state_rx = self.state_rx.clone();
        let wait = async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Refused(_) | ConnectionState::Closed(_) => {
                        return Err(MqttError::NotConnected { state });
                    }
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::EventLoopClosed("state channel closed".to_string()));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(MqttError::NotConnected {
                state: self.connection_state(),
            }),
        }
    }

    pub async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscribeOutcome, MqttError> {
        let outcome = self.registry.register(topic, handler);
        if outcome == SubscribeOutcome::AlreadySubscribed {
            return Ok(outcome);
        }

        if let Err(e) = self.client.subscribe(topic, QoS::AtLeastOnce).await {
            self.registry.unregister(topic);
            return Err(MqttError::SubscriptionFailed(Box::new(e)));
        }
        Ok(outcome)
    }

    /// Publish with QoS 1 and block until the matching PUBACK arrives
    ///
    /// Calls are serialized; the wait matches on this request's position in
    /// the outgoing order, so late confirmations for an earlier publish that
    /// timed out are not mistaken for this one.
    pub async fn publish_and_wait(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        let state = self.connection_state();
        if !HealthMonitor::can_publish(&state) {
            return Err(match state {
                ConnectionState::Closed(reason) => MqttError::EventLoopClosed(reason),
                state => MqttError::NotConnected { state },
            });
        }

        let mut queued = self.publish_lock.lock().await;
        let mut deliveries = self.deliveries.subscribe();

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;
        *queued += 1;
        let seq = *queued;

        let wait = async {
            loop {
                match deliveries.recv().await {
                    Ok(delivery) if delivery.acknowledges(seq) => return Ok(()),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        isolog!(self.log, lvl = Level::Warn; "Missed", skipped, "delivery events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(MqttError::EventLoopClosed(
                            "event loop stopped before delivery".to_string(),
                        ));
                    }
                }
            }
        };

        match tokio::time::timeout(self.config.ack_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(MqttError::DeliveryTimeout {
                topic: topic.to_string(),
                timeout: self.config.ack_timeout,
            }),
        }
    }

    /// Resolves once the event loop has stopped
    pub async fn closed(&self) -> MqttError {
        let mut state_rx = self.state_rx.clone();
        loop {
            let reason = match &*state_rx.borrow_and_update() {
                ConnectionState::Closed(reason) => Some(reason.clone()),
                _ => None,
            };
            if let Some(reason) = reason {
                return MqttError::EventLoopClosed(reason);
            }
            if state_rx.changed().await.is_err() {
                return MqttError::EventLoopClosed("event loop task ended".to_string());
            }
        }
    }

    /// Send DISCONNECT, then stop the event loop
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        isolog!(self.log, lvl = Level::Debug; "Disconnecting from broker");
        let result = if self.connection_state().is_connected() {
            self.client
                .disconnect()
                .await
                .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))
        } else {
            Ok(())
        };
        self.stop_event_loop().await;
        result
    }

    async fn stop_event_loop(&mut self) {
        let Some(mut handle) = self.event_loop_handle.take() else {
            return;
        };

        // A connected loop exits on its own once DISCONNECT is written
        if !self.connection_state().is_connected() {
            let _ = self.shutdown_tx.send(true);
        }

        if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_ok() {
            return;
        }

        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
            isolog!(self.log, lvl = Level::Warn; "Event loop did not stop in time, aborting it");
            handle.abort();
        }
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscribeOutcome, MqttError> {
        MqttClient::subscribe(self, topic, handler).await
    }

    async fn publish_and_wait(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        MqttClient::publish_and_wait(self, topic, payload).await
    }

    async fn closed(&self) -> MqttError {
        MqttClient::closed(self).await
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        MqttClient::disconnect(self).await
    }

    fn connection_state(&self) -> ConnectionState {
        MqttClient::connection_state(self)
    }
}

/// State owned by the background event loop task
struct EventLoopSupervisor {
    event_loop: EventLoop,
    client: AsyncClient,
    registry: HandlerRegistry,
    state_tx: watch::Sender<ConnectionState>,
    deliveries: broadcast::Sender<Delivery>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect: ReconnectConfig,
    log: Arc<Logger>,
    reconnect_attempts: u32,
    has_connected: bool,
    tracker: DeliveryTracker,
    /// Return code of the last refusal, cleared by an accepted CONNACK
    last_refusal: Option<u8>,
    /// Consecutive refused CONNACKs
    refusals: u32,
}

impl EventLoopSupervisor {
    async fn run(mut self) {
        let reason = loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break "shutdown requested".to_string();
                    }
                }
                event = self.event_loop.poll() => {
                    let outcome = match event {
                        Ok(event) => self.process_event_route(EventRouter::route_mqtt_event(&event)),
                        Err(error) => self.handle_event_loop_error(error).await,
                    };
                    if let Some(reason) = outcome {
                        break reason;
                    }
                }
            }
        };

        isolog!(self.log, lvl = Level::Debug; "MQTT event loop stopped:", reason.as_str());
        self.set_state(ConnectionEvent::Stopped(reason));
    }

    fn set_state(&self, event: ConnectionEvent) {
        let _ = self
            .state_tx
            .send(HealthMonitor::determine_next_state(event));
    }

    /// Returns a reason when the loop should stop
    fn process_event_route(&mut self, route: EventRoute) -> Option<String> {
        match route {
            EventRoute::ConnectionAcknowledged { code: 0, .. } => {
                isolog!(self.log, lvl = Level::Debug; "Connected to MQTT Broker!");
                self.set_state(ConnectionEvent::ConnAckReceived);
                self.reconnect_attempts = 0;
                self.last_refusal = None;
                self.refusals = 0;
                if self.has_connected {
                    self.resubscribe_to_topics();
                }
                self.has_connected = true;
            }
            EventRoute::ConnectionAcknowledged { code, .. } => self.on_refused(code),
            EventRoute::MessageReceived { topic, payload, .. } => {
                if self.registry.dispatch(&topic, &payload) == 0 {
                    isolog!(self.log, lvl = Level::Verbose; "No handler for message on", topic.as_str());
                }
            }
            EventRoute::PublishSent(pkid) => {
                if let Some(delivery) = self.tracker.on_sent(pkid) {
                    let _ = self.deliveries.send(delivery);
                }
            }
            EventRoute::PublishAcknowledged(pkid) => {
                if let Some(delivery) = self.tracker.on_acknowledged(pkid) {
                    let _ = self.deliveries.send(delivery);
                }
            }
            EventRoute::SubscriptionConfirmed { packet_id, failed } => {
                if failed > 0 {
                    isolog!(self.log, lvl = Level::Error; "Broker refused subscription, packet", packet_id);
                } else {
                    isolog!(self.log, lvl = Level::Verbose; "Subscription confirmed, packet", packet_id);
                }
            }
            EventRoute::Disconnected => {
                isolog!(self.log, lvl = Level::Warn; "Broker closed the session");
                self.set_state(ConnectionEvent::DisconnectedByBroker);
            }
            EventRoute::DisconnectSent => return Some("client disconnected".to_string()),
            EventRoute::InfrastructureEvent(event) => {
                isolog!(self.log, lvl = Level::Events; "MQTT event:", event);
            }
            EventRoute::OutgoingEvent => {}
        }
        None
    }

    /// A repeated identical refusal is logged below error level
    fn on_refused(&mut self, code: u8) {
        if self.last_refusal == Some(code) {
            isolog!(self.log, lvl = Level::Verbose; "Connection still refused, return code", code);
        } else {
            isolog!(self.log, lvl = Level::Error; "Failed to connect, return code", code);
        }
        self.last_refusal = Some(code);
        self.refusals = self.refusals.saturating_add(1);
        self.set_state(ConnectionEvent::Refused(code));
    }

    /// Record the failure, then back off before the next poll reconnects
    ///
    /// Refusals back off on their own, slower schedule.
    async fn handle_event_loop_error(&mut self, error: ConnectionError) -> Option<String> {
        let refused = matches!(error, ConnectionError::ConnectionRefused(_));
        match &error {
            ConnectionError::ConnectionRefused(code) => {
                self.on_refused(EventRouter::return_code_value(code));
            }
            other => {
                isolog!(self.log, lvl = Level::Error, opts = EmitOptions::new().exception(other); "MQTT event loop error:");
                self.set_state(ConnectionEvent::NetworkError(other.to_string()));
            }
        }

        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect,
            *self.shutdown_rx.borrow(),
        );
        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                let delay_ms = if refused {
                    self.reconnect.calculate_refused_delay(self.refusals)
                } else {
                    delay_ms
                };
                isolog!(self.log, lvl = Level::Verbose; format!("Reconnecting (attempt {attempt}) after {delay_ms}ms"));
                if self.interruptible_sleep(delay_ms).await {
                    None
                } else {
                    Some("shutdown requested".to_string())
                }
            }
            ReconnectionDecision::AbortShutdownRequested => Some("shutdown requested".to_string()),
            ReconnectionDecision::AbortMaxAttemptsExceeded => Some(format!(
                "gave up after {} reconnection attempts: {error}",
                self.reconnect_attempts
            )),
        }
    }

    /// Returns false if shutdown was requested during the delay
    async fn interruptible_sleep(&mut self, delay_ms: u64) -> bool {
        tokio::select! {
            changed = self.shutdown_rx.changed() => {
                changed.is_ok() && !*self.shutdown_rx.borrow()
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Re-issue SUBSCRIBE for every registered filter after a reconnect
    ///
    /// Uses the non-blocking request path; awaiting here would stall the
    /// loop that drains the request channel.
    fn resubscribe_to_topics(&self) {
        for filter in self.registry.filters() {
            match self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                Ok(()) => {
                    isolog!(self.log, lvl = Level::Debug; "Re-subscribed to", filter.as_str());
                }
                Err(e) => {
                    isolog!(self.log, lvl = Level::Error, opts = EmitOptions::new().exception(&e); "Failed to re-subscribe to", filter.as_str());
                }
            }
        }
    }
}
