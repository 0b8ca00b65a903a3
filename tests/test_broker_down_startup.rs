//! Behavior when no broker is reachable or the broker refuses the session
//!
//! The client keeps retrying with the 25ms → 50ms → 100ms → 250ms backoff
//! until it is stopped; a test publish gives up after the acknowledgement
//! timeout and still shuts the client down cleanly. Refusals back off from
//! 1s upwards and are reported at error level once.


use mqtt_notifier::commands::{self, StopReason};
use mqtt_notifier::observability::Level;
use mqtt_notifier::publisher::TestMessage;
use mqtt_notifier::testing::mocks::RecordingSink;
use mqtt_notifier::transport::mqtt::{
    ConnectionConfig, ConnectionState, MqttClient, MqttError, ReconnectConfig,
};
use mqtt_notifier::NotifierError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_helpers::{capture_logger, lines_at};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Local listener answering every CONNECT with a CONNACK carrying `return_code`
async fn refusing_broker(return_code: u8) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut connect = [0u8; 256];
                if socket.read(&mut connect).await.unwrap_or(0) > 0 {
                    let _ = socket.write_all(&[0x20, 0x02, 0x00, return_code]).await;
                }
            });
        }
    });
    port
}

fn unreachable_broker() -> ConnectionConfig {
    ConnectionConfig::new("127.0.0.1", 1, "mqttnotifier-test")
        .with_ack_timeout(Duration::from_millis(300))
}

#[tokio::test]
async fn test_client_retries_while_broker_is_down() {
    let (log, capture) = capture_logger(Level::Verbose);

    let mut client = MqttClient::connect(unreachable_broker(), log).unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert!(!client.connection_state().is_connected());
    assert!(!client.connection_state().is_closed());
    let retries = capture
        .lines()
        .iter()
        .filter(|line| line.contains("Reconnecting (attempt"))
        .count();
    assert!(retries >= 2, "expected repeated reconnect attempts, saw {retries}");
    assert!(capture.contents().contains("Reconnecting (attempt 1) after 25ms"));

    client.disconnect().await.unwrap();
    assert!(client.connection_state().is_closed());
}

#[tokio::test]
async fn test_retry_limit_closes_the_session() {
    let (log, _capture) = capture_logger(Level::Info);
    let reconnect = ReconnectConfig {
        max_attempts: Some(2),
        backoff_pattern: vec![10],
        sustained_delay: 10,
        ..ReconnectConfig::default()
    };

    let client = MqttClient::connect_with(unreachable_broker(), reconnect, log).unwrap();
    let error = timeout(Duration::from_secs(5), client.closed())
        .await
        .expect("session should close after the retry limit");

    assert!(matches!(error, MqttError::EventLoopClosed(_)));
    assert!(client.connection_state().is_closed());
}

#[tokio::test]
async fn test_test_publish_times_out_and_disconnects() {
    let (log, capture) = capture_logger(Level::Debug);
    let mut client = MqttClient::connect(unreachable_broker(), log.clone()).unwrap();
    let start = Instant::now();

    let result = commands::run_test(&mut client, "alerts", &TestMessage::default(), log).await;

    assert!(matches!(
        result,
        Err(NotifierError::Transport(MqttError::DeliveryTimeout { .. }))
    ));
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(client.connection_state().is_closed());
    assert!(capture.contents().contains("Client loop stopped, bye!"));
}

#[tokio::test]
async fn test_launch_stops_on_signal_while_broker_is_down() {
    let (log, capture) = capture_logger(Level::Info);
    let mut client = MqttClient::connect(unreachable_broker(), log.clone()).unwrap();
    let sink = Arc::new(RecordingSink::new());

    let reason = commands::run_launch(
        &mut client,
        "alerts",
        sink,
        tokio::time::sleep(Duration::from_millis(200)),
        log,
    )
    .await
    .unwrap();

    assert_eq!(reason, StopReason::Interrupted);
    assert!(client.connection_state().is_closed());
    assert!(!lines_at(&capture, Level::Info).is_empty());
    assert!(capture
        .contents()
        .contains("Client stopped by keyboard interrupt, exiting."));
}

#[test]
fn test_refused_state_blocks_publishing() {
    let state = ConnectionState::Refused(5);

    assert!(!mqtt_notifier::transport::mqtt::HealthMonitor::can_publish(&state));
    assert_eq!(state.to_string(), "refused (return code 5)");
}

#[tokio::test]
async fn test_refused_session_backs_off_and_reports_once() {
    let port = refusing_broker(5).await;
    let (log, capture) = capture_logger(Level::Verbose);
    let config = ConnectionConfig::new("127.0.0.1", port, "mqttnotifier-test")
        .with_credentials("alice", "wrong");

    let mut client = MqttClient::connect(config, log).unwrap();
    let result = client.wait_connected(Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(matches!(
        result,
        Err(MqttError::NotConnected {
            state: ConnectionState::Refused(5)
        })
    ));
    assert_eq!(client.connection_state(), ConnectionState::Refused(5));
    let errors = lines_at(&capture, Level::Error);
    assert_eq!(errors.len(), 1, "refusal reported more than once: {errors:?}");
    assert!(errors[0].contains("Failed to connect, return code 5"));
    let repeats = capture
        .lines()
        .iter()
        .filter(|line| line.contains("Connection still refused, return code 5"))
        .count();
    assert_eq!(repeats, 1);
    let contents = capture.contents();
    assert!(contents.contains("Reconnecting (attempt 1) after 1000ms"));
    assert!(contents.contains("Reconnecting (attempt 2) after 2000ms"));

    client.disconnect().await.unwrap();
    assert!(client.connection_state().is_closed());
}
