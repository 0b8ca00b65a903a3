//! The `launch` and `test` command flows
//!
//! Both end the same way: disconnect, stop the event loop, then log that the
//! client is gone.

use crate::dispatch;
use crate::error::NotifierResult;
use crate::isolog;
use crate::notification::NotificationSink;
use crate::observability::{EmitOptions, Level, Logger};
use crate::publisher::{self, TestMessage};
use crate::transport::Transport;
use std::future::Future;
use std::sync::Arc;

/// Why the listening loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown future resolved (Ctrl-C or SIGTERM)
    Interrupted,
    /// The session ended on its own
    LoopFailed(String),
}

/// Listen for notifications on `topic` until `shutdown` resolves or the
/// session ends
pub async fn run_launch<T, F>(
    client: &mut T,
    topic: &str,
    sink: Arc<dyn NotificationSink>,
    shutdown: F,
    log: Arc<Logger>,
) -> NotifierResult<StopReason>
where
    T: Transport + ?Sized,
    F: Future<Output = ()>,
{
    if let Err(error) = dispatch::subscribe(&*client, topic, sink, log.clone()).await {
        shutdown_client(client, &log).await;
        return Err(error.into());
    }

    let reason = tokio::select! {
        _ = shutdown => {
            isolog!(log; "Client stopped by keyboard interrupt, exiting.");
            StopReason::Interrupted
        }
        error = client.closed() => {
            isolog!(log, lvl = Level::Error, opts = EmitOptions::new().exception(&error); "Client loop interrupted by unknown exception:");
            StopReason::LoopFailed(error.to_string())
        }
    };

    shutdown_client(client, &log).await;
    Ok(reason)
}

/// Publish one test notification, then shut the client down
pub async fn run_test<T>(
    client: &mut T,
    topic: &str,
    message: &TestMessage,
    log: Arc<Logger>,
) -> NotifierResult<String>
where
    T: Transport + ?Sized,
{
    let result =
        publisher::publish_test(&*client, topic, message.to_fields(), message.show, &log).await;
    shutdown_client(client, &log).await;
    Ok(result?)
}

async fn shutdown_client<T: Transport + ?Sized>(client: &mut T, log: &Logger) {
    if let Err(error) = client.disconnect().await {
        isolog!(log, lvl = Level::Warn, opts = EmitOptions::new().exception(&error); "Disconnect failed:");
    }
    isolog!(log, lvl = Level::Debug; "Client loop stopped, bye!");
}
