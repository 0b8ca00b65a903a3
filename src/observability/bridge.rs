//! Forward `tracing` events into the console logger
//!
//! Libraries such as rumqttc report through `tracing`. This layer renders
//! those events with the same prefix, counter and thresholds as records
//! logged through [`isolog!`](crate::isolog), so one stream shows both.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Override library event filtering (follows env_logger format)

use super::logging::{CallSite, EmitOptions, Level, Logger, Part};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Filter applied when `RUST_LOG` is unset; quiets chatty dependencies
pub const DEFAULT_FILTER: &str = "trace,rumqttc=warn,tokio=warn";

const OWN_CRATE: &str = "mqtt_notifier";

/// Map a `tracing` level onto the logger's scale
pub fn map_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::TRACE => Level::Verbose,
        tracing::Level::DEBUG => Level::Debug,
        tracing::Level::INFO => Level::Info,
        tracing::Level::WARN => Level::Warn,
        tracing::Level::ERROR => Level::Error,
    }
}

/// `tracing_subscriber` layer writing through a [`Logger`]
pub struct IsologLayer {
    logger: Arc<Logger>,
}

impl IsologLayer {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<String>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl<S> Layer<S> for IsologLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = map_level(metadata.level());
        if !self.logger.enabled(level) {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let mut parts: Vec<Part> = collector.message.into_iter().map(Part::Text).collect();
        parts.extend(collector.fields.into_iter().map(Part::Text));
        if parts.is_empty() {
            parts.push(Part::from(metadata.name()));
        }

        let crate_name = metadata.target().split("::").next().unwrap_or_default();
        let options = if crate_name == OWN_CRATE {
            EmitOptions::default()
        } else {
            EmitOptions::default().emitter(crate_name)
        };

        let site = CallSite::new(
            metadata.module_path().unwrap_or(metadata.target()),
            metadata.file().unwrap_or("<unknown>"),
            metadata.line().unwrap_or(0),
        );

        let _ = self.logger.emit_at(&parts, level, options, site);
    }
}

/// Install the bridge as the global `tracing` subscriber
pub fn init_logging(logger: Arc<Logger>) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(IsologLayer::new(logger))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::CaptureWriter;

    fn bridged_logger() -> (Arc<Logger>, CaptureWriter) {
        let capture = CaptureWriter::new();
        let logger = Arc::new(Logger::with_writer(capture.clone()));
        logger.configure("BRIDGE", false, Level::Info.value(), Level::Info.value());
        (logger, capture)
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(map_level(&tracing::Level::TRACE), Level::Verbose);
        assert_eq!(map_level(&tracing::Level::DEBUG), Level::Debug);
        assert_eq!(map_level(&tracing::Level::INFO), Level::Info);
        assert_eq!(map_level(&tracing::Level::WARN), Level::Warn);
        assert_eq!(map_level(&tracing::Level::ERROR), Level::Error);
    }

    #[test]
    fn test_foreign_events_use_their_crate_as_emitter() {
        let (logger, capture) = bridged_logger();
        let subscriber = tracing_subscriber::registry().with(IsologLayer::new(logger.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "rumqttc::state", pkid = 7, "Collision on packet id");
            tracing::info!("from the notifier itself");
            tracing::debug!("below the global threshold");
        });

        assert_eq!(logger.count(), 2);
        let lines = capture.lines();
        assert!(lines[0].contains(":WARN:"));
        assert!(lines[0].contains("[rumqttc] Collision on packet id pkid=7"));
        assert!(lines[1].contains("[BRIDGE] from the notifier itself"));
    }
}
