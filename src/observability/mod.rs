//! Observability: the console logger and the `tracing` bridge feeding it

pub mod bridge;
pub mod logging;

// Re-export for convenience
pub use bridge::{init_logging, IsologLayer};
pub use logging::{logger, process_identifier, EmitOptions, Level, LogRecord, Logger, Part};
