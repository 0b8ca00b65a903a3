//! Testing utilities and mock implementations
//!
//! Lets the notifier be tested without an MQTT broker or a desktop
//! notification service.

pub mod mocks;

pub use mocks::*;
