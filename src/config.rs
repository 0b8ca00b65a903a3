//! Configuration file layer for the notifier
//!
//! The TOML file seeds option defaults per command: `[options]` for the
//! root options and `[options.test]` for the test command. Values given on
//! the command line win over the file, and the file wins over built-in
//! defaults.
//!
//! ```toml
//! [options]
//! hostname = "broker.local"
//! topic = "home/notifications"
//! verbosity = 10
//!
//! [options.test]
//! title = "Doorbell"
//! timeout = 30
//! ```

use crate::publisher::TestMessage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/mqttnotifier/config.toml";
pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "mqttnotifier/notifications";
pub const DEFAULT_VERBOSITY: u8 = 20;

/// Whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NotifierConfig {
    #[serde(default)]
    pub options: RootOptions,
}

/// Root options; every field optional so files can be partial
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RootOptions {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub topic: Option<String>,
    /// Ask for credentials interactively
    pub login: Option<bool>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verbosity: Option<u8>,
    pub no_color: Option<bool>,
    #[serde(default)]
    pub test: TestOptions,
}

/// Options of the `test` command
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestOptions {
    pub show: Option<bool>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub timeout: Option<u32>,
    pub app_name: Option<String>,
    pub app_icon: Option<String>,
}

/// Root options after applying precedence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub hostname: String,
    pub port: u16,
    pub topic: String,
    pub login: bool,
    pub username: String,
    pub password: String,
    pub verbosity: u8,
    pub color: bool,
}

impl Default for Settings {
    fn default() -> Self {
        RootOptions::default().resolve(&RootOptions::default())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl NotifierConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Like [`load_from_file`](Self::load_from_file), but a missing file means defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }
}

impl RootOptions {
    /// Apply `overrides` (the command line) on top of `self` (the file)
    pub fn resolve(&self, overrides: &RootOptions) -> Settings {
        Settings {
            hostname: pick(&overrides.hostname, &self.hostname)
                .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
            port: overrides.port.or(self.port).unwrap_or(DEFAULT_PORT),
            topic: pick(&overrides.topic, &self.topic).unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            login: overrides.login.or(self.login).unwrap_or(false),
            username: pick(&overrides.username, &self.username).unwrap_or_default(),
            password: pick(&overrides.password, &self.password).unwrap_or_default(),
            verbosity: overrides
                .verbosity
                .or(self.verbosity)
                .unwrap_or(DEFAULT_VERBOSITY),
            color: !overrides.no_color.or(self.no_color).unwrap_or(false),
        }
    }
}

impl TestOptions {
    /// Apply `overrides` on top of `self` and fill the rest with defaults
    pub fn resolve(&self, overrides: &TestOptions) -> TestMessage {
        let defaults = TestMessage::default();
        TestMessage {
            show: overrides.show.or(self.show).unwrap_or(defaults.show),
            title: pick(&overrides.title, &self.title).unwrap_or(defaults.title),
            message: pick(&overrides.message, &self.message).unwrap_or(defaults.message),
            timeout: overrides.timeout.or(self.timeout).unwrap_or(defaults.timeout),
            app_name: pick(&overrides.app_name, &self.app_name).unwrap_or(defaults.app_name),
            app_icon: pick(&overrides.app_icon, &self.app_icon).unwrap_or(defaults.app_icon),
        }
    }
}

fn pick(first: &Option<String>, second: &Option<String>) -> Option<String> {
    first.clone().or_else(|| second.clone())
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[options]
hostname = "broker.local"
port = 8883
topic = "home/notifications"
login = true
username = "alice"
password = "secret"
verbosity = 10
no_color = true

[options.test]
show = true
title = "Doorbell"
message = "Ding"
timeout = 30
app_name = "Door"
app_icon = "bell"
"#;

        let config: NotifierConfig = toml::from_str(toml_content).unwrap();

        assert_eq!(config.options.hostname.as_deref(), Some("broker.local"));
        assert_eq!(config.options.port, Some(8883));
        assert_eq!(config.options.login, Some(true));
        assert_eq!(config.options.test.timeout, Some(30));
        assert_eq!(config.options.test.app_icon.as_deref(), Some("bell"));
    }

    #[test]
    fn test_empty_config_resolves_to_defaults() {
        let config: NotifierConfig = toml::from_str("").unwrap();

        let settings = config.options.resolve(&RootOptions::default());

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.hostname, "127.0.0.1");
        assert_eq!(settings.port, 1883);
        assert_eq!(settings.topic, "mqttnotifier/notifications");
        assert_eq!(settings.verbosity, 20);
        assert!(settings.color);
        assert!(!settings.login);
        assert!(settings.username.is_empty());
    }

    #[test]
    fn test_command_line_beats_file() {
        let file = RootOptions {
            hostname: Some("file-host".to_string()),
            port: Some(1884),
            verbosity: Some(5),
            ..RootOptions::default()
        };
        let cli = RootOptions {
            hostname: Some("cli-host".to_string()),
            no_color: Some(true),
            ..RootOptions::default()
        };

        let settings = file.resolve(&cli);

        assert_eq!(settings.hostname, "cli-host");
        assert_eq!(settings.port, 1884);
        assert_eq!(settings.verbosity, 5);
        assert!(!settings.color);
    }

    #[test]
    fn test_test_options_resolution() {
        let file = TestOptions {
            title: Some("From file".to_string()),
            timeout: Some(60),
            ..TestOptions::default()
        };
        let cli = TestOptions {
            message: Some("From cli".to_string()),
            timeout: Some(5),
            ..TestOptions::default()
        };

        let message = file.resolve(&cli);

        assert_eq!(message.title, "From file");
        assert_eq!(message.message, "From cli");
        assert_eq!(message.timeout, 5);
        assert_eq!(message.app_name, "MQTTNotifier");
        assert_eq!(message.app_icon, "dialog-information");
        assert!(!message.show);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config: NotifierConfig = toml::from_str(
            r#"
[options]
port = 1999
color_scheme = "dark"

[options.launch]
anything = 1
"#,
        )
        .unwrap();

        assert_eq!(config.options.port, Some(1999));
    }

    #[test]
    fn test_invalid_port_type_is_an_error() {
        let result: Result<NotifierConfig, _> = toml::from_str("[options]\nport = \"high\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/mqtt.toml"), PathBuf::from("/etc/mqtt.toml"));
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.config/a.toml"), home.join(".config/a.toml"));
            assert_eq!(expand_home("~"), home);
        }
    }
}
