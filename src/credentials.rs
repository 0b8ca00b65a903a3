//! Broker credential resolution
//!
//! Sources, lowest to highest priority: explicit arguments, the interactive
//! prompt (only when requested), then the `MN_USERNAME` / `MN_PASSWORD`
//! environment variables. Environment values always win so automation can
//! override whatever was configured.

use crate::isolog;
use crate::observability::{Level, Logger};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use thiserror::Error;

pub const USERNAME_ENV: &str = "MN_USERNAME";
pub const PASSWORD_ENV: &str = "MN_PASSWORD";

/// Resolved username and password; empty strings mean anonymous
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read credentials from terminal: {0}")]
    Prompt(#[from] io::Error),
}

/// Interactive source of credentials
pub trait CredentialPrompt {
    fn username(&mut self) -> io::Result<String>;
    /// Must not echo the typed characters
    fn password(&mut self) -> io::Result<String>;
}

/// Prompts on the controlling terminal
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn username(&mut self) -> io::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "Enter MQTT username: ")?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn password(&mut self) -> io::Result<String> {
        rpassword::prompt_password("Enter MQTT password: ")
    }
}

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Applies the credential precedence rules
pub struct CredentialResolver<P, E> {
    prompt: P,
    env: E,
    log: Arc<Logger>,
}

impl CredentialResolver<TerminalPrompt, fn(&str) -> Option<String>> {
    /// Resolver reading the real terminal and process environment
    pub fn new(log: Arc<Logger>) -> Self {
        Self {
            prompt: TerminalPrompt,
            env: process_env,
            log,
        }
    }
}

impl<P, E> CredentialResolver<P, E>
where
    P: CredentialPrompt,
    E: Fn(&str) -> Option<String>,
{
    pub fn with_sources(prompt: P, env: E, log: Arc<Logger>) -> Self {
        Self { prompt, env, log }
    }

    pub fn resolve(
        &mut self,
        explicit_username: &str,
        explicit_password: &str,
        interactive: bool,
    ) -> Result<Credentials, CredentialError> {
        let mut credentials = Credentials::new(explicit_username, explicit_password);

        if interactive {
            credentials.username = self.prompt.username()?;
            credentials.password = self.prompt.password()?;
        }

        let env_username = (self.env)(USERNAME_ENV);
        let env_password = (self.env)(PASSWORD_ENV);
        if env_username.is_some() || env_password.is_some() {
            isolog!(self.log, lvl = Level::Debug; "Using environment credentials");
        }
        if let Some(username) = env_username {
            credentials.username = username;
        }
        if let Some(password) = env_password {
            credentials.password = password;
        }

        Ok(credentials)
    }
}
