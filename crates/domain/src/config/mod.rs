mod auth;
mod channel;
mod reconnect;
mod server;

pub use auth::*;
pub use channel::*;
pub use reconnect::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Secrets held in
    /// env vars or the keychain are not resolved here.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.url.is_empty() {
            errors.push(ConfigError::error("server.url", "url must not be empty"));
        } else if !self.server.has_websocket_scheme() {
            errors.push(ConfigError::error(
                "server.url",
                "url must start with ws:// or wss://",
            ));
        } else if self.server.url.starts_with("ws://") {
            errors.push(ConfigError::warning(
                "server.url",
                "plain ws:// sends credentials without transport encryption",
            ));
        }

        if self.auth.username.is_empty() {
            errors.push(ConfigError::error("auth.username", "username must not be empty"));
        }

        match (&self.auth.login_key, &self.auth.password) {
            (None, None) => errors.push(ConfigError::error(
                "auth",
                "either auth.login_key or auth.password must be configured",
            )),
            (Some(_), Some(_)) => errors.push(ConfigError::warning(
                "auth",
                "both login_key and password configured; login_key takes precedence",
            )),
            _ => {}
        }

        if let Some(ref key) = self.auth.login_key {
            if key.is_empty() {
                errors.push(ConfigError::error(
                    "auth.login_key",
                    "set one of value, env, or service+account",
                ));
            }
            if let Some(ref value) = key.value {
                if value.len() != 160 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
                    errors.push(ConfigError::error(
                        "auth.login_key.value",
                        "login key must be 160 hex characters",
                    ));
                }
            }
        }
        if let Some(ref password) = self.auth.password {
            if password.is_empty() {
                errors.push(ConfigError::error(
                    "auth.password",
                    "set one of value, env, or service+account",
                ));
            }
        }
        for (field, secret) in [
            ("auth.login_key.value", &self.auth.login_key),
            ("auth.password.value", &self.auth.password),
        ] {
            if secret.as_ref().is_some_and(|s| s.value.is_some()) {
                errors.push(ConfigError::warning(
                    field,
                    "plaintext secret in config file; prefer env or keychain",
                ));
            }
        }

        if self.channel.call_timeout_secs == 0 {
            errors.push(ConfigError::warning(
                "channel.call_timeout_secs",
                "0 disables the deadline; calls may wait forever",
            ));
        }
        if self.channel.outbound_queue == 0 {
            errors.push(ConfigError::error(
                "channel.outbound_queue",
                "outbound_queue must be greater than 0",
            ));
        }

        if self.reconnect.backoff_factor < 1.0 {
            errors.push(ConfigError::warning(
                "reconnect.backoff_factor",
                "backoff_factor below 1.0 shrinks the delay between attempts",
            ));
        }

        errors
    }
}
