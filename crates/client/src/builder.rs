//! Builder pattern for constructing an [`ActionClient`].

use std::time::Duration;

use mc_auth::validate_login_key;
use mc_domain::config::ChannelConfig;
use mc_domain::{Credential, Error, Result, Secret};

use crate::channel::CorrelatedChannel;
use crate::client::ActionClient;
use crate::types::ChannelSettings;

/// Fluent builder for [`ActionClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use mc_client::ActionClientBuilder;
/// # use mc_domain::Credential;
/// let client = ActionClientBuilder::new()
///     .url("wss://mesh.example.com")
///     .credential(Credential::password("admin", "hunter2"))
///     .call_timeout(Some(std::time::Duration::from_secs(10)))
///     .build()
///     .unwrap();
/// ```
pub struct ActionClientBuilder {
    url: Option<String>,
    credential: Option<Credential>,
    settings: ChannelSettings,
}

impl ActionClientBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            credential: None,
            settings: ChannelSettings::default(),
        }
    }

    // ── Required ─────────────────────────────────────────────────────

    /// Server base URL (`ws://` or `wss://`). The control path is appended
    /// when missing.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    // ── Channel limits ───────────────────────────────────────────────

    /// Apply the `[channel]` section of a config file.
    pub fn channel_config(mut self, cfg: &ChannelConfig) -> Self {
        self.settings = ChannelSettings::from(cfg);
        self
    }

    /// Per-call deadline (default 30s). `None` waits indefinitely.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings.call_timeout = timeout;
        self
    }

    /// Inbound frames larger than this are dropped (default 64 MiB).
    pub fn max_inbound_bytes(mut self, n: usize) -> Self {
        self.settings.max_inbound_bytes = n;
        self
    }

    /// Outbound queue depth (default 64).
    pub fn outbound_queue(mut self, n: usize) -> Self {
        self.settings.outbound_queue = n.max(1);
        self
    }

    /// Build the [`ActionClient`]. Nothing is connected yet.
    pub fn build(self) -> Result<ActionClient> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Configuration("server url is required".into()))?;
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::Configuration(format!(
                "server url must use ws:// or wss://, got {url:?}"
            )));
        }

        let credential = self.credential.ok_or_else(|| {
            Error::Configuration("a login key or password is required".into())
        })?;
        if credential.username.is_empty() {
            return Err(Error::Configuration("username is required".into()));
        }
        if let Secret::LoginKey(key_hex) = &credential.secret {
            validate_login_key(key_hex)
                .map_err(|e| Error::Configuration(format!("login key rejected: {e}")))?;
        }

        Ok(ActionClient {
            base_url: url,
            credential,
            channel: CorrelatedChannel::new(self.settings),
        })
    }
}

impl Default for ActionClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
