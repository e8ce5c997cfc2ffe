//! Action client: authenticates a [`CorrelatedChannel`] against the
//! server's control endpoint and issues named actions over it.

use mc_auth::{make_login_token_now, make_password_auth_header};
use mc_domain::trace::TraceEvent;
use mc_domain::{Credential, Result, Secret};
use mc_protocol::{Envelope, Reply, AUTH_HEADER, AUTH_QUERY_PARAM, CONTROL_PATH};
use serde_json::{Map, Value};

use crate::channel::{redact_query, CorrelatedChannel};
use crate::types::ChannelState;

/// A configured client for one server and one credential.
///
/// Create via [`ActionClientBuilder`](crate::builder::ActionClientBuilder).
/// The connection is not opened until [`connect`](Self::connect); a login
/// token is minted fresh for every connect.
pub struct ActionClient {
    pub(crate) base_url: String,
    pub(crate) credential: Credential,
    pub(crate) channel: CorrelatedChannel,
}

impl ActionClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::ActionClientBuilder {
        crate::builder::ActionClientBuilder::new()
    }

    /// Open the websocket and authenticate.
    pub async fn connect(&self) -> Result<()> {
        let (url, headers) = self.connection_target()?;
        tracing::info!(
            url = %redact_query(&url),
            user = %self.credential.username,
            "connecting to server"
        );
        self.channel.connect(&url, &headers).await?;
        TraceEvent::ConnectionOpened {
            url: redact_query(&url).to_owned(),
            auth_mode: self.auth_mode().into(),
        }
        .emit();
        Ok(())
    }

    /// Issue `action` with `fields` and wait for the reply.
    ///
    /// `fields` may not override `action` or the correlation id.
    pub async fn call(&self, action: &str, fields: Map<String, Value>) -> Result<Reply> {
        self.channel
            .call(Envelope::new(action).with_fields(fields))
            .await
    }

    /// Send a pre-built envelope, keeping any correlation id it carries.
    pub async fn send(&self, envelope: Envelope) -> Result<Reply> {
        self.channel.call(envelope).await
    }

    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.channel.cancel(correlation_id)
    }

    pub async fn close(&self) -> Result<()> {
        self.channel.close().await
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn channel(&self) -> &CorrelatedChannel {
        &self.channel
    }

    /// Server domain the credential belongs to; used to qualify ids.
    pub fn domain(&self) -> &str {
        &self.credential.domain
    }

    fn auth_mode(&self) -> &'static str {
        match self.credential.secret {
            Secret::LoginKey(_) => "login_key",
            Secret::Password(_) => "password",
        }
    }

    /// URL and upgrade headers for one connection attempt.
    pub(crate) fn connection_target(&self) -> Result<(String, Vec<(String, String)>)> {
        let url = control_url(&self.base_url);
        let cred = &self.credential;
        match &cred.secret {
            Secret::LoginKey(key_hex) => {
                let token = make_login_token_now(&cred.username, key_hex, &cred.domain)?;
                let sep = if url.contains('?') { '&' } else { '?' };
                Ok((format!("{url}{sep}{AUTH_QUERY_PARAM}={token}"), Vec::new()))
            }
            Secret::Password(password) => {
                let header =
                    make_password_auth_header(&cred.username, password, cred.otp.as_deref());
                Ok((url, vec![(AUTH_HEADER.to_owned(), header)]))
            }
        }
    }
}

/// Append the control path to `base` unless it is already there.
pub(crate) fn control_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(CONTROL_PATH) {
        base.to_owned()
    } else {
        format!("{base}{CONTROL_PATH}")
    }
}
