//! Login credentials supplied once at client construction.

use std::fmt;

/// The secret half of a [`Credential`]. Exactly one auth mode is active
/// per connection.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// Plain password, sent base64-encoded in the `x-meshauth` header.
    Password(String),
    /// 80-byte login key as 160 hex characters. Used to mint an encrypted
    /// login token carried in the `auth=` query parameter.
    LoginKey(String),
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password(<redacted>)"),
            Secret::LoginKey(_) => f.write_str("LoginKey(<redacted>)"),
        }
    }
}

/// Immutable login material for one client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    /// Server domain; empty for the default domain.
    pub domain: String,
    pub secret: Secret,
    /// Second-factor token, only meaningful with [`Secret::Password`].
    pub otp: Option<String>,
}

impl Credential {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            domain: String::new(),
            secret: Secret::Password(password.into()),
            otp: None,
        }
    }

    pub fn login_key(username: impl Into<String>, key_hex: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            domain: String::new(),
            secret: Secret::LoginKey(key_hex.into()),
            otp: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.otp = Some(otp.into());
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("secret", &self.secret)
            .field("otp", &self.otp.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
