use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    /// Where to find the 160-hex-character login key. Takes precedence
    /// over `password` when both are set.
    #[serde(default)]
    pub login_key: Option<SecretRef>,
    /// Where to find the account password.
    #[serde(default)]
    pub password: Option<SecretRef>,
    /// Env var holding a second-factor token (password auth only).
    #[serde(default)]
    pub otp_env: Option<String>,
}

/// Reference to a secret held outside the config file.
///
/// Resolution order is `value`, then the OS keychain (`service` +
/// `account`), then `env`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SecretRef {
    /// Direct value (for throwaway setups; prefer env or keychain).
    #[serde(default)]
    pub value: Option<String>,
    /// Env var containing the secret.
    #[serde(default)]
    pub env: Option<String>,
    /// Keychain service name (e.g. "meshctl").
    #[serde(default)]
    pub service: Option<String>,
    /// Keychain account name (e.g. "admin-login-key").
    #[serde(default)]
    pub account: Option<String>,
}

impl SecretRef {
    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            env: Some(var.into()),
            ..Default::default()
        }
    }

    /// Copy with any inline `value` masked, for display.
    pub fn redacted(&self) -> Self {
        Self {
            value: self.value.as_ref().map(|_| "<redacted>".to_string()),
            ..self.clone()
        }
    }

    /// True when no source is configured at all.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
            && self.env.is_none()
            && (self.service.is_none() || self.account.is_none())
    }
}
