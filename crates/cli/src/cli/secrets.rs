//! Resolve the credential described by the `[auth]` section.

use std::io::IsTerminal;

use anyhow::Context;
use mc_domain::config::{Config, SecretRef};
use mc_domain::Credential;

/// Resolve one secret reference.
///
/// Precedence:
/// 1. `value` field (plaintext, warns)
/// 2. `service` + `account` → OS keychain via `keyring`
/// 3. `env` field
/// 4. Interactive prompt, when `prompt` is given and stdin is a terminal
///
/// Returns `None` when no source produced a value.
pub fn resolve_secret(secret: &SecretRef, prompt: Option<&str>) -> anyhow::Result<Option<String>> {
    // 1. Plaintext value (warn the user)
    if let Some(ref value) = secret.value {
        tracing::warn!(
            "secret loaded from plaintext config field 'value'; \
             prefer 'env' or keychain 'service'+'account'"
        );
        return Ok(Some(value.clone()));
    }

    // 2. OS keychain via service + account
    if let (Some(ref service), Some(ref account)) = (&secret.service, &secret.account) {
        match resolve_from_keychain(service, account) {
            Ok(value) => return Ok(Some(value)),
            Err(e) => {
                tracing::warn!(
                    service = %service,
                    account = %account,
                    error = %e,
                    "keychain lookup failed, falling through"
                );
            }
        }
    }

    // 3. Env var
    if let Some(ref var) = secret.env {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => return Ok(Some(value)),
            _ => tracing::debug!(env_var = %var, "secret env var not set"),
        }
    }

    // 4. Prompt
    if let Some(prompt) = prompt {
        if std::io::stdin().is_terminal() {
            let value = rpassword::prompt_password_stderr(prompt).context("reading password")?;
            return Ok((!value.is_empty()).then_some(value));
        }
    }

    Ok(None)
}

/// Read a secret from the OS keychain (macOS Keychain, Windows Credential
/// Manager, Linux Secret Service).
pub fn resolve_from_keychain(service: &str, account: &str) -> anyhow::Result<String> {
    let entry = keyring::Entry::new(service, account).context("keyring entry creation failed")?;
    entry.get_password().context("keyring lookup failed")
}

/// Build the login [`Credential`] from config. A login key takes
/// precedence over a password; only the password may be prompted for.
pub fn credential_from_config(config: &Config) -> anyhow::Result<Credential> {
    let auth = &config.auth;
    if auth.username.is_empty() {
        anyhow::bail!("auth.username is not set");
    }

    let key = match &auth.login_key {
        Some(key_ref) => resolve_secret(key_ref, None)?,
        None => None,
    };

    let credential = match key {
        Some(key_hex) => Credential::login_key(&auth.username, key_hex),
        None => {
            let prompt = format!("Password for {}: ", auth.username);
            let password = match &auth.password {
                Some(pw_ref) => resolve_secret(pw_ref, Some(&prompt))?,
                None => None,
            };
            let Some(password) = password else {
                anyhow::bail!(
                    "no login key or password could be resolved; configure [auth] login_key or password"
                );
            };
            let mut credential = Credential::password(&auth.username, password);
            if let Some(otp) = auth
                .otp_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|otp| !otp.is_empty())
            {
                credential = credential.with_otp(otp);
            }
            credential
        }
    };

    Ok(credential.with_domain(&config.server.domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_domain::Secret;

    #[test]
    fn plaintext_value_wins() {
        let secret = SecretRef {
            value: Some("inline".into()),
            env: Some("MESHCTL_TEST_UNUSED_ENV".into()),
            ..Default::default()
        };
        assert_eq!(resolve_secret(&secret, None).unwrap().as_deref(), Some("inline"));
    }

    #[test]
    fn env_var_is_read() {
        std::env::set_var("MESHCTL_TEST_SECRET_ENV", "from-env");
        let secret = SecretRef::from_env("MESHCTL_TEST_SECRET_ENV");
        assert_eq!(resolve_secret(&secret, None).unwrap().as_deref(), Some("from-env"));
    }

    #[test]
    fn missing_everything_is_none() {
        let secret = SecretRef::from_env("MESHCTL_TEST_DEFINITELY_UNSET");
        assert!(resolve_secret(&secret, None).unwrap().is_none());
    }

    #[test]
    fn login_key_takes_precedence() {
        let mut config = Config::default();
        config.auth.username = "admin".into();
        config.server.domain = "corp".into();
        config.auth.login_key = Some(SecretRef {
            value: Some("ab".repeat(80)),
            ..Default::default()
        });
        config.auth.password = Some(SecretRef {
            value: Some("pw".into()),
            ..Default::default()
        });

        let cred = credential_from_config(&config).unwrap();
        assert!(matches!(cred.secret, Secret::LoginKey(_)));
        assert_eq!(cred.domain, "corp");
    }

    #[test]
    fn password_picks_up_otp_env() {
        std::env::set_var("MESHCTL_TEST_OTP_ENV", "654321");
        let mut config = Config::default();
        config.auth.username = "admin".into();
        config.auth.password = Some(SecretRef {
            value: Some("pw".into()),
            ..Default::default()
        });
        config.auth.otp_env = Some("MESHCTL_TEST_OTP_ENV".into());

        let cred = credential_from_config(&config).unwrap();
        assert_eq!(cred.secret, Secret::Password("pw".into()));
        assert_eq!(cred.otp.as_deref(), Some("654321"));
    }

    #[test]
    fn no_secret_is_an_error() {
        let mut config = Config::default();
        config.auth.username = "admin".into();
        assert!(credential_from_config(&config).is_err());
    }
}
