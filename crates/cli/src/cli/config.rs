use mc_domain::config::{Config, ConfigError, ConfigSeverity, SecretRef};

/// Print every validation issue, errors first. Returns `false` when at
/// least one error was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let (errors, warnings): (Vec<ConfigError>, Vec<ConfigError>) = config
        .validate()
        .into_iter()
        .partition(|issue| issue.severity == ConfigSeverity::Error);

    if errors.is_empty() && warnings.is_empty() {
        println!("{config_path}: ok");
        return true;
    }

    for issue in errors.iter().chain(&warnings) {
        println!("{issue}");
    }
    println!(
        "\n{config_path}: {} error(s), {} warning(s)",
        errors.len(),
        warnings.len()
    );

    errors.is_empty()
}

/// Dump the resolved config, defaults filled in, as TOML. Secret
/// references are printed as configured, with inline values masked;
/// nothing is resolved.
pub fn show(config: &Config) -> anyhow::Result<()> {
    print!("{}", render(config)?);
    Ok(())
}

fn render(config: &Config) -> anyhow::Result<String> {
    let mut shown = config.clone();
    shown.auth.login_key = shown.auth.login_key.as_ref().map(SecretRef::redacted);
    shown.auth.password = shown.auth.password.as_ref().map(SecretRef::redacted);
    toml::to_string_pretty(&shown).map_err(|e| anyhow::anyhow!("serializing config: {e}"))
}
