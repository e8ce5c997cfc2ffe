pub mod commands;
pub mod config;
pub mod retry;
pub mod secrets;

use std::path::Path;

use clap::{Parser, Subcommand};

/// meshctl: drive a remote device-management server over its control
/// websocket.
#[derive(Debug, Parser)]
#[command(name = "meshctl", version, about)]
pub struct Cli {
    /// Config file path (overrides `MESHCTL_CONFIG`).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List device groups.
    Meshes,
    /// Create a device group.
    CreateMesh {
        name: String,
        #[arg(long)]
        desc: Option<String>,
    },
    /// Delete a device group by id (bare or `mesh/<domain>/<id>`).
    DeleteMesh { id: String },
    /// List devices, optionally narrowed by a search expression
    /// (e.g. `"g:lab and os:linux or wsc:noav"`).
    Devices {
        #[arg(long, short)]
        filter: Option<String>,
    },
    /// List user accounts.
    Users,
    /// List user groups.
    UserGroups,
    /// Create a user account. The password is prompted for unless
    /// `--password-env` names a variable holding it.
    AddUser {
        username: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        realname: Option<String>,
        #[arg(long)]
        password_env: Option<String>,
    },
    /// Delete a user account.
    RemoveUser { username: String },
    /// Run a shell command on a device.
    RunCommand {
        /// Node id: full, bare base64 or 96-character hex.
        node: String,
        command: String,
        /// 0 = agent account, 1 = logged-in user if any, 2 = logged-in user only.
        #[arg(long, default_value_t = 0)]
        run_as_user: u8,
    },
    /// Show server information.
    ServerInfo,
    /// Send an arbitrary action and print the raw reply.
    Call {
        action: String,
        /// Extra fields as a JSON object.
        #[arg(long)]
        fields: Option<String>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from `path`, else the path in `MESHCTL_CONFIG`,
/// else `meshctl.toml`. A missing file yields the defaults. Returns the
/// parsed [`Config`](mc_domain::config::Config) and the path that was used.
pub fn load_config(path: Option<&str>) -> anyhow::Result<(mc_domain::config::Config, String)> {
    let config_path = match path {
        Some(p) => p.to_owned(),
        None => std::env::var("MESHCTL_CONFIG").unwrap_or_else(|_| "meshctl.toml".into()),
    };
    let config = load_config_from(Path::new(&config_path))?;
    Ok((config, config_path))
}

pub fn load_config_from(path: &Path) -> anyhow::Result<mc_domain::config::Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(mc_domain::config::Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
}
