use anyhow::Context;
use mc_client::actions::{self, NewUser};
use mc_client::{ActionClient, ActionClientBuilder, ReconnectBackoff};
use mc_domain::config::Config;
use mc_filter::FilterExpression;
use serde::Serialize;
use serde_json::{Map, Value};

use super::retry::connect_with_retry;
use super::secrets::{credential_from_config, resolve_secret};
use super::Command;

/// Run one server-facing subcommand: connect, issue the action(s), print
/// the result as pretty JSON on stdout, close.
pub async fn run(config: &Config, command: Command) -> anyhow::Result<()> {
    // Catch input errors before touching the network.
    if let Command::Devices {
        filter: Some(ref filter),
    } = command
    {
        FilterExpression::parse(filter).context("invalid --filter")?;
    }
    let call_fields = match &command {
        Command::Call {
            fields: Some(raw), ..
        } => parse_fields(raw)?,
        _ => Map::new(),
    };

    let client = build_client(config)?;
    let backoff = ReconnectBackoff::from(&config.reconnect);
    connect_with_retry(&backoff, || client.connect())
        .await
        .with_context(|| format!("connecting to {}", config.server.url))?;

    let outcome = execute(&client, command, call_fields).await;
    if let Err(e) = client.close().await {
        tracing::debug!(error = %e, "close failed");
    }
    outcome
}

fn build_client(config: &Config) -> anyhow::Result<ActionClient> {
    let credential = credential_from_config(config)?;
    let client = ActionClientBuilder::new()
        .url(&config.server.url)
        .credential(credential)
        .channel_config(&config.channel)
        .build()?;
    Ok(client)
}

async fn execute(
    client: &ActionClient,
    command: Command,
    call_fields: Map<String, Value>,
) -> anyhow::Result<()> {
    match command {
        Command::Meshes => print_json(&actions::list_device_groups(client).await?),
        Command::CreateMesh { name, desc } => {
            print_json(&actions::create_device_group(client, &name, desc.as_deref()).await?)
        }
        Command::DeleteMesh { id } => print_json(&actions::remove_device_group(client, &id).await?),
        Command::Devices { filter } => {
            print_json(&actions::list_devices(client, filter.as_deref()).await?)
        }
        Command::Users => print_json(&actions::list_users(client).await?),
        Command::UserGroups => print_json(&actions::list_user_groups(client).await?),
        Command::AddUser {
            username,
            email,
            realname,
            password_env,
        } => {
            let secret = mc_domain::config::SecretRef {
                env: password_env,
                ..Default::default()
            };
            let prompt = format!("Password for new user {username}: ");
            let password = resolve_secret(&secret, Some(&prompt))?
                .context("no password given for the new user")?;
            let user = NewUser {
                username,
                password,
                email,
                realname,
            };
            print_json(&actions::add_user(client, &user).await?)
        }
        Command::RemoveUser { username } => {
            print_json(&actions::remove_user(client, &username).await?)
        }
        Command::RunCommand {
            node,
            command,
            run_as_user,
        } => print_json(&actions::run_command(client, &node, &command, run_as_user).await?),
        Command::ServerInfo => print_json(&actions::server_info(client).await?),
        Command::Call { action, .. } => print_json(&client.call(&action, call_fields).await?),
        Command::Config(_) | Command::Version => {
            anyhow::bail!("not a server command")
        }
    }
}

/// Parse `--fields` as a JSON object.
pub fn parse_fields(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("--fields is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--fields must be a JSON object, got {other}"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
