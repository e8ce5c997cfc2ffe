use clap::Parser;
use tracing_subscriber::EnvFilter;

use mc_cli::cli::{commands, config, load_config, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing();

    match cli.command {
        Command::Version => {
            println!("meshctl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = load_config(cli.config.as_deref())?;
            let valid = config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _config_path) = load_config(cli.config.as_deref())?;
            config::show(&config)
        }
        command => {
            let (config, _config_path) = load_config(cli.config.as_deref())?;
            commands::run(&config, command).await
        }
    }
}

/// Initialize compact stderr-only tracing.
///
/// Defaults to `warn` level so diagnostic output does not pollute the JSON
/// printed on stdout. Set `RUST_LOG=mc_client=debug` to see every call.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
