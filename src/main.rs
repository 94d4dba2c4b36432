use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use a3s_relay::RelayConfig;

#[derive(Parser)]
#[command(name = "a3s-relay", version, about = "Two-peer session pairing and message relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Host address to bind to
        #[arg(long, env = "A3S_RELAY_HOST")]
        host: Option<String>,

        /// Port to listen on (falls back to $PORT, then the config file)
        #[arg(long)]
        port: Option<u16>,

        /// Path to a TOML configuration file
        #[arg(long, env = "A3S_RELAY_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Path to a TOML configuration file
        #[arg(long, env = "A3S_RELAY_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, config } => {
            let mut config = RelayConfig::load(config.as_deref())?;

            // Override config with CLI arguments
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }

            a3s_relay::server::start(config).await?;
        }
        Commands::Config { config } => {
            let config = RelayConfig::load(config.as_deref())?;
            config.validate()?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
