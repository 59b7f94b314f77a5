use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keycard_hardware::AnyClock;
use keycard_issuer::config::{Config, load_config, load_default_config};
use keycard_issuer::{IssuanceOrchestrator, IssuanceService, IssueRequest, backend};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming the configuration file
const CONFIG_ENV: &str = "KEYCARD_CONFIG";

/// Kiosk key card issuer.
#[derive(Debug, Parser)]
#[command(name = "keycard", version, about)]
struct Cli {
    /// Configuration file. Falls back to $KEYCARD_CONFIG, then built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encode and dispense one card.
    Issue {
        /// Card payload as hex.
        #[arg(long)]
        card_data: Option<String>,

        /// Legacy name for the card payload.
        #[arg(long)]
        lock_data: Option<String>,

        #[arg(long)]
        hotel_info: Option<String>,
    },
    /// Open both devices, read the dispenser status, and close them.
    Health,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(version = VERSION, "Starting keycard");
    let config = resolve_config(cli.config)?;
    info!(
        backend = ?config.sdk.backend,
        dispenser_port = %config.dispenser.port,
        encoder_port = %config.encoder.port,
        model = %config.encoder.model,
        "Configuration loaded"
    );

    let links = backend::open_links(&config).context("Failed to prepare hardware drivers")?;
    let orchestrator = IssuanceOrchestrator::from_config(&config, links, AnyClock::default())
        .context("Invalid encoding configuration")?;
    let service = IssuanceService::new(orchestrator);

    let output = match cli.command {
        Command::Issue {
            card_data,
            lock_data,
            hotel_info,
        } => {
            let request = IssueRequest {
                card_data,
                lock_data,
                hotel_info,
            };
            let response = service.issue(&request).await;
            let success = response.is_success();
            println!("{}", serde_json::to_string_pretty(&response)?);
            success
        }
        Command::Health => {
            let report = service.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            report.healthy
        }
    };

    if !output {
        std::process::exit(2);
    }
    Ok(())
}

fn resolve_config(path: Option<PathBuf>) -> Result<Config> {
    let path = path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(&path)
                .with_context(|| format!("Failed to load config from {:?}", path))
        }
        None => load_default_config().context("Failed to load default configuration"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["keycard", "health"])]
    #[case(&["keycard", "--config", "kiosk.toml", "health"])]
    #[case(&["keycard", "issue", "--card-data", "00FF"])]
    #[case(&["keycard", "issue", "--lock-data", "00FF", "--hotel-info", "h1"])]
    fn test_parses(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_ok());
    }

    #[test]
    fn test_issue_arguments() {
        let cli = Cli::try_parse_from(["keycard", "issue", "--card-data", "ABCD"]).unwrap();
        match cli.command {
            Command::Issue { card_data, .. } => assert_eq!(card_data.as_deref(), Some("ABCD")),
            Command::Health => panic!("expected issue"),
        }
    }

    #[test]
    fn test_missing_config_file() {
        let err = resolve_config(Some(PathBuf::from("/nonexistent/keycard.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("Configuration file not found"));
    }
}
