//! Dockhand - remote project sessions in isolated containers
//!
#![doc = "Main entry point for the Dockhand server and its helper commands."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dockhand::cli::{Cli, Commands};
use dockhand::commands;
use dockhand::config::{Config, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration; logging settings come from it
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    init_tracing(&config.logging);

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!("Starting server");
            commands::serve::run_serve(config).await?;
            Ok(())
        }
        Commands::Classify { command, json } => {
            commands::classify::run_classify(&command, json)?;
            Ok(())
        }
        Commands::Projects { json } => {
            tracing::debug!("Listing projects");
            commands::projects::run_projects(&config, json).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins; otherwise `logging.level` applies to this crate.
fn init_tracing(logging: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dockhand={}", logging.level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.json_format {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
