//! Uniclip entry point: the `hub` and `daemon` subcommands.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uniclip::cli::{Cli, CliHandler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let handler = CliHandler::new(cli.config.clone())?;

    let log_level = if cli.verbose {
        "debug"
    } else {
        &handler.config().log_level
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("uniclip={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("uniclip v{}", env!("CARGO_PKG_VERSION"));

    handler.handle_command(cli.command).await?;

    Ok(())
}
