//! Command-line interface for uniclip.

use crate::clipboard::ArboardClipboard;
use crate::config::Config;
use crate::daemon;
use crate::guard::AccessGuard;
use crate::hub::Hub;
use crate::store::UniversalClipboard;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Shared universal clipboard
#[derive(Parser)]
#[command(name = "uniclip", version, about)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the relay hub
    Hub {
        /// Listen address, overrides the config file
        #[arg(long)]
        listen: Option<String>,
    },

    /// Run the per-machine sync daemon
    Daemon {
        /// Hub WebSocket URL, overrides the config file
        #[arg(long)]
        hub: Option<String>,

        /// Identity to announce, overrides the config file
        #[arg(long)]
        id: Option<String>,
    },
}

/// Executes parsed commands against a loaded configuration.
pub struct CliHandler {
    config: Config,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Config::load(config_path.as_deref())?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn handle_command(mut self, command: Command) -> Result<()> {
        match command {
            Command::Hub { listen } => {
                if let Some(listen) = listen {
                    self.config.hub.listen_addr = listen;
                }
                self.run_hub().await
            }
            Command::Daemon { hub, id } => {
                if let Some(hub) = hub {
                    self.config.daemon.hub_url = hub;
                }
                if let Some(id) = id {
                    self.config.daemon.identity = id;
                }
                self.run_daemon().await
            }
        }
    }

    async fn run_hub(self) -> Result<()> {
        let store = Arc::new(UniversalClipboard::new(self.config.hub_data_dir()));
        let guard = Arc::new(AccessGuard::new([(
            self.config.auth.user.as_str(),
            self.config.auth.pass.as_str(),
        )]));
        let hub = Arc::new(Hub::new(store, guard));

        let shutdown = shutdown_signal();
        hub.serve_addr(&self.config.hub.listen_addr, shutdown)
            .await?;
        Ok(())
    }

    async fn run_daemon(self) -> Result<()> {
        let clipboard = Arc::new(ArboardClipboard::new(Duration::from_millis(
            self.config.daemon.poll_ms,
        )));

        let shutdown = shutdown_signal();
        daemon::run_daemon(&self.config, clipboard, shutdown).await?;
        Ok(())
    }
}

/// Watch channel flipped on ctrl-c.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = tx.send(true);
        }
        // keep the sender alive so receivers stay subscribed
        std::future::pending::<()>().await;
    });
    rx
}
