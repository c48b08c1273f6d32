//! Relay application entry point.
//!
//! Loads configuration, sets up logging, runs the relay server and shuts it
//! down gracefully on SIGINT/SIGTERM.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{Context, Result};
use cli::CliArgs;
use config::AppConfig;
use relay_server::RelayServer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Interval between health reports.
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Main application struct.
pub struct Application {
    config: AppConfig,
    server: Arc<RelayServer>,
}

impl Application {
    /// Builds the application: file, then `PORT`, then CLI overrides.
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_env()?;
        config.apply_cli(&args)?;
        config
            .validate()
            .context("Configuration validation failed")?;

        logging::setup_logging(&config.logging)?;

        let server = Arc::new(RelayServer::new(config.to_server_config()?));

        info!(
            "🚀 Relay v{} | Config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display()
        );

        Ok(Self { config, server })
    }

    /// Runs the relay until a shutdown signal arrives or the server fails.
    pub async fn run(self) -> Result<()> {
        info!("📋 Configuration Summary:");
        info!(
            "  🌐 Endpoint: ws://{}{}",
            self.config.server.bind_address, self.config.server.path
        );
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  📨 Delivery: {:?}", self.config.server.delivery);
        info!("  ⏱️ Idle timeout: {}s", self.config.server.idle_timeout);

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.start().await })
        };

        let monitoring_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(MONITOR_INTERVAL);
                interval.tick().await;
                let mut last_messages = 0u64;

                loop {
                    interval.tick().await;

                    let connections = server.registry().len().await;
                    let stats = server.dispatcher().stats();
                    let messages_this_period = stats.messages - last_messages;
                    last_messages = stats.messages;

                    info!(
                        "📊 Relay Health - {} connections | {} messages/min | {} deliveries | {} write failures",
                        connections, messages_this_period, stats.deliveries, stats.write_failures
                    );
                }
            })
        };

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let outcome = tokio::select! {
            result = &mut server_handle => Err(result),
            signal = signals::wait_for_shutdown_signal() => Ok(signal?),
        };

        let result = match outcome {
            // The server stopped on its own: only a failed bind does that
            Err(result) => result,
            Ok(signal) => {
                info!("📡 Received {}, initiating graceful shutdown...", signal);
                self.server.shutdown();
                server_handle.await
            }
        };
        monitoring_handle.abort();

        result.context("Server task panicked")??;

        let stats = self.server.dispatcher().stats();
        info!("✅ Relay shutdown complete");
        info!("  - Messages relayed: {}", stats.messages);
        info!("  - Deliveries: {}", stats.deliveries);
        info!("  - Write failures: {}", stats.write_failures);

        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Relay error: {:#}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start relay: {:#}", e);
            std::process::exit(1);
        }
    }
}
