//! # TCP Relay - Main Entry Point
//!
//! A small relay server built on `server_socket`. Every chunk a client sends is
//! echoed back to it, broadcast to all clients, or only logged, depending on
//! the configured mode.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (relay.toml, created if missing)
//! tcp_relay
//!
//! # Broadcast chat-style relay on port 9000
//! tcp_relay --port 9000 --mode broadcast
//!
//! # JSON logging for production
//! tcp_relay --config production.toml --json-logs
//! ```
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM close the listener and all clients. A second signal exits
//! immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod relay;
mod signals;

use app::Application;
pub use cli::CliArgs;

/// Runs the relay application.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging needs the configured level before anything else runs.
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    config.apply_cli_overrides(&args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{AppConfig, LoggingSettings, RelayMode, ServerSettings};
