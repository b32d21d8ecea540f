//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that orchestrates relay
//! startup, monitoring, and shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    relay,
    signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent},
};
use server_socket::{
    ClientConnectedEvent, ClientDisconnectedEvent, EventSystem, ReceiveEvent, ServerDisconnectedEvent,
    ServerSocket,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Main application struct.
///
/// Owns the merged configuration, the server socket and the relay task, and
/// drives them from startup to graceful shutdown.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Server socket instance
    server: Arc<ServerSocket>,
    /// Task forwarding received bytes, absent in silent mode
    relay_task: Option<JoinHandle<()>>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Create the server socket and register event handlers
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli_overrides(&args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let server = Arc::new(ServerSocket::with_config(config.to_socket_config()));
        register_logging_handlers(&server.events());
        let relay_task = relay::attach(&server, config.server.mode);

        Ok(Self {
            config,
            server,
            relay_task,
        })
    }

    /// Runs the relay until a shutdown signal arrives.
    ///
    /// A second signal during shutdown exits the process immediately.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting TCP relay");
        self.log_configuration_summary();

        let local_addr = self.server.listen(self.config.server.port).await?;

        let event_system = self.server.events();
        let monitoring_handle = {
            let server = self.server.clone();
            let event_system = event_system.clone();
            let period = tokio::time::Duration::from_secs(self.config.server.stats_interval_secs);

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                let mut last_events_emitted = 0u64;

                loop {
                    interval.tick().await;

                    let stats = event_system.stats();
                    let events_this_period = stats.events_emitted - last_events_emitted;
                    last_events_emitted = stats.events_emitted;

                    info!(
                        "📊 Relay Health - {} client(s) | {} events this period | {} handler failures",
                        server.connected_clients(),
                        events_this_period,
                        stats.handler_failures
                    );
                }
            })
        };

        info!("✅ TCP relay is now running!");
        info!("🎮 Ready to accept connections on {}", local_addr);
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        wait_for_shutdown_signal().await?;

        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal_silent().await {
                error!("Failed to set up forced shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown signal received again, exiting immediately");
            std::process::exit(1);
        });

        monitoring_handle.abort();

        info!("🧹 Closing listener and all clients...");
        self.server.disconnect().await;

        if let Some(relay_task) = self.relay_task {
            relay_task.abort();
            if let Err(e) = relay_task.await {
                if !e.is_cancelled() {
                    error!("❌ Relay task failed: {}", e);
                }
            }
        }

        log_final_statistics(&event_system);

        info!("✅ TCP relay shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        let server = &self.config.server;
        info!("📋 Configuration Summary:");
        info!("  🌐 Port: {}", server.port);
        info!("  🔁 Mode: {}", server.mode);
        match server.receive_buffer_size {
            Some(size) => info!("  📦 Receive buffer: {} bytes", size),
            None => info!("  📦 Receive buffer: socket default"),
        }
        info!("  ⚡ TCP_NODELAY: {} | Backlog: {}", server.nodelay, server.backlog);
    }
}

/// Registers handlers that log every lifecycle event.
fn register_logging_handlers(events: &EventSystem) {
    events.on_client_connect(|event: ClientConnectedEvent| {
        info!("👋 Client {} connected from {}", event.client_id, event.remote_addr);
        Ok(())
    });

    events.on_receive(|event: ReceiveEvent| {
        debug!("📨 {} bytes from client {}", event.bytes.len(), event.client_id);
        Ok(())
    });

    events.on_client_disconnect(|event: ClientDisconnectedEvent| {
        info!("👋 Client {} disconnected: {:?}", event.client_id, event.reason);
        Ok(())
    });

    events.on_disconnect(|event: ServerDisconnectedEvent| {
        info!(
            "🛑 Listener on {} closed ({} client(s) dropped)",
            event.local_addr, event.closed_clients
        );
        Ok(())
    });
}

/// Logs final statistics during shutdown.
fn log_final_statistics(event_system: &EventSystem) {
    let stats = event_system.stats();
    info!("📊 Final Statistics:");
    info!("  - Total events emitted: {}", stats.events_emitted);
    info!("  - Handlers registered: {}", stats.total_handlers);
    info!("  - Handler failures: {}", stats.handler_failures);
}
