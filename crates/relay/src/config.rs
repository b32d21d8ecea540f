//! Configuration management for the relay server.
//!
//! This module handles loading, validation, and conversion of relay
//! configuration from TOML files and command-line arguments.

use crate::cli::CliArgs;
use serde::{Deserialize, Serialize};
use server_socket::config::{MAX_RECEIVE_BUFFER, MIN_RECEIVE_BUFFER};
use server_socket::SocketConfig;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// What the relay does with bytes it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Send each chunk back to the client it came from
    #[default]
    Echo,
    /// Send each chunk to every connected client, including the sender
    Broadcast,
    /// Only log received chunks
    Silent,
}

impl RelayMode {
    pub const VARIANTS: [&'static str; 3] = ["echo", "broadcast", "silent"];
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "broadcast" => Ok(Self::Broadcast),
            "silent" => Ok(Self::Silent),
            other => Err(format!(
                "Invalid relay mode: {other}. Must be one of: {:?}",
                Self::VARIANTS
            )),
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Echo => "echo",
            Self::Broadcast => "broadcast",
            Self::Silent => "silent",
        };
        f.write_str(name)
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and relay settings
    pub server: ServerSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener and relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Port to listen on, on all IPv4 interfaces (0 picks an ephemeral port)
    pub port: u16,
    /// What to do with received bytes
    #[serde(default)]
    pub mode: RelayMode,
    /// Fixed per-client receive buffer; unset uses the socket's own size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_buffer_size: Option<usize>,
    /// Whether to set TCP_NODELAY on accepted sockets
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Seconds between periodic statistics reports
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_nodelay() -> bool {
    true
}

fn default_backlog() -> u32 {
    1024
}

fn default_stats_interval() -> u64 {
    60
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 7777,
            mode: RelayMode::default(),
            receive_buffer_size: None,
            nodelay: default_nodelay(),
            backlog: default_backlog(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written to
    /// `path` and the defaults are returned.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file configuration.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(mode) = args.mode {
            self.server.mode = mode;
        }

        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }

        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Socket tuning for the relay's `ServerSocket`.
    pub fn to_socket_config(&self) -> SocketConfig {
        SocketConfig {
            receive_buffer_size: self.server.receive_buffer_size,
            nodelay: self.server.nodelay,
            backlog: self.server.backlog,
        }
    }

    /// Validates the configuration for correctness.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if let Some(size) = self.server.receive_buffer_size {
            if !(MIN_RECEIVE_BUFFER..=MAX_RECEIVE_BUFFER).contains(&size) {
                return Err(format!(
                    "server.receive_buffer_size must be between {MIN_RECEIVE_BUFFER} and {MAX_RECEIVE_BUFFER}, got {size}"
                ));
            }
        }

        if self.server.backlog == 0 {
            return Err("server.backlog must be greater than 0".to_string());
        }

        if self.server.stats_interval_secs == 0 {
            return Err("server.stats_interval_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}
