//! Configuration management for the relay.
//!
//! Settings are layered: the TOML file, then the `PORT` environment variable,
//! then command-line flags. The result converts into the core
//! [`ServerConfig`].

use crate::cli::CliArgs;
use anyhow::{bail, Context, Result};
use relay_server::{DeliveryPolicy, DispatcherConfig, ServerConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Environment variable overriding the listener port.
pub const PORT_ENV: &str = "PORT";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Relay settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener, connection and fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the listener to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Request path upgraded to a WebSocket
    #[serde(default = "default_path")]
    pub path: String,
    /// Maximum number of concurrent client connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds (0 = disabled)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Per-write timeout in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    /// Seconds connections get to drain on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
    /// Recipient selection: "echo_to_all" or "exclude_origin"
    #[serde(default)]
    pub delivery: DeliveryPolicy,
    /// Writes in flight per dispatched frame
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
    /// Prefix relayed text with "User <id>: "
    #[serde(default)]
    pub label_sender: bool,
}

fn default_path() -> String {
    "/echo".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_max_concurrent_writes() -> usize {
    64
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            path: default_path(),
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            write_timeout: default_write_timeout(),
            shutdown_grace: default_shutdown_grace(),
            delivery: DeliveryPolicy::default(),
            max_concurrent_writes: default_max_concurrent_writes(),
            label_sender: false,
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
    /// Append logs to this file instead of stdout
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_path: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, the default configuration is written to
    /// `path` and returned.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies the `PORT` environment variable, if set.
    pub fn apply_env(&mut self) -> Result<()> {
        match std::env::var(PORT_ENV) {
            Ok(port) => self.apply_port_override(&port),
            Err(_) => Ok(()),
        }
    }

    /// Replaces the port of `server.bind_address`, keeping its host.
    pub fn apply_port_override(&mut self, port: &str) -> Result<()> {
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("Invalid port: {port:?}"))?;
        let mut addr = self.bind_address()?;
        addr.set_port(port);
        self.server.bind_address = addr.to_string();
        Ok(())
    }

    /// Applies command-line overrides on top of file and environment values.
    pub fn apply_cli(&mut self, args: &CliArgs) -> Result<()> {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(port) = args.port {
            self.apply_port_override(&port.to_string())?;
        }
        if let Some(path) = &args.path {
            self.server.path = path.clone();
        }
        if args.exclude_sender {
            self.server.delivery = DeliveryPolicy::ExcludeOrigin;
        }
        if args.label_sender {
            self.server.label_sender = true;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(file) = &args.log_file {
            self.logging.file_path = Some(file.clone());
        }
        Ok(())
    }

    fn bind_address(&self) -> Result<SocketAddr> {
        self.server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_address))
    }

    /// Checks the configuration for values the relay can't run with.
    pub fn validate(&self) -> Result<()> {
        self.bind_address()?;

        if !self.server.path.starts_with('/') {
            bail!("Path must start with '/': {}", self.server.path);
        }
        if self.server.write_timeout == 0 {
            bail!("write_timeout must be greater than zero");
        }
        if self.server.max_concurrent_writes == 0 {
            bail!("max_concurrent_writes must be greater than zero");
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                VALID_LOG_LEVELS
            );
        }

        Ok(())
    }

    /// Converts to the core relay configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        Ok(ServerConfig {
            bind_address: self.bind_address()?,
            path: self.server.path.clone(),
            max_connections: self.server.max_connections,
            idle_timeout: self.server.idle_timeout,
            write_timeout: self.server.write_timeout,
            shutdown_grace: self.server.shutdown_grace,
            dispatcher: DispatcherConfig {
                policy: self.server.delivery,
                max_concurrent_writes: self.server.max_concurrent_writes,
                label_sender: self.server.label_sender,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
        assert_eq!(config.server.path, "/echo");
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.server.delivery, DeliveryPolicy::EchoToAll);
        assert!(!config.server.label_sender);

        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.logging.file_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relay.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");

        // The default file is written and loads back the same
        assert!(path.exists());
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.server.path, config.server.path);
        assert_eq!(reloaded.server.write_timeout, config.server.write_timeout);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:3000"
path = "/chat"
max_connections = 20
idle_timeout = 0
delivery = "exclude_origin"
label_sender = true

[logging]
level = "debug"
json_format = true
file_path = "/tmp/relay.log"
"#;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.server.path, "/chat");
        assert_eq!(config.server.max_connections, 20);
        assert_eq!(config.server.idle_timeout, 0);
        assert_eq!(config.server.delivery, DeliveryPolicy::ExcludeOrigin);
        assert!(config.server.label_sender);
        // Unlisted fields fall back to defaults
        assert_eq!(config.server.write_timeout, 10);
        assert_eq!(config.server.max_concurrent_writes, 64);

        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert_eq!(config.logging.file_path.as_deref(), Some("/tmp/relay.log"));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[server\nbind_address = 1")
            .await
            .unwrap();

        assert!(AppConfig::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_port_override_keeps_host() {
        let mut config = AppConfig::default();
        config.server.bind_address = "0.0.0.0:8080".to_string();

        config.apply_port_override("9001").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:9001");

        assert!(config.apply_port_override("99999").is_err());
        assert!(config.apply_port_override("http").is_err());
        assert_eq!(config.server.bind_address, "0.0.0.0:9001");
    }

    #[test]
    fn test_cli_overrides_take_precedence() {
        let mut config = AppConfig::default();
        config.apply_port_override("7000").unwrap();

        let args = CliArgs {
            bind_address: Some("0.0.0.0:8000".to_string()),
            port: Some(8100),
            path: Some("/ws".to_string()),
            exclude_sender: true,
            label_sender: true,
            log_level: Some("warn".to_string()),
            json_logs: true,
            log_file: Some("out.log".to_string()),
            ..Default::default()
        };
        config.apply_cli(&args).unwrap();

        assert_eq!(config.server.bind_address, "0.0.0.0:8100");
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.server.delivery, DeliveryPolicy::ExcludeOrigin);
        assert!(config.server.label_sender);
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
        assert_eq!(config.logging.file_path.as_deref(), Some("out.log"));
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.path = "echo".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.write_timeout = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.max_concurrent_writes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        for level in VALID_LOG_LEVELS {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_to_server_config_conversion() {
        let mut config = AppConfig::default();
        config.server.bind_address = "10.0.0.1:4000".to_string();
        config.server.delivery = DeliveryPolicy::ExcludeOrigin;
        config.server.max_concurrent_writes = 8;
        config.server.idle_timeout = 0;

        let server_config = config.to_server_config().unwrap();
        assert_eq!(server_config.bind_address.to_string(), "10.0.0.1:4000");
        assert_eq!(server_config.path, "/echo");
        assert_eq!(server_config.idle_timeout(), None);
        assert_eq!(server_config.dispatcher.policy, DeliveryPolicy::ExcludeOrigin);
        assert_eq!(server_config.dispatcher.max_concurrent_writes, 8);
    }
}
