//! Configuration module for the mux-chat server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the chat server
#[derive(Parser, Debug, Default)]
#[command(name = "mux-chat")]
#[command(author = "mux-chat authors")]
#[command(version = "0.1.0")]
#[command(about = "A readiness-driven line chat server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:9034)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Maximum readiness events handled per wait
    #[arg(long = "events")]
    pub events_capacity: Option<usize>,

    /// Starting connection registry capacity (doubles when full)
    #[arg(long)]
    pub initial_capacity: Option<usize>,

    /// Per-read scratch buffer size in bytes
    #[arg(long = "read-buffer")]
    pub read_buffer_size: Option<usize>,

    /// Maximum display name length in characters
    #[arg(long)]
    pub name_max_len: Option<usize>,

    /// Unwritten output allowed per connection, in bytes
    #[arg(long)]
    pub max_pending_bytes: Option<usize>,

    /// Tell remaining clients when someone leaves (`--announce-departures false` turns it off)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub announce_departures: Option<bool>,

    /// Close a client whose delivery fails (`--evict-on-send-failure false` turns it off)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub evict_on_send_failure: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and event loop configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Readiness events per wait
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Connection registry configuration
#[derive(Debug, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
        }
    }
}

/// Per-session protocol configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Scratch buffer bound for a single read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Display name bound, in characters
    #[serde(default = "default_name_max_len")]
    pub name_max_len: usize,
    /// Unwritten output allowed per connection
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,
    #[serde(default)]
    pub announce_departures: bool,
    #[serde(default)]
    pub evict_on_send_failure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            name_max_len: default_name_max_len(),
            max_pending_bytes: default_max_pending_bytes(),
            announce_departures: false,
            evict_on_send_failure: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:9034".to_string()
}

fn default_backlog() -> i32 {
    10
}

fn default_events_capacity() -> usize {
    1024
}

fn default_initial_capacity() -> usize {
    5
}

fn default_read_buffer_size() -> usize {
    256
}

fn default_name_max_len() -> usize {
    31
}

fn default_max_pending_bytes() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: String,
    pub backlog: i32,
    pub events_capacity: usize,
    pub initial_capacity: usize,
    pub read_buffer_size: usize,
    pub name_max_len: usize,
    pub max_pending_bytes: usize,
    pub announce_departures: bool,
    pub evict_on_send_failure: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            events_capacity: cli
                .events_capacity
                .unwrap_or(toml_config.server.events_capacity),
            initial_capacity: cli
                .initial_capacity
                .unwrap_or(toml_config.registry.initial_capacity),
            read_buffer_size: cli
                .read_buffer_size
                .unwrap_or(toml_config.session.read_buffer_size),
            name_max_len: cli
                .name_max_len
                .unwrap_or(toml_config.session.name_max_len),
            max_pending_bytes: cli
                .max_pending_bytes
                .unwrap_or(toml_config.session.max_pending_bytes),
            announce_departures: cli
                .announce_departures
                .unwrap_or(toml_config.session.announce_departures),
            evict_on_send_failure: cli
                .evict_on_send_failure
                .unwrap_or(toml_config.session.evict_on_send_failure),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Reject values the runtime cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("server.events_capacity", self.events_capacity),
            ("registry.initial_capacity", self.initial_capacity),
            ("session.read_buffer_size", self.read_buffer_size),
            ("session.name_max_len", self.name_max_len),
            ("session.max_pending_bytes", self.max_pending_bytes),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be at least 1",
                });
            }
        }
        if self.backlog < 1 {
            return Err(ConfigError::Invalid {
                key: "server.backlog",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid {
        key: &'static str,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:9034");
        assert_eq!(config.server.backlog, 10);
        assert_eq!(config.registry.initial_capacity, 5);
        assert_eq!(config.session.read_buffer_size, 256);
        assert_eq!(config.session.name_max_len, 31);
        assert_eq!(config.session.max_pending_bytes, 1024 * 1024);
        assert!(!config.session.announce_departures);
        assert!(!config.session.evict_on_send_failure);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:7000"
            backlog = 64

            [registry]
            initial_capacity = 8

            [session]
            read_buffer_size = 512
            announce_departures = true

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:7000");
        assert_eq!(config.server.backlog, 64);
        assert_eq!(config.server.events_capacity, 1024);
        assert_eq!(config.registry.initial_capacity, 8);
        assert_eq!(config.session.read_buffer_size, 512);
        assert_eq!(config.session.name_max_len, 31);
        assert!(config.session.announce_departures);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:7000"
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        let cli = CliArgs {
            listen: Some("127.0.0.1:8000".to_string()),
            read_buffer_size: Some(64),
            evict_on_send_failure: Some(true),
            ..CliArgs::default()
        };

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.listen, "127.0.0.1:8000");
        assert_eq!(config.read_buffer_size, 64);
        assert!(config.evict_on_send_failure);
        // No --log-level given, so the file wins
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_explicit_flags_override_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [session]
            announce_departures = true
            evict_on_send_failure = true
            max_pending_bytes = 4096
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        let cli = CliArgs::parse_from([
            "mux-chat",
            "--log-level",
            "info",
            "--announce-departures",
            "false",
            "--evict-on-send-failure=false",
        ]);

        let config = Config::merge(cli, toml_config);
        assert_eq!(config.log_level, "info");
        assert!(!config.announce_departures);
        assert!(!config.evict_on_send_failure);
        assert_eq!(config.max_pending_bytes, 4096);
    }

    #[test]
    fn test_bare_flag_switches_on() {
        let cli = CliArgs::parse_from(["mux-chat", "--announce-departures"]);
        assert_eq!(cli.announce_departures, Some(true));
        assert_eq!(cli.evict_on_send_failure, None);

        let config = Config::merge(cli, TomlConfig::default());
        assert!(config.announce_departures);
        assert!(!config.evict_on_send_failure);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = Config {
            read_buffer_size: 0,
            ..Config::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "session.read_buffer_size"),
            other => panic!("unexpected: {:?}", other),
        }

        assert!(Config::default().validate().is_ok());
    }
}
