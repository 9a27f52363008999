//! Configuration module for the eof listener.
//!
//! The listen address comes from two positional arguments. Tuning options
//! may come from flags or an optional TOML file; flags take precedence.

use clap::Parser;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::connection::Limits;

/// Command-line arguments for the listener
#[derive(Parser, Debug)]
#[command(name = "eof-listener")]
#[command(version, about = "A TCP line listener that acknowledges eof", long_about = None)]
pub struct CliArgs {
    /// IPv4 address to bind to (e.g., 127.0.0.1)
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of worker threads (0 or unset = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum concurrent connections (unlimited when unset)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Close connections idle for this many seconds (never when unset)
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Close connections sending a longer line (unlimited when unset)
    #[arg(long, value_name = "BYTES")]
    pub max_line_length: Option<usize>,

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
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct ServerConfig {
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
}

/// Per-connection limits
#[derive(Debug, Deserialize, Default)]
pub struct ConnectionConfig {
    /// Idle timeout in seconds
    pub idle_timeout_secs: Option<u64>,
    /// Maximum line length in bytes
    pub max_line_length: Option<usize>,
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

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_connections: Option<usize>,
    pub idle_timeout: Option<Duration>,
    pub max_line_length: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(std::env::args_os())
    }

    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = CliArgs::try_parse_from(args)?;

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
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
            host: cli.host,
            port: cli.port,
            // 0 means one worker per CPU core
            workers: cli
                .workers
                .or(toml_config.server.workers)
                .filter(|&w| w > 0),
            max_connections: cli
                .max_connections
                .or(toml_config.server.max_connections),
            idle_timeout: cli
                .idle_timeout
                .or(toml_config.connection.idle_timeout_secs)
                .map(Duration::from_secs),
            max_line_length: cli
                .max_line_length
                .or(toml_config.connection.max_line_length),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.max_connections {
            Some(max) if max == 0 || max > Semaphore::MAX_PERMITS => {
                Err(ConfigError::InvalidMaxConnections(max))
            }
            _ => Ok(()),
        }
    }

    /// Address string as given on the command line.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Limits applied to every accepted connection.
    pub fn limits(&self) -> Limits {
        Limits {
            max_line_length: self.max_line_length,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Usage(#[from] clap::Error),
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
    #[error("max_connections must be between 1 and {max}, got {0}", max = Semaphore::MAX_PERMITS)]
    InvalidMaxConnections(usize),
}
