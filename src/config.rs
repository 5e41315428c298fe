//! Configuration for the client and server binaries.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use clap::{ArgAction, Parser, ValueEnum};
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments for the load client
#[derive(Parser, Debug)]
#[command(name = "arith-client")]
#[command(version)]
#[command(about = "Generates arithmetic requests over persistent connections", long_about = None)]
#[command(disable_help_flag = true)]
pub struct ClientArgs {
    /// Print help
    #[arg(long, action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server address (e.g., 127.0.0.1:8080)
    #[arg(short = 'h', long)]
    pub host: Option<String>,

    /// Number of connections, one worker each
    #[arg(short = 'n', long)]
    pub connections: Option<usize>,

    /// Interval between requests in milliseconds
    #[arg(short = 'i', long)]
    pub interval: Option<u64>,

    /// Where completed results go
    #[arg(long, value_enum)]
    pub sink: Option<SinkMode>,

    /// Output file for the file sink
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Connection establishment timeout in seconds
    #[arg(long)]
    pub dial_timeout: Option<u64>,

    /// Per-response read timeout in seconds (0 = wait forever)
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Maximum time to wait for workers and sink after shutdown, in seconds
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the arithmetic server
#[derive(Parser, Debug)]
#[command(name = "arith-server")]
#[command(version)]
#[command(about = "Answers arithmetic requests with their sum and product", long_about = None)]
pub struct ServerArgs {
    /// Address to listen on (e.g., 0.0.0.0:8080)
    pub listen: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for open connections on shutdown
    #[arg(long)]
    pub grace_period: Option<u64>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Result destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkMode {
    /// Append result lines to a file
    #[default]
    File,
    /// Log result lines
    Log,
    /// Write result lines to standard output
    Stdout,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub sink: SinkSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TomlConfig {
    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    /// Server address
    pub host: Option<String>,
    /// Number of connections
    #[serde(default = "default_connections")]
    pub connections: usize,
    /// Interval between requests in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: None,
            connections: default_connections(),
            interval_ms: default_interval_ms(),
            dial_timeout: default_dial_timeout(),
            read_timeout: default_read_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Result sink configuration
#[derive(Debug, Deserialize)]
pub struct SinkSection {
    #[serde(default)]
    pub mode: SinkMode,
    #[serde(default = "default_output")]
    pub path: PathBuf,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            mode: SinkMode::default(),
            path: default_output(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    pub listen: Option<String>,
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
    /// Idle connection timeout, off by default
    #[serde(default)]
    pub read_timeout: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: None,
            grace_period: default_grace_period(),
            read_timeout: 0,
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_connections() -> usize {
    1
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_dial_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_grace_period() -> u64 {
    10
}

fn default_max_connections() -> usize {
    10_000
}

fn default_output() -> PathBuf {
    PathBuf::from("output.txt")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Largest accepted timeout or interval, one year
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub connections: usize,
    pub interval: Duration,
    pub sink: SinkMode,
    pub output: PathBuf,
    pub dial_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from the process arguments and optional TOML file
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ClientArgs::parse())
    }

    pub fn from_args(cli: ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = TomlConfig::load(cli.config.as_deref())?;
        let client = toml_config.client;

        let host = cli
            .host
            .or(client.host)
            .ok_or(ConfigError::MissingAddress("server address (-h)"))?;
        let connections = cli.connections.unwrap_or(client.connections);
        if connections == 0 {
            return Err(ConfigError::InvalidConnections);
        }
        let interval_ms = cli.interval.unwrap_or(client.interval_ms);
        if interval_ms == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        let interval = Duration::from_millis(interval_ms);
        check_range("interval", interval)?;

        let dial_timeout = secs("dial timeout", cli.dial_timeout.unwrap_or(client.dial_timeout))?;
        let read_timeout = secs("read timeout", cli.read_timeout.unwrap_or(client.read_timeout))?;
        let shutdown_timeout = secs(
            "shutdown timeout",
            cli.shutdown_timeout.unwrap_or(client.shutdown_timeout),
        )?;

        Ok(ClientConfig {
            server_addr: resolve(&host)?,
            connections,
            interval,
            sink: cli.sink.unwrap_or(toml_config.sink.mode),
            output: cli.output.unwrap_or(toml_config.sink.path),
            dial_timeout,
            read_timeout: (!read_timeout.is_zero()).then_some(read_timeout),
            shutdown_timeout,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub grace_period: Duration,
    pub read_timeout: Option<Duration>,
    pub max_connections: usize,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from the process arguments and optional TOML file
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(cli: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = TomlConfig::load(cli.config.as_deref())?;
        let server = toml_config.server;

        let listen = cli
            .listen
            .or(server.listen)
            .ok_or(ConfigError::MissingAddress("listen address"))?;

        let grace_period = secs("grace period", cli.grace_period.unwrap_or(server.grace_period))?;
        let read_timeout = secs("read timeout", cli.read_timeout.unwrap_or(server.read_timeout))?;

        Ok(ServerConfig {
            listen: resolve(&listen)?,
            grace_period,
            read_timeout: (!read_timeout.is_zero()).then_some(read_timeout),
            max_connections: cli
                .max_connections
                .unwrap_or(server.max_connections)
                .max(1),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

fn secs(name: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    let duration = Duration::from_secs(secs);
    check_range(name, duration)?;
    Ok(duration)
}

fn check_range(name: &'static str, duration: Duration) -> Result<(), ConfigError> {
    if duration.as_secs() > MAX_DURATION_SECS {
        return Err(ConfigError::DurationTooLong(name, MAX_DURATION_SECS));
    }
    Ok(())
}

fn resolve(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.to_socket_addrs()
        .map_err(|e| ConfigError::InvalidAddress(addr.to_string(), e.to_string()))?
        .next()
        .ok_or_else(|| ConfigError::InvalidAddress(addr.to_string(), "no addresses found".into()))
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Missing {0}")]
    MissingAddress(&'static str),
    #[error("Invalid address '{0}': {1}")]
    InvalidAddress(String, String),
    #[error("Connection count must be greater than 0")]
    InvalidConnections,
    #[error("Interval must be greater than 0")]
    InvalidInterval,
    #[error("{0} must not exceed {1} seconds")]
    DurationTooLong(&'static str, u64),
}
