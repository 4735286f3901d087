//! Configuration loading and management.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use tmi_proto::normalize_room;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Chat account credentials.
    pub account: AccountConfig,
    /// Chat server endpoint.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Rooms to join on startup, in addition to the home room and any
    /// rooms restored from the database.
    #[serde(default)]
    pub rooms: Vec<String>,
}

/// Chat account configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Login name of the bot account.
    pub username: String,
    /// OAuth token, in the `oauth:...` form the server expects as password.
    pub password: String,
    /// User with unconditional access to every permission.
    pub operator: String,
}

/// Chat server endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Hostname to connect to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to connect to.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Minimum delay between outgoing lines, in milliseconds.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_host() -> String {
    "irc.twitch.tv".to_owned()
}

fn default_port() -> u16 {
    6667
}

fn default_send_delay_ms() -> u64 {
    2000
}

fn default_db_path() -> String {
    "kappabot.db".to_owned()
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            send_delay_ms: default_send_delay_ms(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_db_path(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// The bot's home room: its own channel, which can never be left.
    pub fn home_room(&self) -> String {
        normalize_room(&self.account.username)
    }

    /// Inter-message send delay.
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.server.send_delay_ms)
    }
}
