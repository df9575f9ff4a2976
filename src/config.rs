//! # Configuration
//!
//! Settings for servers, clients, connections and negotiation.
//!
//! ## Sources
//! - TOML files via [`NetworkConfig::from_file`] or strings via [`NetworkConfig::from_toml`]
//! - Environment variables prefixed `PROTOFORGE_` via [`NetworkConfig::from_env`]
//! - Defaults with targeted overrides via [`NetworkConfig::default_with_overrides`]
//!
//! Durations are written as milliseconds, log levels as lowercase names.
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:7000"
//! max_connections = 512
//!
//! [connection]
//! keep_in_order = true
//! max_frame_size = 1048576
//! inflight_limit = 16
//!
//! [negotiation]
//! timeout = 5000
//! ```

use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Largest frame a stream transport accepts by default (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Delivered-but-unreleased messages a transport allows before it stops reading.
pub const DEFAULT_INFLIGHT_LIMIT: usize = 32;

const ENV_PREFIX: &str = "PROTOFORGE_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    /// Per-connection delivery and framing
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub negotiation: NegotiationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `PROTOFORGE_*` variables. Unparseable values
    /// are reported rather than ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(addr) = var("SERVER_ADDRESS") {
            config.server.address = addr;
        }
        if let Some(value) = var("MAX_CONNECTIONS") {
            config.server.max_connections = parse_env("MAX_CONNECTIONS", &value)?;
        }
        if let Some(addr) = var("CLIENT_ADDRESS") {
            config.client.address = addr;
        }
        if let Some(value) = var("CONNECTION_TIMEOUT_MS") {
            config.client.connection_timeout =
                Duration::from_millis(parse_env("CONNECTION_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = var("KEEP_IN_ORDER") {
            config.connection.keep_in_order = parse_env("KEEP_IN_ORDER", &value)?;
        }
        if let Some(value) = var("MAX_FRAME_SIZE") {
            config.connection.max_frame_size = parse_env("MAX_FRAME_SIZE", &value)?;
        }
        if let Some(value) = var("INFLIGHT_LIMIT") {
            config.connection.inflight_limit = parse_env("INFLIGHT_LIMIT", &value)?;
        }
        if let Some(value) = var("NEGOTIATION_TIMEOUT_MS") {
            config.negotiation.timeout =
                Duration::from_millis(parse_env("NEGOTIATION_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = var("LOG_LEVEL") {
            config.logging.log_level = value.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid {ENV_PREFIX}LOG_LEVEL: {value}"))
            })?;
        }
        if let Some(value) = var("LOG_JSON") {
            config.logging.json_format = parse_env("LOG_JSON", &value)?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Default configuration rendered as TOML
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;
        Ok(())
    }

    /// Every problem found. Empty means the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.connection.validate());
        errors.extend(self.negotiation.validate());
        errors.extend(self.logging.validate());
        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid {ENV_PREFIX}{name}: {value}")))
}

fn check_address(kind: &str, address: &str, errors: &mut Vec<String>) {
    if address.is_empty() {
        errors.push(format!("{kind} address cannot be empty"));
    } else if address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid {} address format: '{address}' (expected format: '127.0.0.1:7000')",
            kind.to_lowercase()
        ));
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:7000")
    pub address: String,

    /// Raw plus validated connections the server holds at once
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:7000"),
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_address("Server", &self.address, &mut errors);

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server to connect to
    pub address: String,

    /// Bound on opening the raw TCP connection
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:7000"),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_address("Client", &self.address, &mut errors);

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Serialize handler calls in arrival order
    pub keep_in_order: bool,

    /// Largest frame accepted or written by stream transports
    pub max_frame_size: usize,

    /// Delivered-but-unreleased messages before a transport pauses reading
    pub inflight_limit: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            keep_in_order: true,
            max_frame_size: MAX_FRAME_SIZE,
            inflight_limit: DEFAULT_INFLIGHT_LIMIT,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size > u32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (length prefix is 32 bits)",
                self.max_frame_size
            ));
        }

        if self.inflight_limit == 0 {
            errors.push("Inflight limit must be greater than 0".to_string());
        } else if self.inflight_limit > 1_000_000 {
            errors.push(format!(
                "Inflight limit too large: {} (max recommended: 1,000,000)",
                self.inflight_limit
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NegotiationConfig {
    /// Bound on the whole handshake
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout: timeout::NEGOTIATION_TIMEOUT,
        }
    }
}

impl NegotiationConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.timeout.as_millis() < 10 {
            errors.push("Negotiation timeout too short (minimum: 10ms)".to_string());
        } else if self.timeout.as_secs() > 300 {
            errors.push("Negotiation timeout too long (maximum: 300s)".to_string());
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name attached to the root span
    pub app_name: String,

    /// Default level when `RUST_LOG` is unset
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("protoforge"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }
        errors
    }
}

/// Durations as whole milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `tracing::Level` as a lowercase name
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&level.as_str().to_lowercase())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Level::from_str(&name)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {name}")))
    }
}
