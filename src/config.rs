//! # Configuration Management
//!
//! Centralized configuration for packet-tcp clients and servers.
//!
//! This module provides structured configuration for the server's accept loop and
//! per-client limits, the client's connect and request timeouts, the shared
//! transport settings (frame size, poll interval, identity sync, body format, crypto),
//! and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` or `from_toml()`
//! - Environment variables (`PACKET_TCP_*`) via `from_env()`
//! - Direct instantiation with defaults, or `default_with_overrides()`
//!
//! ## Peer Agreement
//! `transport.max_frame_size`, `transport.body_format`, `transport.identity_sync`
//! and `transport.crypto` must match on both ends of a connection.

use crate::core::framer::MIN_FRAME_SIZE;
use crate::core::serialization::SerializationFormat;
use crate::crypto::CryptoConfig;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default largest frame payload, and the receive buffer size
pub const MAX_FRAME_SIZE: usize = 4096;

/// Default outbound queue depth of a client connection
pub const MAX_OUTBOUND_QUEUE_DEPTH: usize = 100;

/// Default outbound queue depth of each server-side connection
pub const MAX_OUTBOUND_QUEUE_DEPTH_PER_CLIENT: usize = 100;

/// Default cap on concurrently connected clients
pub const MAX_CONNECTIONS: usize = 100;

/// Everything a client or server needs, grouped by role
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration shared by both roles
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Read and parse a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse a TOML document; missing sections keep their defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overlaid with `PACKET_TCP_*` variables
    ///
    /// Unset variables keep their defaults; set but unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_var("PACKET_TCP_SERVER_ADDRESS") {
            config.server.address = addr;
        }
        if let Some(addr) = env_var("PACKET_TCP_CLIENT_ADDRESS") {
            config.client.address = addr;
        }
        if let Some(val) = env_parse::<usize>("PACKET_TCP_MAX_CONNECTIONS")? {
            config.server.max_connections = val;
        }
        if let Some(val) = env_parse::<usize>("PACKET_TCP_MAX_OUTBOUND_QUEUE_DEPTH")? {
            config.client.max_outbound_queue_depth = val;
        }
        if let Some(val) = env_parse::<usize>("PACKET_TCP_MAX_OUTBOUND_QUEUE_DEPTH_PER_CLIENT")? {
            config.server.max_outbound_queue_depth_per_client = val;
        }
        if let Some(val) = env_parse::<usize>("PACKET_TCP_MAX_FRAME_SIZE")? {
            config.transport.max_frame_size = val;
        }
        if let Some(val) = env_parse::<u64>("PACKET_TCP_POLL_INTERVAL_MS")? {
            config.transport.poll_interval = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<bool>("PACKET_TCP_IDENTITY_SYNC")? {
            config.transport.identity_sync = val;
        }
        if let Some(val) = env_parse::<u64>("PACKET_TCP_REQUEST_TIMEOUT_MS")? {
            config.client.request_timeout = Duration::from_millis(val);
        }
        if let Some(val) = env_parse::<u64>("PACKET_TCP_HANDSHAKE_TIMEOUT_MS")? {
            config.client.handshake_timeout = Duration::from_millis(val);
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

    /// The default configuration rendered as TOML, as a starting point for a config file
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("# default configuration could not be rendered: {e}"))
    }

    /// Write this configuration as TOML, readable again with [`from_file`](Self::from_file)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Cannot render config: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot write {}: {e}", path.display()))
        })
    }

    /// Every problem found across all sections; empty when the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// [`validate`](Self::validate) folded into a single `ConfigError`
    pub fn validate_strict(&self) -> Result<()> {
        strict(self.validate())
    }

    /// The sections a client uses: `client`, `transport` and `logging`.
    pub fn validate_client_strict(&self) -> Result<()> {
        let mut errors = self.client.validate();
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        strict(errors)
    }

    /// The sections a server uses: `server`, `transport` and `logging`.
    pub fn validate_server_strict(&self) -> Result<()> {
        let mut errors = self.server.validate();
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        strict(errors)
    }
}

fn strict(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{raw}'"))),
        None => Ok(None),
    }
}

fn validate_listen_address(errors: &mut Vec<String>, address: &str) {
    if address.is_empty() {
        errors.push("server address cannot be empty".to_string());
    } else if address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid server address format: '{address}' (expected format: '127.0.0.1:9000')"
        ));
    }
}

/// Connect targets may name a host; resolution happens at connect time.
fn validate_connect_address(errors: &mut Vec<String>, address: &str) {
    if address.is_empty() {
        errors.push("client address cannot be empty".to_string());
        return;
    }
    let shaped = address
        .rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !shaped {
        errors.push(format!(
            "Invalid client address format: '{address}' (expected format: 'host:port')"
        ));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Listen backlog, and the hard cap on connected clients
    pub max_connections: usize,

    /// Outbound queue depth of each accepted connection
    pub max_outbound_queue_depth_per_client: usize,

    /// How long `shutdown` waits for connections to close
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            max_connections: MAX_CONNECTIONS,
            max_outbound_queue_depth_per_client: MAX_OUTBOUND_QUEUE_DEPTH_PER_CLIENT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_listen_address(&mut errors, &self.address);

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > u32::MAX as usize {
            errors.push(format!(
                "Max connections too large for a listen backlog: {}",
                self.max_connections
            ));
        }

        if self.max_outbound_queue_depth_per_client == 0 {
            errors.push("Per-client outbound queue depth must be greater than 0".to_string());
        } else if self.max_outbound_queue_depth_per_client > 1_000_000 {
            errors.push(format!(
                "Per-client outbound queue depth too large: {} (max recommended: 1,000,000)",
                self.max_outbound_queue_depth_per_client
            ));
        }

        if self.shutdown_timeout.as_millis() < 100 {
            errors.push("Shutdown timeout too short (minimum: 100ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Outbound queue depth of the client connection
    pub max_outbound_queue_depth: usize,

    /// Timeout for the TCP connect
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for identity sync, when enabled
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Default reply deadline for `Client::request`
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            max_outbound_queue_depth: MAX_OUTBOUND_QUEUE_DEPTH,
            connect_timeout: timeout::CONNECT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            request_timeout: timeout::REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_connect_address(&mut errors, &self.address);

        if self.max_outbound_queue_depth == 0 {
            errors.push("Outbound queue depth must be greater than 0".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        }

        if self.request_timeout.as_millis() < 10 {
            errors.push("Request timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest frame payload accepted or produced; also the receive buffer size
    pub max_frame_size: usize,

    /// Accepted for configuration compatibility. The send loop is woken by its queue
    /// and by closing, so nothing polls on this period.
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Run the identity-sync handshake on connect
    pub identity_sync: bool,

    /// Serialization of packet bodies
    pub body_format: SerializationFormat,

    /// Envelope encryption
    pub crypto: CryptoConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            poll_interval: timeout::POLL_INTERVAL,
            identity_sync: false,
            body_format: SerializationFormat::default(),
            crypto: CryptoConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size < MIN_FRAME_SIZE {
            errors.push(format!(
                "Max frame size too small: {} (minimum: {MIN_FRAME_SIZE})",
                self.max_frame_size
            ));
        } else if self.max_frame_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Max frame size too large: {} bytes (maximum: 16 MB)",
                self.max_frame_size
            ));
        }

        if self.poll_interval.is_zero() {
            errors.push("Poll interval must be greater than 0".to_string());
        } else if self.poll_interval.as_secs() > 10 {
            errors.push("Poll interval too long (maximum: 10s)".to_string());
        }

        // shape only; the provider itself is built once, by the codec
        if let Err(e) = self.crypto.check() {
            errors.push(format!("Invalid crypto configuration: {e}"));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("packet-tcp"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
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

/// Helper module for Duration serialization/deserialization (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
