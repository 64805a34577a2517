//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (`RELAY_HOST`, `RELAY_PORT`, `PORT`)
//! - TOML configuration file (`$RELAY_CONFIG` or a default location)

use anyhow::{bail, Context, Result};
use relay_protocol::DEFAULT_MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tenvis_relay_core::{ControlReply, RelayConfig};

/// Largest accepted `limits.max_message_size` (16 MiB).
pub const MAX_MESSAGE_SIZE_LIMIT: usize = 16 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Relay behaviour.
    #[serde(default)]
    pub relay: RelaySection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Capacity of each connection's outbound queue.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Capacity of the shared broadcast queue.
    #[serde(default = "default_broadcast_queue_capacity")]
    pub broadcast_queue_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Silence tolerated before a connection is dropped, in milliseconds.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Deadline for a single write, in milliseconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,

    /// Ping period in milliseconds. Defaults to 90% of `pong_wait_ms`.
    #[serde(default)]
    pub ping_period_ms: Option<u64>,
}

/// Relay behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    /// How long an inbound message may wait for the broadcast queue.
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_ms: u64,

    /// Wire `type` treated as a client liveness message.
    #[serde(default = "default_control_type")]
    pub control_type: String,

    /// Reply sent for a liveness message.
    #[serde(default)]
    pub control_reply: ControlReply,

    /// Deliver messages back to their sender.
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    resolve_port(
        std::env::var("RELAY_PORT").ok().as_deref(),
        std::env::var("PORT").ok().as_deref(),
    )
}

/// `RELAY_PORT` wins over `PORT`; unparsable values are skipped.
fn resolve_port(relay_port: Option<&str>, port: Option<&str>) -> u16 {
    [relay_port, port]
        .into_iter()
        .flatten()
        .find_map(|p| p.trim().parse().ok())
        .unwrap_or(8090)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_broadcast_queue_capacity() -> usize {
    1024
}

fn default_pong_wait() -> u64 {
    60_000 // 60 seconds
}

fn default_write_wait() -> u64 {
    10_000 // 10 seconds
}

fn default_submit_timeout() -> u64 {
    5_000
}

fn default_control_type() -> String {
    relay_protocol::CONTROL_PING.to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            relay: RelaySection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            broadcast_queue_capacity: default_broadcast_queue_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: default_pong_wait(),
            write_wait_ms: default_write_wait(),
            ping_period_ms: None,
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            submit_timeout_ms: default_submit_timeout(),
            control_type: default_control_type(),
            control_reply: ControlReply::default(),
            echo_to_sender: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// `RELAY_CONFIG` names an explicit file; otherwise the default paths
    /// are tried in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, if
    /// `RELAY_CONFIG` names a missing file, or if validation fails.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("RELAY_CONFIG") {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        let config_paths = [
            "relay.toml",
            "/etc/relay/relay.toml",
            "~/.config/relay/relay.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        if limits.max_message_size == 0 || limits.max_message_size > MAX_MESSAGE_SIZE_LIMIT {
            bail!(
                "limits.max_message_size must be between 1 and {} bytes, got {}",
                MAX_MESSAGE_SIZE_LIMIT,
                limits.max_message_size
            );
        }
        if limits.max_connections == 0 {
            bail!("limits.max_connections must be positive");
        }
        if limits.outbound_queue_capacity == 0 || limits.broadcast_queue_capacity == 0 {
            bail!("limits queue capacities must be positive");
        }
        if self.heartbeat.write_wait_ms == 0 {
            bail!("heartbeat.write_wait_ms must be positive");
        }
        if self.relay.submit_timeout_ms == 0 {
            bail!("relay.submit_timeout_ms must be positive");
        }
        if self.relay.control_type.trim().is_empty() {
            bail!("relay.control_type must not be empty");
        }
        if self.heartbeat.pong_wait_ms == 0 {
            bail!("heartbeat.pong_wait_ms must be positive");
        }
        let ping_period = self.ping_period();
        if ping_period.is_zero() || ping_period >= self.pong_wait() {
            bail!(
                "heartbeat ping period ({}ms) must be positive and shorter than pong_wait_ms ({}ms)",
                ping_period.as_millis(),
                self.heartbeat.pong_wait_ms
            );
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "transport.websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        Ok(())
    }

    fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.heartbeat.pong_wait_ms)
    }

    fn ping_period(&self) -> Duration {
        self.heartbeat
            .ping_period_ms
            .map_or_else(|| RelayConfig::ping_period_for(self.pong_wait()), Duration::from_millis)
    }

    /// Core relay settings derived from this configuration.
    #[must_use]
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_message_size: self.limits.max_message_size,
            outbound_capacity: self.limits.outbound_queue_capacity,
            broadcast_capacity: self.limits.broadcast_queue_capacity,
            write_wait: Duration::from_millis(self.heartbeat.write_wait_ms),
            pong_wait: self.pong_wait(),
            ping_period: self.ping_period(),
            submit_timeout: Duration::from_millis(self.relay.submit_timeout_ms),
            control_type: self.relay.control_type.clone(),
            control_reply: self.relay.control_reply,
            echo_to_sender: self.relay.echo_to_sender,
        }
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_message_size, 512);
        assert_eq!(config.relay.control_type, "ping");
        assert_eq!(config.relay.control_reply, ControlReply::Ack);
        assert!(config.relay.echo_to_sender);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_port() {
        assert_eq!(resolve_port(None, None), 8090);
        assert_eq!(resolve_port(None, Some("9000")), 9000);
        assert_eq!(resolve_port(Some("7000"), Some("9000")), 7000);
        assert_eq!(resolve_port(Some("bogus"), Some("9000")), 9000);
        assert_eq!(resolve_port(Some("bogus"), None), 8090);
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".to_string();
        config.port = 8090;
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8090);

        config.host = "not a host".to_string();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 9000

            [limits]
            max_connections = 500
            outbound_queue_capacity = 16

            [heartbeat]
            pong_wait_ms = 30000

            [relay]
            control_reply = "echo"
            echo_to_sender = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_connections, 500);
        assert_eq!(config.limits.max_message_size, 512);

        let relay = config.relay_config();
        assert_eq!(relay.outbound_capacity, 16);
        assert_eq!(relay.pong_wait, Duration::from_secs(30));
        assert_eq!(relay.ping_period, Duration::from_secs(27));
        assert_eq!(relay.write_wait, Duration::from_secs(10));
        assert_eq!(relay.control_reply, ControlReply::Echo);
        assert!(!relay.echo_to_sender);
    }

    #[test]
    fn test_explicit_ping_period() {
        let mut config = Config::default();
        config.heartbeat.ping_period_ms = Some(20_000);
        assert_eq!(config.relay_config().ping_period, Duration::from_secs(20));
        assert!(config.validate().is_ok());

        config.heartbeat.ping_period_ms = Some(60_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.limits.max_message_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transport.websocket_path = "ws".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.max_message_size = usize::MAX;
        assert!(config.validate().is_err());
        config.limits.max_message_size = MAX_MESSAGE_SIZE_LIMIT;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.relay.control_type = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.heartbeat.write_wait_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.outbound_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.broadcast_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.relay.submit_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_with_empty_control_type_rejected() {
        let config: Config = toml::from_str("[relay]\ncontrol_type = \"\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("control_type"));
    }

    #[test]
    fn test_from_file_reports_path() {
        let err = Config::from_file("/nonexistent/relay.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/relay.toml"));
    }
}
