//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML configuration file (`beacon.toml`, `/etc/beacon/beacon.toml`,
//!   `~/.config/beacon/beacon.toml`)
//! - Environment variables (`BEACON__SECTION__KEY`, e.g.
//!   `BEACON__CONNECTION__OUTBOX_CAPACITY=512`)
//! - `BEACON_HOST`, `BEACON_PORT` and `BEACON_JWT_SECRET` as defaults

use anyhow::{Context, Result};
use beacon_core::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Secret used when none is configured. Only suitable for local development.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-in-production";

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

    /// Token validation.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-connection limits and timers.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path of the WebSocket upgrade endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Token validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret the access tokens are signed with.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// Required `iss` claim, if any.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default)]
    pub leeway_secs: u64,
}

/// Per-connection limits and timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Events queued per connection before new ones are dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Deadline for a single write in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Ping interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Read deadline in milliseconds, extended by every pong.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Largest inbound frame in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
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

    /// How often hub statistics are published, in milliseconds.
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,
}

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_jwt_secret() -> String {
    std::env::var("BEACON_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string())
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_ping_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_read_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_max_frame_size() -> usize {
    4 * 1024 // 4 KB
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_report_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            auth: AuthConfig::default(),
            connection: ConnectionSettings::default(),
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

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            issuer: None,
            leeway_secs: 0,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbox_capacity: default_outbox_capacity(),
            write_timeout_ms: default_write_timeout(),
            ping_interval_ms: default_ping_interval(),
            read_timeout_ms: default_read_timeout(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            report_interval_ms: default_report_interval(),
        }
    }
}

impl ConnectionSettings {
    /// Convert to the runtime connection configuration.
    #[must_use]
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            outbox_capacity: self.outbox_capacity,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            ping_interval: Duration::from_millis(self.ping_interval_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            max_frame_size: self.max_frame_size,
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, layered with
    /// `BEACON__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        let mut builder = ::config::Config::builder();

        let found = config_paths
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        if let Some(path) = &found {
            tracing::info!("Loading configuration from {}", path);
            builder = builder.add_source(::config::File::from(Path::new(path)));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("BEACON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
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

    /// Whether the built-in development secret is in use.
    #[must_use]
    pub fn uses_dev_secret(&self) -> bool {
        self.auth.jwt_secret == DEV_JWT_SECRET
    }
}
