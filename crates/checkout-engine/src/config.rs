//! # Engine Configuration
//!
//! Configuration for the checkout engine and the API binary.
//!
//! ## Configuration Sources (Priority Order)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     CHECKOUT_DATABASE_PATH, CHECKOUT_SERVER_PORT,                       │
//! │     CHECKOUT_PAYMENT_SERVER_KEY, CHECKOUT_PAYMENT_BASE_URL, ...         │
//! │                                                                         │
//! │  2. Config File (checkout.toml)                                         │
//! │     Located in app config directory                                     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     15 minute holds, 60 s sweeps, 5 s outbox polls                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Config File
//! ```toml
//! [database]
//! path = "./data/checkout.db"
//! max_connections = 8
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [reservation]
//! ttl_secs = 900
//!
//! [sweeper]
//! interval_secs = 60
//! batch_size = 500
//!
//! [outbox]
//! poll_interval_secs = 5
//! batch_size = 100
//! max_attempts = 10
//! retention_days = 7
//!
//! [payment]
//! base_url = "https://api.sandbox.payments.example"
//! server_key = "SB-Mid-server-xxxx"
//! timeout_secs = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use checkout_db::DbConfig;

use crate::error::ConfigError;

// =============================================================================
// Database
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Use a private in-memory database (tests, demos).
    #[serde(default)]
    pub in_memory: bool,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for the SQLite write lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/checkout.db")
}
fn default_max_connections() -> u32 {
    8
}
fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            in_memory: false,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings { host: default_host(), port: default_port() }
    }
}

// =============================================================================
// Reservations & Sweeper
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationSettings {
    /// Hold lifetime. A hold is sweepable exactly at `created_at + ttl`.
    #[serde(default = "default_ttl")]
    pub ttl_secs: i64,
}

fn default_ttl() -> i64 {
    checkout_core::DEFAULT_RESERVATION_TTL_SECS
}

impl Default for ReservationSettings {
    fn default() -> Self {
        ReservationSettings { ttl_secs: default_ttl() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Holds expired per statement.
    #[serde(default = "default_sweep_batch")]
    pub batch_size: i64,
}

fn default_sweep_interval() -> u64 {
    60
}
fn default_sweep_batch() -> i64 {
    500
}

impl Default for SweeperSettings {
    fn default() -> Self {
        SweeperSettings {
            interval_secs: default_sweep_interval(),
            batch_size: default_sweep_batch(),
        }
    }
}

// =============================================================================
// Outbox
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_outbox_batch")]
    pub batch_size: u32,

    /// Events that failed this many times are left for an operator.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Dispatched events older than this are deleted. 0 keeps them forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_outbox_batch() -> u32 {
    100
}
fn default_max_attempts() -> u32 {
    10
}
fn default_retention_days() -> u32 {
    7
}

impl Default for OutboxSettings {
    fn default() -> Self {
        OutboxSettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_outbox_batch(),
            max_attempts: default_max_attempts(),
            retention_days: default_retention_days(),
        }
    }
}

// =============================================================================
// Payment Provider
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    #[serde(default = "default_payment_url")]
    pub base_url: String,

    /// Shared secret: basic-auth user for charges, signature salt for notifications.
    #[serde(default)]
    pub server_key: String,

    /// Per-request timeout.
    #[serde(default = "default_payment_timeout")]
    pub timeout_secs: u64,

    /// Initial retry backoff (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Retries stop once this much time has passed since the first attempt.
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_secs: u64,
}

fn default_payment_url() -> String {
    "https://api.sandbox.payments.example".to_string()
}
fn default_payment_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    200
}
fn default_max_elapsed() -> u64 {
    15
}

impl Default for PaymentSettings {
    fn default() -> Self {
        PaymentSettings {
            base_url: default_payment_url(),
            server_key: String::new(),
            timeout_secs: default_payment_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_elapsed_secs: default_max_elapsed(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub reservation: ReservationSettings,

    #[serde(default)]
    pub sweeper: SweeperSettings,

    #[serde(default)]
    pub outbox: OutboxSettings,

    #[serde(default)]
    pub payment: PaymentSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (checkout.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document (no environment overrides, no validation).
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payment.server_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "payment.server_key is required to verify notifications".into(),
            ));
        }

        if !self.payment.base_url.starts_with("http://") && !self.payment.base_url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "payment.base_url must start with http:// or https://, got: {}",
                self.payment.base_url
            )));
        }

        if self.reservation.ttl_secs <= 0 {
            return Err(ConfigError::Invalid("reservation.ttl_secs must be greater than 0".into()));
        }

        if self.sweeper.interval_secs == 0 || self.sweeper.batch_size <= 0 {
            return Err(ConfigError::Invalid(
                "sweeper.interval_secs and sweeper.batch_size must be greater than 0".into(),
            ));
        }

        if self.outbox.poll_interval_secs == 0 || self.outbox.batch_size == 0 || self.outbox.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "outbox.poll_interval_secs, batch_size and max_attempts must be greater than 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be greater than 0".into()));
        }

        Ok(())
    }

    /// Applies `CHECKOUT_*` overrides read through `lookup`.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CHECKOUT_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(v) = lookup("CHECKOUT_DATABASE_IN_MEMORY") {
            self.database.in_memory = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Some(host) = lookup("CHECKOUT_SERVER_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("CHECKOUT_SERVER_PORT").and_then(|v| v.parse::<u16>().ok()) {
            debug!(port, "Overriding server port from environment");
            self.server.port = port;
        }

        if let Some(ttl) = lookup("CHECKOUT_RESERVATION_TTL_SECS").and_then(|v| v.parse::<i64>().ok()) {
            self.reservation.ttl_secs = ttl;
        }

        if let Some(secs) = lookup("CHECKOUT_SWEEPER_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.sweeper.interval_secs = secs;
        }

        if let Some(secs) = lookup("CHECKOUT_OUTBOX_POLL_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.outbox.poll_interval_secs = secs;
        }

        if let Some(url) = lookup("CHECKOUT_PAYMENT_BASE_URL") {
            debug!(url = %url, "Overriding payment base URL from environment");
            self.payment.base_url = url;
        }

        // Never logged
        if let Some(key) = lookup("CHECKOUT_PAYMENT_SERVER_KEY") {
            self.payment.server_key = key;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "checkout", "engine")
            .map(|dirs| dirs.config_dir().join("checkout.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database pool configuration for these settings.
    pub fn db_config(&self) -> DbConfig {
        let config = if self.database.in_memory {
            DbConfig::in_memory()
        } else {
            DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
        };
        config.busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation.ttl_secs)
    }

    /// `host:port` to bind the HTTP server to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
