//! Configuration loading and types for Leasehold.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, credentials and delegation tokens, lease policy,
//! storage, logging and observability.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Account key and delegation tokens.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Lease policy.
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics + health probe).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    /// Maximum blob size in bytes (default 64 MiB).
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout: default_shutdown_timeout(),
            max_blob_size: default_max_blob_size(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Enable the `/health` probe.
    #[serde(default = "default_true")]
    pub health_check: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            health_check: true,
        }
    }
}

/// Authentication settings.
///
/// The account key grants everything.  Each entry in `tokens` registers
/// an opaque delegation token presented via the `sig` query parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Storage account name.
    #[serde(default = "default_account")]
    pub account: String,

    /// Account key (`Authorization: SharedKey <account>:<key>`).
    #[serde(default = "default_account_key")]
    pub account_key: String,

    /// Registered delegation tokens.
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            account_key: default_account_key(),
            tokens: Vec::new(),
        }
    }
}

/// Scope of a delegation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Account,
    Container,
    Blob,
}

/// A delegation token entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    /// Opaque value matched against `sig`.
    pub token: String,

    /// `account`, `container` or `blob`.
    pub kind: TokenKind,

    /// Container the token is bound to (container and blob tokens).
    #[serde(default)]
    pub container: Option<String>,

    /// Blob the token is bound to (blob tokens).
    #[serde(default)]
    pub blob: Option<String>,

    /// Permission letters drawn from `racwdl`.
    pub permissions: String,

    /// Service letters (`bfqt`, account tokens only).
    #[serde(default = "default_services")]
    pub services: String,

    /// Resource type letters (`sco`, account tokens only).
    #[serde(default = "default_resource_types")]
    pub resource_types: String,

    /// Start of the validity window; absent means already valid.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,

    /// End of the validity window (exclusive).
    pub expiry: DateTime<Utc>,
}

/// Lease policy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    /// Accept renew on an expired lease that nobody else has acquired.
    #[serde(default = "default_true")]
    pub allow_renew_after_expiry: bool,

    /// Compare-and-swap attempts per lease operation before giving up.
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            allow_renew_after_expiry: true,
            max_commit_attempts: default_max_commit_attempts(),
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `memory` or `sqlite`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_account() -> String {
    "devstoreaccount1".to_string()
}

fn default_account_key() -> String {
    "leasehold-dev-key".to_string()
}

fn default_services() -> String {
    "b".to_string()
}

fn default_resource_types() -> String {
    "co".to_string()
}

fn default_max_commit_attempts() -> u32 {
    8
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_sqlite_path() -> String {
    "./data/leasehold.db".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_blob_size() -> u64 {
    67_108_864 // 64 MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
