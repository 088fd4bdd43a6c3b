//! # Service Configuration
//!
//! All tunables live in [`TelemetryConfig`]. Every section implements
//! `Default`, so a deployment only has to override what differs. Values are
//! layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `CALLWATCH__<SECTION>__<KEY>` environment variables.
//!
//! ```rust,no_run
//! use callwatch_call_telemetry::config::TelemetryConfig;
//!
//! # fn example() -> callwatch_call_telemetry::Result<()> {
//! let config = TelemetryConfig::load(Some("callwatch.toml".as_ref()))?;
//! println!("listening on {}", config.server.bind_address);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerts::{default_rules, AlertRule};
use crate::error::{Result, TelemetryError};
use crate::logging::{parse_log_level, LoggingConfig};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CALLWATCH";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub webhook: WebhookConfig,
    pub metrics: MetricsConfig,
    pub alerts: AlertsConfig,
    pub broadcast: BroadcastConfig,
    pub sync: SyncConfig,
    pub identity: IdentityConfig,
    pub normalizer: NormalizerConfig,
    pub logging: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:` URL; `sqlite::memory:` selects an in-memory store
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://callwatch.db".to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// When false no provider client is built and sync requests fail fast
    pub enabled: bool,
    pub api_url: String,
    pub api_key: Option<String>,
    /// Per-request timeout for provider calls
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: String::new(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub verify_signatures: bool,
    pub secret: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            verify_signatures: true,
            secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Interval of the periodic full recompute
    pub recompute_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            recompute_interval_secs: 30,
        }
    }
}

impl MetricsConfig {
    pub fn recompute_interval(&self) -> Duration {
        Duration::from_secs(self.recompute_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub rules: Vec<AlertRule>,
    /// Write raised alerts to the alert history table
    pub persist_history: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            persist_history: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Upper bound for a single subscriber delivery
    pub delivery_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 2_000,
        }
    }
}

impl BroadcastConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_range_days: i64,
    pub default_batch_size: u32,
    pub max_batch_size: u32,
    pub recompute_after_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_range_days: 90,
            default_batch_size: 1000,
            max_batch_size: 5000,
            recompute_after_sync: true,
        }
    }
}

/// Policy for agents missing from the directory
///
/// Derived identities come from free-text display names and can collide
/// (two "Sam Lee" agents share `sam.lee@<domain>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Derive `<first.last>@domain` from the display name; otherwise fall
    /// back to `agent.<extension>@domain`
    pub derive_from_name: bool,
    pub domain: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            derive_from_name: true,
            domain: "practice.local".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Extensions that belong to the practice; used for call direction
    pub internal_extensions: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        let extensions = [
            "100", "101", "102", "103", "104", "105", "200", "201", "202", "203", "300", "301",
            "302",
        ];
        Self {
            internal_extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
    /// Log span open and close events
    pub spans: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
            spans: false,
        }
    }
}

impl LogSettings {
    pub fn to_logging_config(&self) -> Result<LoggingConfig> {
        let mut config = LoggingConfig::new(parse_log_level(&self.level)?, "callwatch");
        if self.json {
            config = config.with_json();
        }
        if self.file_info {
            config = config.with_file_info();
        }
        if self.spans {
            config = config.with_spans();
        }
        Ok(config)
    }
}

impl TelemetryConfig {
    /// Load defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: TelemetryConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration suited to tests: in-memory store, no signature checks,
    /// no provider
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;
        config.webhook.verify_signatures = false;
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(TelemetryError::configuration(format!(
                "server.bind_address '{}' is not a socket address",
                self.server.bind_address
            )));
        }
        if self.database.max_connections == 0 {
            return Err(TelemetryError::configuration(
                "database.max_connections must be at least 1",
            ));
        }
        if self.provider.enabled && self.provider.api_url.trim().is_empty() {
            return Err(TelemetryError::configuration(
                "provider.api_url is required when the provider is enabled",
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(TelemetryError::configuration(
                "provider.timeout_secs must be greater than zero",
            ));
        }
        if self.webhook.verify_signatures
            && self.webhook.secret.as_deref().map_or(true, |s| s.is_empty())
        {
            return Err(TelemetryError::configuration(
                "webhook.secret is required when signature verification is enabled",
            ));
        }
        if self.metrics.recompute_interval_secs == 0 {
            return Err(TelemetryError::configuration(
                "metrics.recompute_interval_secs must be greater than zero",
            ));
        }
        if self.broadcast.delivery_timeout_ms == 0 {
            return Err(TelemetryError::configuration(
                "broadcast.delivery_timeout_ms must be greater than zero",
            ));
        }
        if self.sync.max_range_days < 1 {
            return Err(TelemetryError::configuration(
                "sync.max_range_days must be at least 1",
            ));
        }
        if self.sync.max_batch_size == 0
            || self.sync.default_batch_size == 0
            || self.sync.default_batch_size > self.sync.max_batch_size
        {
            return Err(TelemetryError::configuration(
                "sync.default_batch_size must be between 1 and sync.max_batch_size",
            ));
        }
        if self.identity.domain.trim().is_empty() {
            return Err(TelemetryError::configuration("identity.domain is required"));
        }
        for rule in &self.alerts.rules {
            if !rule.threshold.is_finite() {
                return Err(TelemetryError::configuration(format!(
                    "alert rule '{}' has a non-finite threshold",
                    rule.rule_ref()
                )));
            }
        }
        parse_log_level(&self.logging.level)?;
        Ok(())
    }
}
