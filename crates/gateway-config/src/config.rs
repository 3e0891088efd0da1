//! Gateway configuration.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// One downstream portal (one per operating country).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Portal base URL, e.g. `https://my.example.ua/`.
    pub portal_url: String,
    /// Company identifier the portal expects in the signed envelope.
    pub tenant_id: String,
    /// Shared HMAC secret for this tenant.
    pub secret: String,
}

/// AMI connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmiSettings {
    /// host:port of the Asterisk manager interface.
    pub host: String,
    pub username: String,
    pub secret: String,
}

/// Delivery pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySettings {
    /// Maximum records read from the outbox per tick.
    #[serde(default = "default_max_cdr")]
    pub max_cdr: usize,
    /// Number of sender workers.
    #[serde(default = "default_sender_count")]
    pub sender_count: usize,
    /// Seconds between outbox reads.
    #[serde(default = "default_read_interval")]
    pub read_interval_secs: u64,
    /// Overload alert fires when pending count reaches `overload_factor * max_cdr`.
    #[serde(default = "default_overload_factor")]
    pub overload_factor: usize,
}

fn default_max_cdr() -> usize {
    50
}

fn default_sender_count() -> usize {
    2
}

fn default_read_interval() -> u64 {
    30
}

fn default_overload_factor() -> usize {
    2
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_cdr: default_max_cdr(),
            sender_count: default_sender_count(),
            read_interval_secs: default_read_interval(),
            overload_factor: default_overload_factor(),
        }
    }
}

/// Periodic task intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalSettings {
    /// Seconds between inner-number registry refreshes.
    #[serde(default = "default_registry_refresh")]
    pub registry_refresh_secs: u64,
    /// Seconds between queue reconciliation runs.
    #[serde(default = "default_queue_reconcile")]
    pub queue_reconcile_secs: u64,
}

fn default_registry_refresh() -> u64 {
    300
}

fn default_queue_reconcile() -> u64 {
    600
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            registry_refresh_secs: default_registry_refresh(),
            queue_reconcile_secs: default_queue_reconcile(),
        }
    }
}

/// Main gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of this PBX deployment, used in alerts and recording file names.
    pub pbx_name: String,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub ami: AmiSettings,
    /// Path segment between the portal base URL and the endpoint name.
    #[serde(default)]
    pub api_prefix: String,
    /// Downstream portals keyed by country code.
    pub tenants: BTreeMap<String, Tenant>,
    /// Offset of the PBX local clock from UTC, in hours.
    #[serde(default)]
    pub time_zone_offset_hours: i32,
    /// Path of the SQLite outbox database.
    #[serde(default = "default_outbox_path")]
    pub outbox_path: String,
    /// Directory where call recordings are written by MixMonitor.
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: String,
    /// Minimum billable seconds before a call recording is registered.
    #[serde(default = "default_min_recording_secs")]
    pub min_recording_secs: u32,
    /// Optional alert webhook (SMS gateway). Alerts are log-only when unset.
    #[serde(default)]
    pub alert_url: Option<String>,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default)]
    pub intervals: IntervalSettings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_outbox_path() -> String {
    "/var/lib/pbx-gateway/outbox.db".to_string()
}

fn default_recordings_dir() -> String {
    "/var/spool/pbx-gateway/calls".to_string()
}

fn default_min_recording_secs() -> u32 {
    1
}

impl Config {
    /// Load configuration from a JSON file and apply env overrides.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Override configuration from environment variables.
    /// Only the log level can be overridden at runtime.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("PBX_GATEWAY_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.tenants.is_empty() {
            return Err(ConfigError::Invalid("no tenants configured".to_string()));
        }
        for (country, tenant) in &self.tenants {
            Url::parse(&tenant.portal_url).map_err(|e| {
                ConfigError::Invalid(format!("tenant {country} portal_url: {e}"))
            })?;
            if tenant.secret.is_empty() {
                return Err(ConfigError::Invalid(format!("tenant {country} has no secret")));
            }
        }
        if self.ami.host.is_empty() {
            return Err(ConfigError::Invalid("ami.host is empty".to_string()));
        }
        if self.delivery.max_cdr == 0 || self.delivery.sender_count == 0 {
            return Err(ConfigError::Invalid(
                "delivery.max_cdr and delivery.sender_count must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Full URL of a portal endpoint for the given country.
    pub fn api_url(&self, country: &str, endpoint: &str) -> Option<String> {
        let tenant = self.tenants.get(country)?;
        Some(format!("{}{}{}", tenant.portal_url, self.api_prefix, endpoint))
    }
}
