//! Engine configuration loading and validation

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RbacError, Result};

/// Access control engine configuration
///
/// Loadable from TOML:
///
/// ```toml
/// enable_cache = true
/// cache_ttl_ms = 300000
/// enable_audit = true
/// enable_anomaly = true
/// max_audit_entries = 10000
/// anomaly_threshold = 10
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Cache permission decisions and role resolutions
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Time-to-live for cached entries, in milliseconds
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Maximum number of cached decisions
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Record mutations and anomalies in the audit log
    #[serde(default = "default_true")]
    pub enable_audit: bool,

    /// Count denials per user and flag anomalies
    #[serde(default = "default_true")]
    pub enable_anomaly: bool,

    /// Audit log ring-buffer size
    #[serde(default = "default_max_audit_entries")]
    pub max_audit_entries: usize,

    /// Denials before an anomaly is flagged
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: u32,

    /// Cool-down after a breach before the denial counter resets, in seconds
    #[serde(default = "default_anomaly_cooldown_secs")]
    pub anomaly_cooldown_secs: u64,

    /// Access attempts kept per user
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Seed the guest → super_admin system role chain
    #[serde(default = "default_true")]
    pub seed_system_roles: bool,

    /// Buffered notifications per subscriber
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

// Default value functions
fn default_true() -> bool { true }
fn default_cache_ttl_ms() -> u64 { 300_000 }
fn default_cache_capacity() -> usize { 10_000 }
fn default_max_audit_entries() -> usize { 10_000 }
fn default_anomaly_threshold() -> u32 { 10 }
fn default_anomaly_cooldown_secs() -> u64 { 3_600 }
fn default_history_limit() -> usize { 1_000 }
fn default_notification_capacity() -> usize { 1_024 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_capacity: default_cache_capacity(),
            enable_audit: true,
            enable_anomaly: true,
            max_audit_entries: default_max_audit_entries(),
            anomaly_threshold: default_anomaly_threshold(),
            anomaly_cooldown_secs: default_anomaly_cooldown_secs(),
            history_limit: default_history_limit(),
            seed_system_roles: true,
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RbacError::InvalidConfig(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)
            .map_err(|e| RbacError::InvalidConfig(format!("failed to parse: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.enable_cache && self.cache_capacity == 0 {
            return Err(RbacError::InvalidConfig(
                "cache_capacity must be positive when caching is enabled".to_string(),
            ));
        }

        if self.enable_audit && self.max_audit_entries == 0 {
            return Err(RbacError::InvalidConfig(
                "max_audit_entries must be positive when auditing is enabled".to_string(),
            ));
        }

        if self.enable_anomaly && self.anomaly_threshold == 0 {
            return Err(RbacError::InvalidConfig(
                "anomaly_threshold must be at least 1".to_string(),
            ));
        }

        if self.notification_capacity == 0 {
            return Err(RbacError::InvalidConfig(
                "notification_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn anomaly_cooldown(&self) -> Duration {
        Duration::from_secs(self.anomaly_cooldown_secs)
    }
}
