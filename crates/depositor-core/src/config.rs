//! Service configuration management

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Service Configuration Constants
// ============================================================================

/// Default directory holding one working directory per configuration.
pub const DEFAULT_BASE_DIR: &str = "./sessions";

/// Default number of ingest units allowed to be outstanding at once.
pub const DEFAULT_MAX_UNITS: usize = 10;

/// Default ping interval in seconds; the reaper sleeps half of it.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 60;

/// Default bound on a single call to the ingestion service.
pub const DEFAULT_INGEST_TIMEOUT_SECS: u64 = 300;

/// Monitoring window applied when a configuration carries no duration.
pub const DEFAULT_MONITORING_MINUTES: u64 = 60;

/// Default bounded wait used while draining units of a configuration.
pub const DEFAULT_DRAIN_POLL_MILLIS: u64 = 250;

/// Default root of the directory-backed ingestion service.
pub const DEFAULT_SERVICE_ROOT: &str = "./repository";

/// Runtime settings of the lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_dir: PathBuf,
    pub max_units: usize,
    pub ping_interval_secs: u64,
    pub ingest_timeout_secs: u64,
    pub default_monitoring_minutes: u64,
    pub drain_poll_millis: u64,
    pub service_root: PathBuf,
}

impl ServiceConfig {
    /// Load configuration from the environment (and `.env`) over the defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build and validate a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = ServiceConfig {
            base_dir: lookup("DEPOSITOR_BASE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.base_dir),
            max_units: parse_or(&lookup, "DEPOSITOR_MAX_UNITS", defaults.max_units)?,
            ping_interval_secs: parse_or(
                &lookup,
                "DEPOSITOR_PING_INTERVAL_SECS",
                defaults.ping_interval_secs,
            )?,
            ingest_timeout_secs: parse_or(
                &lookup,
                "DEPOSITOR_INGEST_TIMEOUT_SECS",
                defaults.ingest_timeout_secs,
            )?,
            default_monitoring_minutes: parse_or(
                &lookup,
                "DEPOSITOR_DEFAULT_MONITORING_MINUTES",
                defaults.default_monitoring_minutes,
            )?,
            drain_poll_millis: parse_or(
                &lookup,
                "DEPOSITOR_DRAIN_POLL_MILLIS",
                defaults.drain_poll_millis,
            )?,
            service_root: lookup("DEPOSITOR_SERVICE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.service_root),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_dir.as_os_str().is_empty() {
            anyhow::bail!("Base directory cannot be empty");
        }

        if self.max_units == 0 {
            anyhow::bail!("max_units must be greater than 0");
        }

        // Half the ping interval must still be a whole second.
        if self.ping_interval_secs < 2 {
            anyhow::bail!(
                "ping_interval_secs must be at least 2, got {}",
                self.ping_interval_secs
            );
        }

        if self.ingest_timeout_secs == 0 {
            anyhow::bail!("ingest_timeout_secs must be greater than 0");
        }

        if self.default_monitoring_minutes == 0 {
            anyhow::bail!("default_monitoring_minutes must be greater than 0");
        }

        if self.drain_poll_millis == 0 {
            anyhow::bail!("drain_poll_millis must be greater than 0");
        }

        Ok(())
    }

    /// Sleep between two reaper cycles
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs) / 2
    }

    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest_timeout_secs)
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_millis)
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn with_max_units(mut self, max_units: usize) -> Self {
        self.max_units = max_units;
        self
    }

    pub fn with_ping_interval_secs(mut self, secs: u64) -> Self {
        self.ping_interval_secs = secs;
        self
    }

    pub fn with_ingest_timeout_secs(mut self, secs: u64) -> Self {
        self.ingest_timeout_secs = secs;
        self
    }

    pub fn with_default_monitoring_minutes(mut self, minutes: u64) -> Self {
        self.default_monitoring_minutes = minutes;
        self
    }

    pub fn with_drain_poll_millis(mut self, millis: u64) -> Self {
        self.drain_poll_millis = millis;
        self
    }

    pub fn with_service_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.service_root = dir.into();
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            max_units: DEFAULT_MAX_UNITS,
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
            ingest_timeout_secs: DEFAULT_INGEST_TIMEOUT_SECS,
            default_monitoring_minutes: DEFAULT_MONITORING_MINUTES,
            drain_poll_millis: DEFAULT_DRAIN_POLL_MILLIS,
            service_root: PathBuf::from(DEFAULT_SERVICE_ROOT),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.base_dir, PathBuf::from(DEFAULT_BASE_DIR));
        assert_eq!(config.max_units, DEFAULT_MAX_UNITS);
        assert_eq!(config.reaper_interval(), Duration::from_secs(30));
        assert_eq!(config.default_monitoring_minutes, 60);
    }

    #[test]
    fn test_env_overrides() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("DEPOSITOR_BASE_DIR", "/data/sessions"),
            ("DEPOSITOR_MAX_UNITS", "3"),
            ("DEPOSITOR_PING_INTERVAL_SECS", "10"),
            ("DEPOSITOR_INGEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.base_dir, PathBuf::from("/data/sessions"));
        assert_eq!(config.max_units, 3);
        assert_eq!(config.reaper_interval(), Duration::from_secs(5));
        assert_eq!(config.ingest_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ServiceConfig::from_lookup(lookup_from(&[("DEPOSITOR_MAX_UNITS", "0")])).is_err());
        assert!(
            ServiceConfig::from_lookup(lookup_from(&[("DEPOSITOR_MAX_UNITS", "many")])).is_err()
        );
        assert!(
            ServiceConfig::from_lookup(lookup_from(&[("DEPOSITOR_PING_INTERVAL_SECS", "1")]))
                .is_err()
        );
    }

    #[test]
    fn test_builder_setters() {
        let config = ServiceConfig::default()
            .with_base_dir("/tmp/x")
            .with_max_units(1)
            .with_drain_poll_millis(10);
        assert!(config.validate().is_ok());
        assert_eq!(config.drain_poll(), Duration::from_millis(10));
    }
}
