//! Monitor Configuration
//!
//! Layered: defaults → optional JSON file (`VG_CONFIG`) → `VG_*` environment
//! variables. `.env` is loaded by the binary before `load()` runs.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::logic::bus::{BusConfig, DropPolicy};
use crate::logic::metrics::MetricsConfig;
use crate::logic::model::DetectorConfig;
use crate::logic::policy::PolicyConfig;
use crate::logic::scenario::ScenarioConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_interval_ms: u64,
    pub refit_interval_secs: u64,
    pub receive_timeout_ms: u64,
    /// Readings kept by the in-memory store when no database is configured
    pub history_capacity: usize,
    pub db_path: Option<PathBuf>,
    pub telemetry_dir: Option<PathBuf>,
    pub bus: BusConfig,
    pub detector: DetectorConfig,
    pub policy: PolicyConfig,
    pub metrics: MetricsConfig,
    pub scenario: ScenarioConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: constants::DEFAULT_TICK_INTERVAL_MS,
            refit_interval_secs: constants::DEFAULT_REFIT_INTERVAL_SECS,
            receive_timeout_ms: constants::DEFAULT_RECEIVE_TIMEOUT_MS,
            history_capacity: constants::DEFAULT_WINDOW_SIZE * 10,
            db_path: None,
            telemetry_dir: None,
            bus: BusConfig::default(),
            detector: DetectorConfig::default(),
            policy: PolicyConfig::default(),
            metrics: MetricsConfig::default(),
            scenario: ScenarioConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Defaults, then `VG_CONFIG` file, then environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(constants::ENV_CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply `VG_*` overrides from `lookup` (the environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("VG_TICK_MS") {
            self.tick_interval_ms = parse("VG_TICK_MS", &v)?;
        }
        if let Some(v) = get("VG_METRICS_MS") {
            self.metrics.refresh_interval_ms = parse("VG_METRICS_MS", &v)?;
        }
        if let Some(v) = get("VG_REFIT_SECS") {
            self.refit_interval_secs = parse("VG_REFIT_SECS", &v)?;
        }
        if let Some(v) = get("VG_RECEIVE_TIMEOUT_MS") {
            self.receive_timeout_ms = parse("VG_RECEIVE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("VG_QUEUE_CAPACITY") {
            self.bus.queue_capacity = parse("VG_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = get("VG_DROP_POLICY") {
            self.bus.drop_policy = v
                .parse::<DropPolicy>()
                .map_err(|_| ConfigError::InvalidValue { key: "VG_DROP_POLICY", value: v.clone() })?;
        }
        if let Some(v) = get("VG_CONTAMINATION") {
            self.detector.contamination = parse("VG_CONTAMINATION", &v)?;
        }
        if let Some(v) = get("VG_MIN_SAMPLES") {
            self.detector.min_samples = parse("VG_MIN_SAMPLES", &v)?;
        }
        if let Some(v) = get("VG_WINDOW_SIZE") {
            self.detector.window_size = parse("VG_WINDOW_SIZE", &v)?;
        }
        if let Some(v) = get("VG_LEARNING") {
            self.policy.learning_enabled = !matches!(v.to_lowercase().as_str(), "false" | "0" | "off" | "no");
        }
        if let Some(v) = get("VG_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("VG_TELEMETRY_DIR") {
            self.telemetry_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Rejects settings that would make a loop spin or a component unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick interval must be > 0".into()));
        }
        if self.metrics.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid("metrics interval must be > 0".into()));
        }
        if self.refit_interval_secs == 0 {
            return Err(ConfigError::Invalid("refit interval must be > 0".into()));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid("receive timeout must be > 0".into()));
        }
        if self.bus.queue_capacity == 0 {
            return Err(ConfigError::Invalid("bus queue capacity must be > 0".into()));
        }
        let c = self.detector.contamination;
        if !(c > 0.0 && c <= 0.5) {
            return Err(ConfigError::Invalid(format!("contamination {} outside (0, 0.5]", c)));
        }
        if self.detector.window_size == 0 || self.detector.n_trees == 0 || self.detector.max_samples == 0 {
            return Err(ConfigError::Invalid("detector sizes must be > 0".into()));
        }
        if self.metrics.rate_window == 0 {
            return Err(ConfigError::Invalid("rate window must be > 0".into()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics.refresh_interval_ms)
    }

    pub fn refit_interval(&self) -> Duration {
        Duration::from_secs(self.refit_interval_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.metrics_interval(), Duration::from_secs(5));
        assert_eq!(config.refit_interval(), Duration::from_secs(60));
        assert_eq!(config.detector.min_samples, 30);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = MonitorConfig::default();
        config
            .apply_overrides(overrides(&[
                ("VG_TICK_MS", "250"),
                ("VG_DROP_POLICY", "drop_newest"),
                ("VG_CONTAMINATION", "0.1"),
                ("VG_LEARNING", "off"),
                ("VG_DB_PATH", "/tmp/vg.sqlite"),
            ]))
            .unwrap();

        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.bus.drop_policy, DropPolicy::DropNewest);
        assert_eq!(config.detector.contamination, 0.1);
        assert!(!config.policy.learning_enabled);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/vg.sqlite")));
    }

    #[test]
    fn test_malformed_override_is_rejected() {
        let mut config = MonitorConfig::default();
        let err = config.apply_overrides(overrides(&[("VG_QUEUE_CAPACITY", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "VG_QUEUE_CAPACITY", .. }));
    }

    #[test]
    fn test_validate_rejects_zero_intervals_and_bad_contamination() {
        let mut config = MonitorConfig::default();
        config.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.detector.contamination = 0.0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.bus.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_file_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(&path, r#"{ "tick_interval_ms": 500, "detector": { "min_samples": 50 } }"#).unwrap();

        let config = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.refit_interval_secs, 60);
        assert_eq!(config.detector.min_samples, 50);
    }
}
