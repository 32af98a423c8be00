//! TOML-loadable engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::defaults;

/// Classification tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Seconds after which a reading counts as stale.
    pub staleness_secs: u64,
    /// Fraction of tolerance at which spec status becomes `Approaching`.
    pub warning_ratio: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            staleness_secs: defaults::STALENESS_THRESHOLD_SECS,
            warning_ratio: defaults::SPEC_WARNING_RATIO,
        }
    }
}

/// Escalation tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub max_level: u8,
    pub default_expected_response_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            max_level: defaults::MAX_ESCALATION_LEVEL,
            default_expected_response_secs: defaults::DEFAULT_EXPECTED_RESPONSE_SECS,
        }
    }
}

/// Notification tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub suppression_secs: u64,
    /// Notify the escalation audience when an alarm is acknowledged or
    /// resolved.
    pub notify_on_handled: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            suppression_secs: defaults::NOTIFY_SUPPRESSION_SECS,
            notify_on_handled: false,
        }
    }
}

/// Persistence tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: defaults::DEFAULT_DB_PATH.to_string(),
            retry_attempts: defaults::PERSIST_RETRY_ATTEMPTS,
            retry_base_ms: defaults::PERSIST_RETRY_BASE_MS,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub escalation: EscalationConfig,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
    pub api_port: Option<u16>,
}

impl EngineConfig {
    /// Load configuration, trying in order:
    ///
    /// 1. `PODSENTRY_CONFIG` environment variable (path to TOML)
    /// 2. `podsentry.toml` in the working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("PODSENTRY_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded config from PODSENTRY_CONFIG");
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "failed to load config, falling back");
                }
            }
        }
        if Path::new("podsentry.toml").exists() {
            match Self::from_file("podsentry.toml") {
                Ok(cfg) => {
                    tracing::info!("loaded config from ./podsentry.toml");
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse ./podsentry.toml, using defaults");
                }
            }
        }
        Self::default()
    }

    /// Parse a TOML config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.classifier.staleness_secs, 30);
        assert!((cfg.classifier.warning_ratio - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.escalation.max_level, 3);
        assert_eq!(cfg.storage.retry_attempts, 3);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            [classifier]
            staleness_secs = 45
            "#,
        )
        .unwrap();
        assert_eq!(cfg.classifier.staleness_secs, 45);
        assert!((cfg.classifier.warning_ratio - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.escalation.max_level, 3);
    }
}
