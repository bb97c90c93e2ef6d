//! Controller configuration
//!
//! Loaded from a YAML file. Every field has a default, so a partial file or
//! no file at all yields a working configuration.
//!
//! ## Example Configuration File (featurelane.yaml)
//!
//! ```yaml
//! registry:
//!   path: /var/lib/featurelane/registry.db
//!
//! reconciler:
//!   workers: 8
//!   poll_interval_secs: 15
//!   executor_timeout_ms: 5000
//!   max_job_retries: 5
//!   max_conflict_retries: 3
//!   gc_retention_secs: 86400
//!   retry_policy: conservative
//!
//! logging:
//!   format: json
//! ```
//!
//! `FEATURELANE_REGISTRY_PATH` overrides `registry.path`.

use anyhow::{bail, Context, Result};
use featurelane_core::retry::RetryPolicy;
use featurelane_reconciler::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const REGISTRY_PATH_ENV: &str = "FEATURELANE_REGISTRY_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub registry: RegistrySection,

    #[serde(default)]
    pub reconciler: ReconcilerSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Path to the SQLite database
    #[serde(default = "default_registry_path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_executor_timeout_ms")]
    pub executor_timeout_ms: u64,

    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: u32,

    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    #[serde(default = "default_gc_retention_secs")]
    pub gc_retention_secs: u64,

    /// Backoff preset for job resubmissions (default, aggressive, conservative)
    #[serde(default = "default_retry_policy")]
    pub retry_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// pretty or json
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_registry_path() -> String {
    ".featurelane/registry.db".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_executor_timeout_ms() -> u64 {
    10_000
}

fn default_max_job_retries() -> u32 {
    3
}

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_gc_retention_secs() -> u64 {
    3600
}

fn default_retry_policy() -> String {
    "default".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval_secs(),
            executor_timeout_ms: default_executor_timeout_ms(),
            max_job_retries: default_max_job_retries(),
            max_conflict_retries: default_max_conflict_retries(),
            gc_retention_secs: default_gc_retention_secs(),
            retry_policy: default_retry_policy(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl ReconcilerSection {
    /// Build the loop configuration. Dry runs keep jobs out of the registry.
    pub fn to_reconciler_config(&self, dry_run: bool) -> Result<ReconcilerConfig> {
        if self.workers == 0 {
            bail!("reconciler.workers must be at least 1");
        }
        let retry_policy = RetryPolicy::from_preset(&self.retry_policy).with_context(|| {
            format!(
                "Unknown retry policy '{}' (expected default, aggressive or conservative)",
                self.retry_policy
            )
        })?;

        Ok(ReconcilerConfig {
            workers: self.workers,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            executor_timeout: Duration::from_millis(self.executor_timeout_ms),
            max_job_retries: self.max_job_retries,
            max_conflict_retries: self.max_conflict_retries,
            gc_retention: Duration::from_secs(self.gc_retention_secs),
            retry_policy,
            persist_jobs: !dry_run,
            ..ReconcilerConfig::default()
        })
    }
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(String),
    /// No file given and none found at the default locations
    Defaults,
    /// The given file does not exist
    Missing(String),
}

impl ConfigSource {
    /// Report the source; called once logging is up
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded configuration from {}", path),
            ConfigSource::Defaults => info!("No configuration file found, using defaults"),
            ConfigSource::Missing(path) => {
                warn!("Configuration file {} not found, using defaults", path)
            }
        }
    }
}

const DEFAULT_LOCATIONS: [&str; 3] = [
    ".featurelane/config.yaml",
    "featurelane.yaml",
    "featurelane.yml",
];

/// Load configuration from `config_path`, or the first default location
/// that exists, then apply environment overrides.
pub fn load_config(config_path: Option<&str>) -> Result<(ControllerConfig, ConfigSource)> {
    let (config, source) = match config_path {
        Some(path) if Path::new(path).exists() => {
            (load_from_file(path)?, ConfigSource::File(path.to_string()))
        }
        Some(path) => (
            ControllerConfig::default(),
            ConfigSource::Missing(path.to_string()),
        ),
        None => match DEFAULT_LOCATIONS
            .iter()
            .find(|location| Path::new(location).exists())
        {
            Some(location) => (
                load_from_file(location)?,
                ConfigSource::File(location.to_string()),
            ),
            None => (ControllerConfig::default(), ConfigSource::Defaults),
        },
    };

    Ok((
        apply_overrides(config, std::env::var(REGISTRY_PATH_ENV).ok()),
        source,
    ))
}

fn load_from_file(path: &str) -> Result<ControllerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse YAML config: {}", path))
}

fn apply_overrides(mut config: ControllerConfig, registry_path: Option<String>) -> ControllerConfig {
    if let Some(path) = registry_path.filter(|p| !p.trim().is_empty()) {
        config.registry.path = path;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.registry.path, ".featurelane/registry.db");
        assert_eq!(config.reconciler.workers, 4);
        assert_eq!(config.reconciler.poll_interval_secs, 30);
        assert_eq!(config.reconciler.max_job_retries, 3);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_yaml_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("featurelane.yaml");
        let yaml_content = r#"
registry:
  path: /custom/registry.db
reconciler:
  workers: 8
  poll_interval_secs: 5
  executor_timeout_ms: 2500
  max_job_retries: 6
  max_conflict_retries: 1
  gc_retention_secs: 60
  retry_policy: aggressive
logging:
  format: json
"#;
        std::fs::write(&config_path, yaml_content).unwrap();

        let config = load_from_file(config_path.to_str().unwrap()).unwrap();

        assert_eq!(config.registry.path, "/custom/registry.db");
        assert_eq!(config.reconciler.workers, 8);
        assert_eq!(config.reconciler.executor_timeout_ms, 2500);
        assert_eq!(config.reconciler.retry_policy, "aggressive");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("minimal.yaml");
        std::fs::write(&config_path, "reconciler:\n  workers: 2\n").unwrap();

        let config = load_from_file(config_path.to_str().unwrap()).unwrap();

        assert_eq!(config.reconciler.workers, 2);
        assert_eq!(config.reconciler.gc_retention_secs, 3600);
        assert_eq!(config.registry, RegistrySection::default());
        assert_eq!(config.logging, LoggingSection::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let (config, source) = load_config(Some("/nonexistent/featurelane.yaml")).unwrap();
        assert_eq!(
            source,
            ConfigSource::Missing("/nonexistent/featurelane.yaml".to_string())
        );
        assert_eq!(config.reconciler, ReconcilerSection::default());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        std::fs::write(&config_path, "registry:\n  path: [unterminated").unwrap();

        let result = load_config(Some(config_path.to_str().unwrap()));
        assert!(result.is_err());
    }

    #[test]
    fn test_registry_path_override() {
        let config = apply_overrides(
            ControllerConfig::default(),
            Some("/env/registry.db".to_string()),
        );
        assert_eq!(config.registry.path, "/env/registry.db");

        let config = apply_overrides(ControllerConfig::default(), Some("  ".to_string()));
        assert_eq!(config.registry.path, ".featurelane/registry.db");
    }

    #[test]
    fn test_to_reconciler_config() {
        let section = ReconcilerSection {
            poll_interval_secs: 5,
            executor_timeout_ms: 250,
            ..ReconcilerSection::default()
        };

        let config = section.to_reconciler_config(false).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.executor_timeout, Duration::from_millis(250));
        assert!(config.persist_jobs);

        assert!(!section.to_reconciler_config(true).unwrap().persist_jobs);
    }

    #[test]
    fn test_invalid_reconciler_settings_rejected() {
        let unknown_policy = ReconcilerSection {
            retry_policy: "yolo".to_string(),
            ..ReconcilerSection::default()
        };
        let err = unknown_policy.to_reconciler_config(false).unwrap_err();
        assert!(err.to_string().contains("yolo"));

        let no_workers = ReconcilerSection {
            workers: 0,
            ..ReconcilerSection::default()
        };
        assert!(no_workers.to_reconciler_config(false).is_err());
    }
}
