//! CLI command implementations

pub mod apply_store;
pub mod delete_store;
pub mod jobs;
pub mod plan;
pub mod register;
pub mod run;
pub mod subscribers;

use anyhow::{Context, Result};
use featurelane_registry::{FeatureRegistry, RegistryConfig};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::config::ControllerConfig;

/// Open the registry named by the configuration
pub async fn create_registry(config: &ControllerConfig) -> Result<Arc<FeatureRegistry>> {
    let registry = FeatureRegistry::new(RegistryConfig::sqlite(config.registry.path.clone()))
        .await
        .with_context(|| format!("Failed to open registry at {}", config.registry.path))?;
    Ok(Arc::new(registry))
}

/// Read and parse a YAML definition file
pub fn read_yaml<T: DeserializeOwned>(file: &str) -> Result<T> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read file: {}", file))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse YAML from: {}", file))
}
