//! Register a feature set from a YAML definition

use anyhow::{Context, Result};
use featurelane_core::{FeatureSetReference, FeatureSetSpec};

use crate::config::ControllerConfig;
use crate::output::{print_info, print_success};

use super::{create_registry, read_yaml};

pub async fn run(config: &ControllerConfig, file: &str) -> Result<FeatureSetReference> {
    let registry = create_registry(config).await?;
    let spec: FeatureSetSpec = read_yaml(file)?;
    let reference = spec.reference();

    print_info(&format!(
        "Registering feature set {} ({} entities, {} features) from {}",
        reference,
        spec.entities.len(),
        spec.features.len(),
        spec.source
    ));

    let before = registry.snapshot().version();
    registry
        .register_feature_set(spec)
        .await
        .with_context(|| format!("Failed to register feature set {}", reference))?;

    if registry.snapshot().version() == before {
        print_info(&format!("Feature set {} is already up to date", reference));
    } else {
        let stores = registry.get_subscribed_stores(&reference);
        print_success(&format!(
            "Registered feature set {} (subscribed stores: {})",
            reference,
            if stores.is_empty() {
                "none".to_string()
            } else {
                stores.into_iter().collect::<Vec<_>>().join(", ")
            }
        ));
    }

    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{temp_config, write_file, FEATURE_SET_YAML};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_register_from_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_config(&temp_dir);
        let file = write_file(&temp_dir, "click.yaml", FEATURE_SET_YAML);

        let reference = run(&config, &file).await.unwrap();
        assert_eq!(reference, FeatureSetReference::new("ads", "click"));

        // Identical re-registration keeps the snapshot version
        let registry = create_registry(&config).await.unwrap();
        let version = registry.snapshot().version();
        run(&config, &file).await.unwrap();
        let registry = create_registry(&config).await.unwrap();
        assert_eq!(registry.snapshot().version(), version);
    }

    #[tokio::test]
    async fn test_incompatible_change_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_config(&temp_dir);
        let file = write_file(&temp_dir, "click.yaml", FEATURE_SET_YAML);
        run(&config, &file).await.unwrap();

        let retyped = FEATURE_SET_YAML.replace("value_type: INT64", "value_type: STRING");
        let file = write_file(&temp_dir, "click-v2.yaml", &retyped);
        assert!(run(&config, &file).await.is_err());
    }
}
