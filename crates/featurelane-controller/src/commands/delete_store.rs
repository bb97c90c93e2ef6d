//! Delete a store

use anyhow::Result;
use featurelane_core::Error;

use crate::config::ControllerConfig;
use crate::output::{print_error, print_success};

use super::create_registry;

pub async fn run(config: &ControllerConfig, name: &str) -> Result<()> {
    let registry = create_registry(config).await?;

    match registry.delete_store(name).await {
        Ok(()) => {
            print_success(&format!(
                "Deleted store '{}'; its ingestion job stops on the next reconciliation cycle",
                name
            ));
            Ok(())
        }
        Err(e @ Error::StoreNotFound(_)) => {
            print_error(&e.to_string());
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{temp_config, write_file, STORE_YAML};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_delete_store() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_config(&temp_dir);
        let file = write_file(&temp_dir, "online.yaml", STORE_YAML);
        crate::commands::apply_store::run(&config, &file, None)
            .await
            .unwrap();

        run(&config, "online").await.unwrap();

        let registry = create_registry(&config).await.unwrap();
        assert!(registry.snapshot().store("online").is_none());
        assert!(run(&config, "online").await.is_err());
    }
}
