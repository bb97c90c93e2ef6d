//! Create or update a store from a YAML definition

use anyhow::{Context, Result};
use featurelane_core::{Error, Store};

use crate::config::ControllerConfig;
use crate::output::{print_error, print_info, print_success};

use super::{create_registry, read_yaml};

/// Apply the store in `file`.
///
/// Without `expected_version` the write is checked against the version seen
/// when the command started, so a concurrent edit is never overwritten.
pub async fn run(
    config: &ControllerConfig,
    file: &str,
    expected_version: Option<u64>,
) -> Result<u64> {
    let registry = create_registry(config).await?;
    let store: Store = read_yaml(file)?;
    let name = store.name.clone();

    let expected = expected_version.unwrap_or_else(|| registry.snapshot().store_version(&name));
    print_info(&format!(
        "Applying store '{}' ({}) with {} subscription(s)",
        name,
        store.store_type(),
        store.subscriptions.len()
    ));

    match registry.apply_store(store, Some(expected)).await {
        Ok(version) => {
            print_success(&format!("Store '{}' is now at version {}", name, version));
            Ok(version)
        }
        Err(Error::Conflict { actual, .. }) => {
            print_error(&format!(
                "Store '{}' changed concurrently (expected version {}, found {}); re-run to apply on top of it",
                name, expected, actual
            ));
            Err(anyhow::anyhow!("store '{}' version conflict", name))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to apply store '{}'", name)),
    }
}
