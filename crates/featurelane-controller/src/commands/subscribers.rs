//! List the stores a feature set is delivered to

use anyhow::Result;
use featurelane_core::FeatureSetReference;

use crate::config::ControllerConfig;
use crate::output::{print_info, print_output, print_warning, OutputFormat};

use super::create_registry;

pub async fn run(config: &ControllerConfig, reference: &str, format: OutputFormat) -> Result<()> {
    let reference: FeatureSetReference = reference.parse()?;
    let registry = create_registry(config).await?;

    if registry.snapshot().feature_set(&reference).is_none() {
        print_warning(&format!(
            "Feature set {} is not registered; showing stores whose subscriptions match it",
            reference
        ));
    }

    let stores: Vec<String> = registry
        .get_subscribed_stores(&reference)
        .into_iter()
        .collect();

    match format {
        OutputFormat::Table if stores.is_empty() => {
            print_info(&format!("No store subscribes to {}", reference));
        }
        OutputFormat::Table => {
            for store in &stores {
                println!("{}", store);
            }
            println!("\nTotal: {} store(s)", stores.len());
        }
        _ => print_output(&stores, format)?,
    }

    Ok(())
}
