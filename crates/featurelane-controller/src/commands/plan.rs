//! Show the desired job topology of the current registry snapshot

use anyhow::Result;
use comfy_table::Cell;
use featurelane_reconciler::{plan, DesiredTopology};
use serde::Serialize;

use crate::config::ControllerConfig;
use crate::output::{create_table, print_info, print_output, print_warning, OutputFormat};

use super::create_registry;

#[derive(Debug, Serialize)]
struct PlannedJob {
    store: String,
    store_type: String,
    feature_sets: Vec<String>,
    sources: Vec<String>,
    revision: String,
}

fn summarize(topology: &DesiredTopology) -> Vec<PlannedJob> {
    topology
        .iter()
        .map(|(store, job)| PlannedJob {
            store: store.clone(),
            store_type: job.store_type.to_string(),
            feature_sets: job.feature_set_refs.iter().map(|r| r.to_string()).collect(),
            sources: job.sources.iter().map(|s| s.to_string()).collect(),
            revision: format!("{:016x}", job.revision()),
        })
        .collect()
}

pub async fn run(config: &ControllerConfig, format: OutputFormat) -> Result<()> {
    let registry = create_registry(config).await?;
    let snapshot = registry.snapshot();
    let planned = summarize(&plan(&snapshot)?);

    for corrupt in snapshot.corrupt_stores() {
        print_warning(&format!(
            "Store '{}' ({}) is quarantined and left out of the plan: {}",
            corrupt.name, corrupt.store_type, corrupt.reason
        ));
    }

    if planned.is_empty() {
        print_info(&format!(
            "No store resolves any feature set at snapshot version {}",
            snapshot.version()
        ));
        return Ok(());
    }

    match format {
        OutputFormat::Table => {
            let mut table = create_table();
            table.set_header(vec!["Store", "Type", "Feature sets", "Sources", "Revision"]);
            for job in &planned {
                table.add_row(vec![
                    Cell::new(&job.store),
                    Cell::new(&job.store_type),
                    Cell::new(job.feature_sets.join("\n")),
                    Cell::new(job.sources.join("\n")),
                    Cell::new(&job.revision),
                ]);
            }
            println!("{table}");
            println!(
                "\nSnapshot version {}: {} ingestion job(s)",
                snapshot.version(),
                planned.len()
            );
        }
        _ => print_output(&planned, format)?,
    }

    Ok(())
}
