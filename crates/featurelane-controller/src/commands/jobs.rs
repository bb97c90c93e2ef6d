//! Show ingestion jobs recorded in the registry

use anyhow::Result;
use comfy_table::{Cell, Table};
use featurelane_core::{IngestionJob, JobStatus};
use serde::Serialize;

use crate::config::ControllerConfig;
use crate::output::{create_table, format_status, print_info, print_output, truncate, OutputFormat};

use super::create_registry;

#[derive(Debug, Serialize)]
struct JobSummary {
    id: String,
    store: String,
    status: JobStatus,
    feature_sets: usize,
    attempts: u32,
    checkpoint: Option<String>,
    last_error: Option<String>,
    updated_at: String,
}

impl From<&IngestionJob> for JobSummary {
    fn from(job: &IngestionJob) -> Self {
        Self {
            id: job.id.clone(),
            store: job.store_name.clone(),
            status: job.status,
            feature_sets: job.feature_set_refs.len(),
            attempts: job.attempts,
            checkpoint: job.checkpoint.clone(),
            last_error: job.last_error.clone(),
            updated_at: job.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Jobs table, newest activity first
pub fn jobs_table(jobs: &[IngestionJob]) -> Table {
    let mut sorted: Vec<&IngestionJob> = jobs.iter().collect();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let mut table = create_table();
    table.set_header(vec![
        "ID",
        "Store",
        "Status",
        "Feature sets",
        "Attempts",
        "Updated",
        "Last error",
    ]);
    for job in sorted {
        let summary = JobSummary::from(job);
        table.add_row(vec![
            Cell::new(&summary.id),
            Cell::new(&summary.store),
            format_status(summary.status.as_str()),
            Cell::new(summary.feature_sets),
            Cell::new(summary.attempts),
            Cell::new(&summary.updated_at),
            Cell::new(
                summary
                    .last_error
                    .as_deref()
                    .map(|e| truncate(e, 60))
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]);
    }
    table
}

pub async fn run(
    config: &ControllerConfig,
    status: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let registry = create_registry(config).await?;
    let status = status.map(|s| s.parse::<JobStatus>()).transpose()?;

    let jobs: Vec<IngestionJob> = registry
        .list_jobs()
        .await?
        .into_iter()
        .filter(|job| status.map_or(true, |s| job.status == s))
        .collect();

    if jobs.is_empty() {
        print_info("No ingestion jobs found");
        return Ok(());
    }

    match format {
        OutputFormat::Table => {
            println!("{}", jobs_table(&jobs));
            println!("\nTotal: {} job(s)", jobs.len());
        }
        _ => {
            let summaries: Vec<JobSummary> = jobs.iter().map(JobSummary::from).collect();
            print_output(&summaries, format)?;
        }
    }

    Ok(())
}
