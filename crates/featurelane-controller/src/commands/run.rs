//! Run the reconciliation loop

use anyhow::Result;
use featurelane_reconciler::{InMemoryExecutor, Reconciler};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::output::{print_info, print_warning};
use crate::shutdown::ShutdownCoordinator;

use super::create_registry;
use super::jobs::jobs_table;

/// Drive ingestion jobs until SIGINT or SIGTERM.
///
/// The controller ships with the in-process executor; deployments with a
/// stream runtime embed [`Reconciler`] with their own `ExecutorClient`.
/// `dry_run` runs a single cycle without saving jobs to the registry.
pub async fn run(config: &ControllerConfig, dry_run: bool) -> Result<()> {
    let registry = create_registry(config).await?;
    let reconciler_config = config.reconciler.to_reconciler_config(dry_run)?;
    let reconciler = Reconciler::load(
        registry,
        Arc::new(InMemoryExecutor::new()),
        reconciler_config,
    )
    .await?;

    if dry_run {
        print_warning("Dry run: one cycle against the in-process executor, jobs are not saved");
        let report = reconciler.run_cycle().await?;
        print_info(&format!(
            "Snapshot version {}: {} action(s) applied, {} failed",
            report.snapshot_version, report.applied, report.failed
        ));
        let jobs = reconciler.jobs().await;
        if !jobs.is_empty() {
            println!("{}", jobs_table(&jobs));
        }
        return Ok(());
    }

    info!(
        registry = %config.registry.path,
        workers = config.reconciler.workers,
        "Starting featurelane controller with the in-process executor"
    );

    let coordinator = ShutdownCoordinator::default();
    let mut shutdown = coordinator.subscribe();
    let loop_shutdown = coordinator.subscribe();
    coordinator.listen_for_signals();

    let mut loop_task = tokio::spawn(async move { reconciler.run(loop_shutdown).await });

    tokio::select! {
        joined = &mut loop_task => {
            joined??;
            warn!("Reconciliation loop exited without a shutdown request");
            return Ok(());
        }
        _ = shutdown.recv() => {}
    }

    match coordinator.drain(loop_task).await {
        Some(joined) => joined??,
        None => warn!("Reconciliation loop still busy, exiting anyway"),
    }
    info!("Controller stopped");
    Ok(())
}
