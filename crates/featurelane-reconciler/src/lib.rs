//! Ingestion job reconciliation for featurelane
//!
//! Keeps one long-running ingestion job per store in line with the
//! registry: the planner derives the desired topology from a registry
//! snapshot, the reconciler diffs it against the known jobs and drives an
//! external executor until the two agree.
//!
//! ## Key Components
//!
//! - **Planner**: `plan(snapshot)` -> desired job per store
//! - **Reconciler**: `diff` plus the event- and timer-driven loop that
//!   applies CREATE/UPDATE/STOP/RETRY actions
//! - **Executor**: the `ExecutorClient` seam, a timeout wrapper and an
//!   in-memory implementation
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use featurelane_reconciler::{InMemoryExecutor, Reconciler, ReconcilerConfig};
//!
//! let reconciler = Reconciler::load(registry, Arc::new(InMemoryExecutor::new()), ReconcilerConfig::default()).await?;
//! let report = reconciler.run_cycle().await?;
//! ```

pub mod executor;
pub mod memory_executor;
pub mod observability;
pub mod planner;
pub mod reconciler;

pub use executor::{ExecutorClient, ExecutorHandle, ExecutorStatus, JobSpec, StopAck, TimeoutExecutor};
pub use memory_executor::InMemoryExecutor;
pub use planner::{plan, DesiredJob, DesiredTopology};
pub use reconciler::{
    diff, live_jobs_by_store, Action, ActionOutcome, CycleReport, Reconciler, ReconcilerConfig,
};
