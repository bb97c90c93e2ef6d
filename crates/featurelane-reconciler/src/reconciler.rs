//! Ingestion job reconciliation loop
//!
//! Each cycle:
//!
//! 1. Refresh the registry snapshot and tag the cycle with its version
//! 2. Poll the executor for every `PENDING`, `RUNNING` and `ABORTING` job
//! 3. Plan the desired topology and [`diff`] it against the live jobs,
//!    leaving out jobs of stores whose registry record is quarantined
//! 4. Apply the actions on a bounded worker pool, one at a time per store
//! 5. Drop old `ABORTED` jobs
//!
//! Before an action is applied its cycle's snapshot version is compared with
//! the registry's latest. On mismatch the action is discarded and the cycle
//! is rerun against the newer snapshot, up to `max_conflict_retries` times.

use crate::executor::{
    ExecutorClient, ExecutorHandle, ExecutorStatus, JobSpec, StopAck, TimeoutExecutor,
};
use crate::observability;
use crate::planner::{plan, DesiredJob, DesiredTopology};
use chrono::{DateTime, Utc};
use featurelane_core::retry::{is_retryable, retry_async_if, RetryPolicy};
use featurelane_core::{recover_mutex, Error, IngestionJob, JobStatus, Result};
use featurelane_registry::{FeatureRegistry, RegistrySnapshot};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Reconciliation loop configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Actions applied concurrently (distinct stores only)
    pub workers: usize,
    /// Fallback cycle interval when no snapshot change arrives
    pub poll_interval: Duration,
    /// Upper bound for every executor call
    pub executor_timeout: Duration,
    /// Resubmissions of a failed job before it is left in `ERROR`
    pub max_job_retries: u32,
    /// Immediate reruns of a superseded cycle
    pub max_conflict_retries: u32,
    /// How long `ABORTED` jobs are kept before removal
    pub gc_retention: Duration,
    /// Backoff between job resubmissions
    pub retry_policy: RetryPolicy,
    /// Retries of a single executor call
    pub executor_retry: RetryPolicy,
    /// Save jobs through the registry; off for dry runs
    pub persist_jobs: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(30),
            executor_timeout: Duration::from_secs(10),
            max_job_retries: 3,
            max_conflict_retries: 3,
            gc_retention: Duration::from_secs(3600),
            retry_policy: RetryPolicy::default(),
            executor_retry: RetryPolicy::conservative(),
            persist_jobs: true,
        }
    }
}

/// One step bringing a store's job closer to its desired state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// No live job: start a new one
    Create {
        store_name: String,
        desired: DesiredJob,
    },
    /// Live job on another revision: drain it and submit a replacement
    /// under the same id
    Update {
        job_id: String,
        store_name: String,
        desired: DesiredJob,
    },
    /// Store no longer desired
    Stop { job_id: String, store_name: String },
    /// Failed job with retries left: resubmit it unchanged
    Retry {
        job_id: String,
        store_name: String,
        desired: DesiredJob,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Update { .. } => "update",
            Action::Stop { .. } => "stop",
            Action::Retry { .. } => "retry",
        }
    }

    pub fn store_name(&self) -> &str {
        match self {
            Action::Create { store_name, .. }
            | Action::Update { store_name, .. }
            | Action::Stop { store_name, .. }
            | Action::Retry { store_name, .. } => store_name,
        }
    }
}

/// Compute the actions that move `current` towards `desired`.
///
/// `current` maps each store to its live job. Pure; an empty result means the
/// topology has converged.
pub fn diff(
    current: &BTreeMap<String, IngestionJob>,
    desired: &DesiredTopology,
    max_job_retries: u32,
    now: DateTime<Utc>,
) -> Vec<Action> {
    let mut actions = Vec::new();

    for (store_name, want) in desired {
        let Some(job) = current.get(store_name) else {
            actions.push(Action::Create {
                store_name: store_name.clone(),
                desired: want.clone(),
            });
            continue;
        };

        let on_target = job.revision == want.revision();
        let update = || Action::Update {
            job_id: job.id.clone(),
            store_name: store_name.clone(),
            desired: want.clone(),
        };

        let action = match job.status {
            JobStatus::Pending | JobStatus::Running if on_target => None,
            JobStatus::Pending | JobStatus::Running | JobStatus::Aborting => Some(update()),
            JobStatus::Error if !on_target => Some(update()),
            JobStatus::Error => {
                let exhausted = job.attempts > max_job_retries;
                let due = job.next_retry_at.map_or(true, |at| at <= now);
                (!exhausted && due).then(|| Action::Retry {
                    job_id: job.id.clone(),
                    store_name: store_name.clone(),
                    desired: want.clone(),
                })
            }
            JobStatus::Aborted => Some(Action::Create {
                store_name: store_name.clone(),
                desired: want.clone(),
            }),
        };
        actions.extend(action);
    }

    for (store_name, job) in current {
        if desired.contains_key(store_name) {
            continue;
        }
        match job.status {
            JobStatus::Pending | JobStatus::Running | JobStatus::Error => {
                actions.push(Action::Stop {
                    job_id: job.id.clone(),
                    store_name: store_name.clone(),
                })
            }
            // Drained for a replacement that is no longer wanted
            JobStatus::Aborting if job.executor_handle.is_none() => actions.push(Action::Stop {
                job_id: job.id.clone(),
                store_name: store_name.clone(),
            }),
            // Waiting for the executor to confirm
            JobStatus::Aborting | JobStatus::Aborted => {}
        }
    }

    actions
}

/// The newest live job of every store
pub fn live_jobs_by_store<'a>(
    jobs: impl IntoIterator<Item = &'a IngestionJob>,
) -> BTreeMap<String, IngestionJob> {
    let mut live: BTreeMap<String, IngestionJob> = BTreeMap::new();
    for job in jobs.into_iter().filter(|j| j.is_live()) {
        match live.get(&job.store_name) {
            Some(existing) if existing.created_at >= job.created_at => {}
            _ => {
                live.insert(job.store_name.clone(), job.clone());
            }
        }
    }
    live
}

fn generate_job_id(store_name: &str) -> String {
    format!(
        "{}-{}-{:08x}",
        store_name,
        Utc::now().format("%Y%m%d%H%M%S"),
        rand::random::<u32>()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    /// Nothing left to do by the time the action ran
    Skipped,
    /// Discarded because a newer snapshot exists
    Superseded,
    Failed,
}

/// Summary of one `run_cycle` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Version the last attempt was planned against
    pub snapshot_version: u64,
    /// Planning attempts, including superseded ones
    pub attempts: u32,
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Still superseded after the last allowed attempt
    pub superseded: bool,
    /// Jobs removed by garbage collection
    pub collected: usize,
}

impl CycleReport {
    /// Whether the cycle found nothing to do
    pub fn is_noop(&self) -> bool {
        self.applied == 0 && self.failed == 0 && !self.superseded
    }
}

/// Drives ingestion jobs towards the registry's desired topology
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<FeatureRegistry>,
    executor: Arc<dyn ExecutorClient>,
    config: ReconcilerConfig,
    /// Every known job by id
    jobs: Arc<Mutex<BTreeMap<String, IngestionJob>>>,
    store_locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
    workers: Arc<Semaphore>,
    cycle_lock: Arc<Mutex<()>>,
}

impl Reconciler {
    /// Build a reconciler, reloading persisted jobs so a restarted
    /// controller resumes where it stopped.
    pub async fn load(
        registry: Arc<FeatureRegistry>,
        executor: Arc<dyn ExecutorClient>,
        config: ReconcilerConfig,
    ) -> Result<Self> {
        let jobs = if config.persist_jobs {
            registry.list_jobs().await?
        } else {
            Vec::new()
        };
        info!("Loaded {} ingestion jobs", jobs.len());

        let executor: Arc<dyn ExecutorClient> =
            Arc::new(TimeoutExecutor::new(executor, config.executor_timeout));
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));

        Ok(Self {
            registry,
            executor,
            jobs: Arc::new(Mutex::new(
                jobs.into_iter().map(|job| (job.id.clone(), job)).collect(),
            )),
            store_locks: Arc::new(StdMutex::new(HashMap::new())),
            workers,
            cycle_lock: Arc::new(Mutex::new(())),
            config,
        })
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Every known job, ordered by id
    pub async fn jobs(&self) -> Vec<IngestionJob> {
        self.jobs.lock().await.values().cloned().collect()
    }

    /// The live job of `store_name`, if any
    pub async fn live_job(&self, store_name: &str) -> Option<IngestionJob> {
        live_jobs_by_store(self.jobs.lock().await.values()).remove(store_name)
    }

    /// Run the loop until `shutdown` fires.
    ///
    /// A cycle starts on every snapshot change and at least every
    /// `poll_interval`. Cycle failures are logged and do not end the loop.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut changes = self.registry.subscribe();
        info!(
            workers = self.config.workers,
            poll_interval = ?self.config.poll_interval,
            "Starting reconciliation loop"
        );

        loop {
            // Mark seen before planning so changes made mid-cycle wake us
            changes.borrow_and_update();

            match self.run_cycle().await {
                Ok(report) if report.is_noop() => {
                    debug!(snapshot = report.snapshot_version, "Topology converged");
                }
                Ok(report) => {
                    info!(
                        snapshot = report.snapshot_version,
                        applied = report.applied,
                        failed = report.failed,
                        superseded = report.superseded,
                        "Reconciliation cycle finished"
                    );
                }
                Err(e) => {
                    observability::increment_cycles("error");
                    error!(error = %e, kind = %e.kind(), "Reconciliation cycle failed");
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown requested, stopping reconciliation loop");
                    break;
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        warn!("Registry snapshot channel closed, stopping reconciliation loop");
                        break;
                    }
                    debug!("Registry snapshot changed");
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        Ok(())
    }

    /// Run one reconciliation cycle, rerunning it while it is superseded.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _cycle = self.cycle_lock.lock().await;
        let _timer = observability::time_cycle();
        let mut report = CycleReport::default();

        for attempt in 0..=self.config.max_conflict_retries {
            report.attempts = attempt + 1;

            let snapshot = self.registry.refresh().await?;
            report.snapshot_version = snapshot.version();

            self.refresh_statuses().await?;

            let desired = plan(&snapshot)?;
            let mut current = live_jobs_by_store(self.jobs.lock().await.values());
            // A quarantined store's job keeps running until the row is repaired
            current.retain(|store_name, _| !snapshot.is_quarantined(store_name));
            let actions = diff(&current, &desired, self.config.max_job_retries, Utc::now());
            debug!(
                snapshot = snapshot.version(),
                actions = actions.len(),
                "Planned reconciliation cycle"
            );

            let outcomes = self.execute(snapshot.version(), actions).await;
            let mut superseded = false;
            for outcome in outcomes {
                match outcome {
                    ActionOutcome::Applied => report.applied += 1,
                    ActionOutcome::Skipped => report.skipped += 1,
                    ActionOutcome::Failed => report.failed += 1,
                    ActionOutcome::Superseded => superseded = true,
                }
            }

            if !superseded {
                report.superseded = false;
                report.collected = self
                    .collect_garbage(&snapshot, &desired, Utc::now())
                    .await?;
                observability::increment_cycles(if report.failed > 0 {
                    "partial"
                } else {
                    "converged"
                });
                return Ok(report);
            }

            report.superseded = true;
            observability::increment_superseded();
            warn!(
                snapshot = snapshot.version(),
                attempt = attempt + 1,
                "Reconciliation cycle superseded by a newer snapshot"
            );
        }

        warn!(
            attempts = report.attempts,
            "Cycle still superseded after {} attempts; waiting for the next trigger",
            report.attempts
        );
        observability::increment_cycles("superseded");
        Ok(report)
    }

    /// Apply `actions` planned against `snapshot_version`.
    ///
    /// Actions run on the worker pool; actions on the same store never
    /// overlap. Each one is discarded as superseded if the registry moved
    /// past `snapshot_version`.
    pub async fn execute(&self, snapshot_version: u64, actions: Vec<Action>) -> Vec<ActionOutcome> {
        let mut tasks = JoinSet::new();

        for action in actions {
            let this = self.clone();
            tasks.spawn(async move {
                let Ok(_permit) = this.workers.clone().acquire_owned().await else {
                    return ActionOutcome::Failed;
                };
                let store_lock = match this.store_lock(action.store_name()) {
                    Ok(lock) => lock,
                    Err(e) => {
                        error!(error = %e, "Failed to acquire store lock");
                        return ActionOutcome::Failed;
                    }
                };
                let _store = store_lock.lock().await;
                this.apply_guarded(snapshot_version, action).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Reconcile task panicked: {}", e);
                    outcomes.push(ActionOutcome::Failed);
                }
            }
        }
        outcomes
    }

    fn store_lock(&self, store_name: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = recover_mutex(&self.store_locks, "Reconciler store locks")?;
        Ok(locks
            .entry(store_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    async fn apply_guarded(&self, snapshot_version: u64, action: Action) -> ActionOutcome {
        match self.registry.latest_version().await {
            Ok(latest) if latest != snapshot_version => {
                debug!(
                    store = %action.store_name(),
                    planned = snapshot_version,
                    latest,
                    "Discarding action planned against a stale snapshot"
                );
                return ActionOutcome::Superseded;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Failed to read latest snapshot version");
                return ActionOutcome::Failed;
            }
        }

        let kind = action.kind();
        let store_name = action.store_name().to_string();
        let result = match action {
            Action::Create {
                store_name,
                desired,
            } => self.create(store_name, desired).await.map(|_| true),
            Action::Update {
                job_id, desired, ..
            } => self.update(&job_id, desired).await,
            Action::Stop { job_id, .. } => self.stop(&job_id).await,
            Action::Retry {
                job_id, desired, ..
            } => self.retry(&job_id, desired).await,
        };

        match result {
            Ok(true) => {
                observability::increment_actions(kind);
                ActionOutcome::Applied
            }
            Ok(false) => ActionOutcome::Skipped,
            Err(e) => {
                warn!(store = %store_name, action = kind, error = %e, "Action failed");
                ActionOutcome::Failed
            }
        }
    }

    async fn create(&self, store_name: String, desired: DesiredJob) -> Result<()> {
        let job = IngestionJob::new(
            generate_job_id(&store_name),
            store_name,
            desired.sources.clone(),
            desired.feature_set_refs.clone(),
            desired.config_version,
            desired.revision(),
        );
        info!(
            store = %job.store_name,
            job_id = %job.id,
            feature_sets = job.feature_set_refs.len(),
            "Creating ingestion job"
        );
        self.put_job(job.clone()).await?;
        self.submit(job, &desired).await
    }

    async fn update(&self, job_id: &str, desired: DesiredJob) -> Result<bool> {
        let mut job = self.job(job_id).await?;
        let revision = desired.revision();

        if job.revision == revision
            && matches!(job.status, JobStatus::Pending | JobStatus::Running)
        {
            return Ok(false);
        }

        // Drain the current run. An ABORTING job is already stopped.
        if job.status != JobStatus::Aborting {
            if let Some(handle) = job.executor_handle.clone() {
                match self.call_stop(&ExecutorHandle(handle)).await {
                    Ok(ack) => {
                        if ack.checkpoint.is_some() {
                            job.checkpoint = ack.checkpoint;
                        }
                    }
                    // A failed run has nothing left to drain
                    Err(e) if job.status == JobStatus::Error => {
                        debug!(job_id = %job.id, error = %e, "Stop of failed run did not complete");
                    }
                    Err(e) => return Err(e),
                }
            }
            // The old run is gone; a restart resumes the replacement from here
            job.executor_handle = None;
            job.transition_to(JobStatus::Aborting)?;
            self.put_job(job.clone()).await?;
        }

        job.transition_to(JobStatus::Pending)?;
        job.executor_handle = None;
        job.feature_set_refs = desired.feature_set_refs.clone();
        job.sources = desired.sources.clone();
        job.config_version = desired.config_version;
        job.revision = revision;
        job.attempts = 0;
        job.next_retry_at = None;
        job.last_error = None;
        self.put_job(job.clone()).await?;

        info!(
            store = %job.store_name,
            job_id = %job.id,
            checkpoint = ?job.checkpoint,
            "Submitting replacement ingestion job"
        );
        self.submit(job, &desired).await?;
        Ok(true)
    }

    async fn stop(&self, job_id: &str) -> Result<bool> {
        let mut job = self.job(job_id).await?;

        match job.status {
            JobStatus::Error => {
                if let Some(handle) = job.executor_handle.clone() {
                    if let Err(e) = self.call_stop(&ExecutorHandle(handle)).await {
                        debug!(job_id = %job.id, error = %e, "Stop of failed run did not complete");
                    }
                }
                job.transition_to(JobStatus::Aborted)?;
            }
            JobStatus::Pending | JobStatus::Running => match job.executor_handle.clone() {
                Some(handle) => {
                    let ack = self.call_stop(&ExecutorHandle(handle)).await?;
                    if ack.checkpoint.is_some() {
                        job.checkpoint = ack.checkpoint;
                    }
                    job.transition_to(JobStatus::Aborting)?;
                }
                None => {
                    job.transition_to(JobStatus::Aborting)?;
                    job.transition_to(JobStatus::Aborted)?;
                }
            },
            JobStatus::Aborting if job.executor_handle.is_none() => {
                job.transition_to(JobStatus::Aborted)?;
            }
            JobStatus::Aborting | JobStatus::Aborted => return Ok(false),
        }

        info!(store = %job.store_name, job_id = %job.id, status = %job.status, "Stopping ingestion job");
        self.put_job(job).await?;
        Ok(true)
    }

    async fn retry(&self, job_id: &str, desired: DesiredJob) -> Result<bool> {
        let mut job = self.job(job_id).await?;
        if job.status != JobStatus::Error {
            return Ok(false);
        }

        job.transition_to(JobStatus::Pending)?;
        job.executor_handle = None;
        job.next_retry_at = None;
        self.put_job(job.clone()).await?;

        info!(
            store = %job.store_name,
            job_id = %job.id,
            attempt = job.attempts,
            "Retrying ingestion job"
        );
        self.submit(job, &desired).await?;
        Ok(true)
    }

    /// Submit a `PENDING` job, recording the handle or the failure
    async fn submit(&self, mut job: IngestionJob, desired: &DesiredJob) -> Result<()> {
        let spec = JobSpec {
            job_id: job.id.clone(),
            store_name: job.store_name.clone(),
            store_config: desired.store_config.clone(),
            sources: job.sources.clone(),
            feature_set_refs: job.feature_set_refs.clone(),
            revision: job.revision,
            resume_from: job.checkpoint.clone(),
        };

        match self.call_submit(&spec).await {
            Ok(handle) => {
                debug!(job_id = %job.id, handle = %handle, "Job submitted");
                job.executor_handle = Some(handle.0);
                self.put_job(job).await
            }
            Err(e) => {
                self.record_failure(&mut job, e.to_string())?;
                self.put_job(job).await?;
                Err(e)
            }
        }
    }

    fn record_failure(&self, job: &mut IngestionJob, reason: String) -> Result<()> {
        let retry_at = self.retry_at(job.attempts + 1);
        job.fail(reason, Some(retry_at))?;

        if job.attempts > self.config.max_job_retries {
            error!(
                store = %job.store_name,
                job_id = %job.id,
                attempts = job.attempts,
                error = ?job.last_error,
                "Ingestion job retries exhausted"
            );
        } else {
            warn!(
                store = %job.store_name,
                job_id = %job.id,
                attempts = job.attempts,
                retry_at = %retry_at,
                error = ?job.last_error,
                "Ingestion job failed"
            );
        }
        Ok(())
    }

    fn retry_at(&self, attempts: u32) -> DateTime<Utc> {
        let delay = self
            .config
            .retry_policy
            .backoff_delay(attempts.saturating_sub(1) as usize);
        Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Poll the executor for every job it may still be running and fold the
    /// answers into job state. Unreachable executors leave jobs untouched.
    pub async fn refresh_statuses(&self) -> Result<()> {
        let active: Vec<IngestionJob> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.status.is_active())
            .cloned()
            .collect();

        for mut job in active {
            let Some(handle) = job.executor_handle.clone() else {
                // Interrupted between saving and submitting. A handle-less
                // ABORTING job is drained and left for the next diff.
                if job.status == JobStatus::Pending {
                    warn!(job_id = %job.id, "Pending job has no executor handle");
                    job.fail("submission did not complete", Some(Utc::now()))?;
                    self.put_job(job).await?;
                }
                continue;
            };

            let status = match self.call_status(&ExecutorHandle(handle)).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to poll job status");
                    continue;
                }
            };

            let changed = match (job.status, status) {
                (JobStatus::Pending, ExecutorStatus::Running) => {
                    job.transition_to(JobStatus::Running)?;
                    info!(store = %job.store_name, job_id = %job.id, "Ingestion job running");
                    true
                }
                (JobStatus::Aborting, ExecutorStatus::Done | ExecutorStatus::Failed(_)) => {
                    job.transition_to(JobStatus::Aborted)?;
                    info!(store = %job.store_name, job_id = %job.id, "Ingestion job aborted");
                    true
                }
                (JobStatus::Pending | JobStatus::Running, ExecutorStatus::Done) => {
                    self.record_failure(&mut job, "executor reported the job finished".to_string())?;
                    true
                }
                (JobStatus::Pending | JobStatus::Running, ExecutorStatus::Failed(reason)) => {
                    self.record_failure(&mut job, reason)?;
                    true
                }
                _ => false,
            };

            if changed {
                self.put_job(job).await?;
            }
        }

        let jobs = self.jobs.lock().await;
        observability::record_job_statuses(jobs.values().map(|job| &job.status));
        Ok(())
    }

    /// Remove `ABORTED` jobs, and `ERROR` jobs of stores no longer desired,
    /// once they are older than `gc_retention`. Jobs of quarantined stores
    /// are kept. Returns how many were removed.
    pub async fn collect_garbage(
        &self,
        snapshot: &RegistrySnapshot,
        desired: &DesiredTopology,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.config.gc_retention)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let expired: Vec<String> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| {
                let collectable = match job.status {
                    JobStatus::Aborted => true,
                    JobStatus::Error => {
                        !desired.contains_key(&job.store_name)
                            && !snapshot.is_quarantined(&job.store_name)
                    }
                    _ => false,
                };
                collectable && job.updated_at + retention <= now
            })
            .map(|job| job.id.clone())
            .collect();

        for id in &expired {
            if self.config.persist_jobs {
                self.registry.delete_job(id).await?;
            }
            self.jobs.lock().await.remove(id);
            debug!(job_id = %id, "Collected finished job");
        }

        Ok(expired.len())
    }

    async fn job(&self, job_id: &str) -> Result<IngestionJob> {
        self.jobs
            .lock()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::internal(format!("unknown ingestion job '{}'", job_id)))
    }

    async fn put_job(&self, job: IngestionJob) -> Result<()> {
        if self.config.persist_jobs {
            self.registry.save_job(&job).await?;
        }
        self.jobs.lock().await.insert(job.id.clone(), job);
        Ok(())
    }

    async fn call_submit(&self, spec: &JobSpec) -> Result<ExecutorHandle> {
        let executor = &self.executor;
        retry_async_if(
            &self.config.executor_retry,
            move || executor.submit(spec),
            is_retryable,
        )
        .await
        .map_err(|e| {
            observability::increment_executor_errors("submit");
            e.error
        })
    }

    async fn call_status(&self, handle: &ExecutorHandle) -> Result<ExecutorStatus> {
        let executor = &self.executor;
        retry_async_if(
            &self.config.executor_retry,
            move || executor.status(handle),
            is_retryable,
        )
        .await
        .map_err(|e| {
            observability::increment_executor_errors("status");
            e.error
        })
    }

    async fn call_stop(&self, handle: &ExecutorHandle) -> Result<StopAck> {
        let executor = &self.executor;
        retry_async_if(
            &self.config.executor_retry,
            move || executor.stop(handle),
            is_retryable,
        )
        .await
        .map_err(|e| {
            observability::increment_executor_errors("stop");
            e.error
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurelane_core::{
        FeatureSetReference, RedisConfig, SourceDescriptor, StoreConfig, StoreType,
    };
    use std::collections::BTreeSet;

    fn desired(refs: &[(&str, &str)]) -> DesiredJob {
        DesiredJob {
            store_type: StoreType::Redis,
            store_config: StoreConfig::Redis(RedisConfig::new("redis", 6379)),
            config_version: 7,
            feature_set_refs: refs
                .iter()
                .map(|(p, n)| FeatureSetReference::new(*p, *n))
                .collect(),
            sources: BTreeSet::from([SourceDescriptor::kafka("kafka:9092", "events")]),
        }
    }

    fn job_for(store: &str, want: &DesiredJob, status: JobStatus) -> IngestionJob {
        let mut job = IngestionJob::new(
            format!("{}-job", store),
            store,
            want.sources.clone(),
            want.feature_set_refs.clone(),
            want.config_version,
            want.revision(),
        );
        job.status = status;
        job
    }

    fn topology(entries: Vec<(&str, DesiredJob)>) -> DesiredTopology {
        entries
            .into_iter()
            .map(|(name, job)| (name.to_string(), job))
            .collect()
    }

    fn current(jobs: Vec<IngestionJob>) -> BTreeMap<String, IngestionJob> {
        live_jobs_by_store(jobs.iter())
    }

    #[test]
    fn test_diff_creates_missing_jobs() {
        let want = desired(&[("ads", "click")]);
        let actions = diff(
            &BTreeMap::new(),
            &topology(vec![("online", want.clone())]),
            3,
            Utc::now(),
        );
        assert_eq!(
            actions,
            vec![Action::Create {
                store_name: "online".to_string(),
                desired: want
            }]
        );
    }

    #[test]
    fn test_diff_is_empty_when_converged() {
        let want = desired(&[("ads", "click")]);
        for status in [JobStatus::Pending, JobStatus::Running] {
            let jobs = current(vec![job_for("online", &want, status)]);
            assert!(diff(&jobs, &topology(vec![("online", want.clone())]), 3, Utc::now()).is_empty());
        }
    }

    #[test]
    fn test_diff_updates_changed_target() {
        let old = desired(&[("ads", "click"), ("ads", "view")]);
        let new = desired(&[("ads", "view"), ("ads", "conversion")]);
        let jobs = current(vec![job_for("online", &old, JobStatus::Running)]);

        let actions = diff(&jobs, &topology(vec![("online", new.clone())]), 3, Utc::now());
        assert_eq!(
            actions,
            vec![Action::Update {
                job_id: "online-job".to_string(),
                store_name: "online".to_string(),
                desired: new
            }]
        );
    }

    #[test]
    fn test_diff_stops_undesired_jobs() {
        let want = desired(&[("ads", "click")]);
        let jobs = current(vec![
            job_for("running", &want, JobStatus::Running),
            job_for("failed", &want, JobStatus::Error),
            job_for("draining", &want, JobStatus::Aborting),
        ]);

        let actions = diff(&jobs, &DesiredTopology::new(), 3, Utc::now());
        let stopped: Vec<&str> = actions.iter().map(|a| a.store_name()).collect();
        assert_eq!(stopped, vec!["failed", "running"]);
        assert!(actions.iter().all(|a| a.kind() == "stop"));
    }

    #[test]
    fn test_diff_finishes_interrupted_drains() {
        let want = desired(&[("ads", "click")]);
        let mut drained = job_for("online", &want, JobStatus::Aborting);
        drained.executor_handle = None;
        let mut draining = job_for("other", &want, JobStatus::Aborting);
        draining.executor_handle = Some("mem-1".to_string());

        let actions = diff(
            &current(vec![drained.clone(), draining]),
            &DesiredTopology::new(),
            3,
            Utc::now(),
        );
        assert_eq!(
            actions,
            vec![Action::Stop {
                job_id: drained.id.clone(),
                store_name: "online".to_string()
            }]
        );

        // Still desired: the replacement is resubmitted under the same id
        let actions = diff(&current(vec![drained]), &topology(vec![("online", want)]), 3, Utc::now());
        assert_eq!(actions[0].kind(), "update");
    }

    #[test]
    fn test_diff_recreates_after_abort() {
        let want = desired(&[("ads", "click")]);
        let jobs = vec![job_for("online", &want, JobStatus::Aborted)];
        let actions = diff(&current(jobs), &topology(vec![("online", want)]), 3, Utc::now());
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind(), "create");
    }

    #[test]
    fn test_diff_retries_until_exhausted() {
        let want = desired(&[("ads", "click")]);
        let now = Utc::now();
        let target = topology(vec![("online", want.clone())]);

        let mut failed = job_for("online", &want, JobStatus::Error);
        failed.attempts = 1;
        failed.next_retry_at = Some(now - chrono::Duration::seconds(1));
        let actions = diff(&current(vec![failed.clone()]), &target, 2, now);
        assert_eq!(actions[0].kind(), "retry");

        // Backoff not elapsed
        failed.next_retry_at = Some(now + chrono::Duration::seconds(60));
        assert!(diff(&current(vec![failed.clone()]), &target, 2, now).is_empty());

        // Exhausted
        failed.next_retry_at = None;
        failed.attempts = 3;
        assert!(diff(&current(vec![failed.clone()]), &target, 2, now).is_empty());

        // A new target resets the retry count through an update
        let changed = topology(vec![("online", desired(&[("ads", "view")]))]);
        let actions = diff(&current(vec![failed]), &changed, 2, now);
        assert_eq!(actions[0].kind(), "update");
    }

    #[test]
    fn test_live_jobs_prefers_newest() {
        let want = desired(&[("ads", "click")]);
        let aborted = job_for("online", &want, JobStatus::Aborted);
        let mut old = job_for("online", &want, JobStatus::Error);
        old.id = "old".to_string();
        let mut new = job_for("online", &want, JobStatus::Running);
        new.id = "new".to_string();
        new.created_at = old.created_at + chrono::Duration::seconds(5);

        let live = live_jobs_by_store([&aborted, &old, &new]);
        assert_eq!(live["online"].id, "new");
    }

    #[test]
    fn test_generated_job_ids_are_unique() {
        let a = generate_job_id("online");
        let b = generate_job_id("online");
        assert!(a.starts_with("online-"));
        assert_ne!(a, b);
    }
}
