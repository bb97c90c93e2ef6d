//! In-process executor
//!
//! Keeps jobs in memory instead of launching them on a stream runtime. Used
//! by tests and by the controller. Supports failure injection,
//! artificial latency and manual status control.

use crate::executor::{ExecutorClient, ExecutorHandle, ExecutorStatus, JobSpec, StopAck};
use async_trait::async_trait;
use featurelane_core::{recover_mutex, Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
struct MemoryJob {
    spec: JobSpec,
    status: ExecutorStatus,
    polls: u64,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<String, MemoryJob>,
    /// Submission key -> handle, only while that job is running
    live_keys: HashMap<String, String>,
    next_id: u64,
    submits: u64,
    stops: u64,
    failing_submits: u32,
    failing_stops: u32,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct InMemoryExecutor {
    state: Mutex<State>,
}

impl InMemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        recover_mutex(&self.state, "InMemoryExecutor")
    }

    async fn simulate_latency(&self) -> Result<()> {
        let latency = self.lock()?.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    /// Fail the next `count` submissions with an executor error
    pub fn fail_next_submits(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.failing_submits = count;
        }
    }

    /// Fail the next `count` stop requests with an executor error
    pub fn fail_next_stops(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.failing_stops = count;
        }
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut state) = self.lock() {
            state.latency = Some(latency);
        }
    }

    /// Force the status of a job; returns false for an unknown handle
    pub fn set_status(&self, handle: &str, status: ExecutorStatus) -> bool {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        let Some(job) = state.jobs.get_mut(handle) else {
            return false;
        };
        let key = job.spec.submission_key();
        let running = status == ExecutorStatus::Running;
        job.status = status;
        if running {
            state.live_keys.insert(key, handle.to_string());
        } else {
            state.live_keys.remove(&key);
        }
        true
    }

    /// Number of submissions that started a new job
    pub fn submit_count(&self) -> u64 {
        self.lock().map(|s| s.submits).unwrap_or(0)
    }

    pub fn stop_count(&self) -> u64 {
        self.lock().map(|s| s.stops).unwrap_or(0)
    }

    /// Specs of every job currently running, ordered by store name
    pub fn running_jobs(&self) -> Vec<JobSpec> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut specs: Vec<JobSpec> = state
            .jobs
            .values()
            .filter(|job| job.status == ExecutorStatus::Running)
            .map(|job| job.spec.clone())
            .collect();
        specs.sort_by(|a, b| a.store_name.cmp(&b.store_name));
        specs
    }

    pub fn spec(&self, handle: &str) -> Option<JobSpec> {
        self.lock()
            .ok()
            .and_then(|s| s.jobs.get(handle).map(|job| job.spec.clone()))
    }
}

#[async_trait]
impl ExecutorClient for InMemoryExecutor {
    async fn submit(&self, spec: &JobSpec) -> Result<ExecutorHandle> {
        self.simulate_latency().await?;
        let mut state = self.lock()?;

        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(Error::executor(format!(
                "injected submit failure for {}",
                spec.job_id
            )));
        }

        let key = spec.submission_key();
        if let Some(existing) = state.live_keys.get(&key) {
            debug!("Duplicate submission {} -> {}", key, existing);
            return Ok(ExecutorHandle(existing.clone()));
        }

        state.next_id += 1;
        state.submits += 1;
        let handle = format!("mem-{}", state.next_id);
        state.jobs.insert(
            handle.clone(),
            MemoryJob {
                spec: spec.clone(),
                status: ExecutorStatus::Running,
                polls: 0,
            },
        );
        state.live_keys.insert(key, handle.clone());

        debug!("Started in-memory job {} for {}", handle, spec.store_name);
        Ok(ExecutorHandle(handle))
    }

    async fn status(&self, handle: &ExecutorHandle) -> Result<ExecutorStatus> {
        self.simulate_latency().await?;
        let mut state = self.lock()?;

        // Handles from a previous process are lost jobs
        let Some(job) = state.jobs.get_mut(&handle.0) else {
            return Ok(ExecutorStatus::Failed(format!(
                "unknown executor handle '{}'",
                handle
            )));
        };
        if job.status == ExecutorStatus::Running {
            job.polls += 1;
        }
        Ok(job.status.clone())
    }

    async fn stop(&self, handle: &ExecutorHandle) -> Result<StopAck> {
        self.simulate_latency().await?;
        let mut state = self.lock()?;

        if state.failing_stops > 0 {
            state.failing_stops -= 1;
            return Err(Error::executor(format!("injected stop failure for {}", handle)));
        }

        let Some(job) = state.jobs.get_mut(&handle.0) else {
            debug!("Stop of unknown handle {}", handle);
            return Ok(StopAck::default());
        };
        job.status = ExecutorStatus::Done;
        let key = job.spec.submission_key();
        let checkpoint = format!("offset-{}", job.polls);

        state.live_keys.remove(&key);
        state.stops += 1;

        Ok(StopAck {
            checkpoint: Some(checkpoint),
        })
    }
}
