//! Executor client interface
//!
//! The stream-execution runtime that actually runs ingestion jobs is an
//! external system. The reconciliation loop only talks to it through
//! [`ExecutorClient`].
//!
//! ## Contract
//!
//! - `submit` is idempotent on [`JobSpec::submission_key`]: while a job
//!   submitted under a key is live, submitting the same key again returns
//!   the existing handle instead of starting a second job
//! - `stop` is best effort and returns the source checkpoint the job reached,
//!   if the runtime knows it
//! - Every call may fail transiently; [`TimeoutExecutor`] bounds each one

use async_trait::async_trait;
use featurelane_core::{
    Error, FeatureSetReference, Result, SourceDescriptor, StoreConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Everything the runtime needs to start one ingestion job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub job_id: String,
    pub store_name: String,
    pub store_config: StoreConfig,
    pub sources: BTreeSet<SourceDescriptor>,
    pub feature_set_refs: BTreeSet<FeatureSetReference>,
    pub revision: u64,
    /// Checkpoint of the drained predecessor to resume from
    pub resume_from: Option<String>,
}

impl JobSpec {
    pub fn submission_key(&self) -> String {
        format!("{}:{}", self.job_id, self.revision)
    }
}

/// Opaque runtime-assigned job handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutorHandle(pub String);

impl fmt::Display for ExecutorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ExecutorHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorStatus {
    Running,
    Done,
    Failed(String),
}

/// Acknowledgement of a stop request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopAck {
    pub checkpoint: Option<String>,
}

#[async_trait]
pub trait ExecutorClient: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> Result<ExecutorHandle>;

    async fn status(&self, handle: &ExecutorHandle) -> Result<ExecutorStatus>;

    async fn stop(&self, handle: &ExecutorHandle) -> Result<StopAck>;
}

/// Bounds every call of the wrapped client with a timeout.
///
/// An elapsed call fails with `Error::ExecutorTimeout`, which is retryable.
pub struct TimeoutExecutor {
    inner: Arc<dyn ExecutorClient>,
    timeout: Duration,
}

impl TimeoutExecutor {
    pub fn new(inner: Arc<dyn ExecutorClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::ExecutorTimeout {
                operation: operation.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl ExecutorClient for TimeoutExecutor {
    async fn submit(&self, spec: &JobSpec) -> Result<ExecutorHandle> {
        self.bounded("submit", self.inner.submit(spec)).await
    }

    async fn status(&self, handle: &ExecutorHandle) -> Result<ExecutorStatus> {
        self.bounded("status", self.inner.status(handle)).await
    }

    async fn stop(&self, handle: &ExecutorHandle) -> Result<StopAck> {
        self.bounded("stop", self.inner.stop(handle)).await
    }
}
