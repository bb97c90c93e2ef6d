//! Ingestion jobs and their status state machine
//!
//! ```text
//!   PENDING ──► RUNNING ──► ABORTING ──► ABORTED
//!      │           │           │  ▲
//!      │           ▼           │  │
//!      └────────► ERROR ───────┼──┘
//!                  │  ▲        │
//!                  ▼  │        ▼
//!               (retry: PENDING)   (replacement: PENDING)
//! ```
//!
//! Jobs are only ever created and moved by the reconciliation loop.

use crate::error::{Error, Result};
use crate::types::{FeatureSetReference, SourceDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Aborting,
    Aborted,
    Error,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Aborting,
        JobStatus::Aborted,
        JobStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Aborting => "ABORTING",
            JobStatus::Aborted => "ABORTED",
            JobStatus::Error => "ERROR",
        }
    }

    /// Whether the state machine permits `self -> next`
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Error)
                | (Running, Error)
                | (Pending, Aborting)
                | (Running, Aborting)
                | (Error, Aborting)
                | (Aborting, Aborted)
                // replacement submitted after a drain
                | (Aborting, Pending)
                // bounded retry
                | (Error, Pending)
                | (Error, Aborted)
        )
    }

    /// Whether an executor is (or may still be) running work for this job
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Running | JobStatus::Aborting
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::CorruptRecord {
                record: "job status".to_string(),
                reason: format!("unknown status '{}'", s),
            })
    }
}

/// A long-running ingestion job feeding one store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    /// Stable identity, preserved across UPDATE replacements
    pub id: String,
    pub store_name: String,
    pub sources: BTreeSet<SourceDescriptor>,
    pub feature_set_refs: BTreeSet<FeatureSetReference>,
    pub status: JobStatus,
    pub executor_handle: Option<String>,
    /// Digest of the store config this job was submitted with
    pub config_version: u64,
    /// Digest of the full target (config version and feature set refs)
    pub revision: u64,
    /// Source offset reported by the last drain
    pub checkpoint: Option<String>,
    /// Failures since the job last received a new target; bounds retries
    pub attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionJob {
    pub fn new(
        id: impl Into<String>,
        store_name: impl Into<String>,
        sources: BTreeSet<SourceDescriptor>,
        feature_set_refs: BTreeSet<FeatureSetReference>,
        config_version: u64,
        revision: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            store_name: store_name.into(),
            sources,
            feature_set_refs,
            status: JobStatus::Pending,
            executor_handle: None,
            config_version,
            revision,
            checkpoint: None,
            attempts: 0,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting edges the state machine does not allow.
    pub fn transition_to(&mut self, next: JobStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failure and move to `ERROR`
    pub fn fail(&mut self, reason: impl Into<String>, retry_at: Option<DateTime<Utc>>) -> Result<()> {
        self.transition_to(JobStatus::Error)?;
        self.attempts += 1;
        self.last_error = Some(reason.into());
        self.next_retry_at = retry_at;
        Ok(())
    }

    /// Anything but `ABORTED` still occupies the store's job slot
    pub fn is_live(&self) -> bool {
        self.status != JobStatus::Aborted
    }
}
