//! Registry backend trait and configuration
//!
//! Backends persist rows and bump the snapshot version; they know nothing
//! about subscriptions or schema compatibility. Those rules live in
//! [`FeatureRegistry`](crate::FeatureRegistry).

use crate::record::StoreRecord;
use anyhow::Result;
use async_trait::async_trait;
use featurelane_core::{FeatureSetReference, FeatureSetSpec, IngestionJob};

/// Full registry contents at one snapshot version
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    pub version: u64,
    pub feature_sets: Vec<FeatureSetSpec>,
    pub stores: Vec<StoreRecord>,
}

/// Result of a compare-and-swap store commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCommit {
    /// Row written; carries the new store version
    Committed { store_version: u64 },
    /// Expected version did not match; carries the version found (0 = absent)
    Conflict { actual: u64 },
}

/// Registry backend trait for storage operations
///
/// Every mutating call bumps the global snapshot version atomically with the
/// row change and is a no-op (returning `None`/`false`) when there is
/// nothing to change.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Initialize schema (create tables, indexes)
    async fn init_schema(&self) -> Result<()>;

    /// Read every feature set and store plus the version they belong to
    async fn load_state(&self) -> Result<RegistryState>;

    async fn get_feature_set(&self, reference: &FeatureSetReference)
        -> Result<Option<FeatureSetSpec>>;

    /// Insert or replace a feature set; returns the new snapshot version
    async fn put_feature_set(&self, spec: &FeatureSetSpec) -> Result<u64>;

    /// Returns the new snapshot version, or `None` if nothing was deleted
    async fn delete_feature_set(&self, reference: &FeatureSetReference) -> Result<Option<u64>>;

    /// Write a store row if its current version equals `expected`
    /// (`None` skips the check, `Some(0)` requires the row to be absent).
    async fn commit_store(&self, record: &StoreRecord, expected: Option<u64>)
        -> Result<StoreCommit>;

    /// Returns the new snapshot version, or `None` if nothing was deleted
    async fn delete_store(&self, name: &str) -> Result<Option<u64>>;

    /// Latest committed snapshot version
    async fn snapshot_version(&self) -> Result<u64>;

    /// Insert or replace a job
    async fn save_job(&self, job: &IngestionJob) -> Result<()>;

    async fn list_jobs(&self) -> Result<Vec<IngestionJob>>;

    /// Returns whether a job was deleted
    async fn delete_job(&self, id: &str) -> Result<bool>;
}

/// Configuration for registry backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryConfig {
    /// SQLite with WAL mode (embedded, multi-process safe)
    SQLite {
        /// Path to SQLite database file
        path: String,
    },
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::SQLite {
            path: ".featurelane/registry.db".to_string(),
        }
    }
}

impl RegistryConfig {
    /// Create SQLite configuration
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self::SQLite { path: path.into() }
    }
}
