//! Feature registry for featurelane
//!
//! Persistent, versioned storage for feature sets, stores and the ingestion
//! jobs the reconciliation loop owns. Every mutation bumps a global snapshot
//! version and publishes a fresh immutable [`RegistrySnapshot`] on a watch
//! channel.
//!
//! # Concurrency
//!
//! - Writes through one `FeatureRegistry` are serialized by an async mutex
//! - `apply_store` accepts an expected store version and fails with
//!   `Error::Conflict` if another writer got there first
//! - The snapshot version is the single arbitration point for readers: the
//!   reconciliation loop compares it before applying each action
//!
//! # Examples
//!
//! ```rust,ignore
//! use featurelane_registry::{FeatureRegistry, RegistryConfig};
//!
//! let registry = FeatureRegistry::new(RegistryConfig::sqlite("./registry.db")).await?;
//! let version = registry.apply_store(store, Some(0)).await?;
//! let stores = registry.get_subscribed_stores(&"ads/click".parse()?);
//! ```

use featurelane_core::{
    Error, FeatureSetReference, FeatureSetSpec, IngestionJob, Result, Store,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info};

pub mod backend;
pub use backend::{RegistryBackend, RegistryConfig, RegistryState, StoreCommit};

mod record;
mod schema;
mod snapshot;
mod sqlite_backend;

pub use record::StoreRecord;
pub use snapshot::{CorruptStore, RegistrySnapshot, VersionedStore};
pub use sqlite_backend::SqliteBackend;

/// Feature registry with pluggable backend
pub struct FeatureRegistry {
    backend: Arc<dyn RegistryBackend>,
    snapshot_tx: watch::Sender<Arc<RegistrySnapshot>>,
    write_lock: Mutex<()>,
}

impl FeatureRegistry {
    /// Create new registry with specified backend configuration
    pub async fn new(config: RegistryConfig) -> Result<Self> {
        let backend: Arc<dyn RegistryBackend> = match config {
            RegistryConfig::SQLite { path } => Arc::new(SqliteBackend::new(&path)?),
        };
        Self::with_backend(backend).await
    }

    /// Create in-memory registry (for testing)
    pub async fn in_memory() -> Result<Self> {
        Self::with_backend(Arc::new(SqliteBackend::in_memory()?)).await
    }

    /// Wrap an existing backend, initializing its schema and loading the
    /// first snapshot.
    pub async fn with_backend(backend: Arc<dyn RegistryBackend>) -> Result<Self> {
        backend.init_schema().await?;
        let snapshot = RegistrySnapshot::from_state(backend.load_state().await?);
        log_quarantined(None, &snapshot);
        info!("Loaded registry snapshot version {}", snapshot.version());
        let (snapshot_tx, _) = watch::channel(Arc::new(snapshot));

        Ok(Self {
            backend,
            snapshot_tx,
            write_lock: Mutex::new(()),
        })
    }

    /// Current published snapshot
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified whenever a new snapshot is published
    pub fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Latest committed snapshot version in the backend.
    ///
    /// May be ahead of [`snapshot`](Self::snapshot) when another process
    /// wrote to the same database; call [`refresh`](Self::refresh) to catch up.
    pub async fn latest_version(&self) -> Result<u64> {
        Ok(self.backend.snapshot_version().await?)
    }

    /// Reload state from the backend and publish it if the version moved
    pub async fn refresh(&self) -> Result<Arc<RegistrySnapshot>> {
        let state = self.backend.load_state().await?;
        let current = self.snapshot();
        if state.version == current.version() {
            return Ok(current);
        }

        let snapshot = Arc::new(RegistrySnapshot::from_state(state));
        log_quarantined(Some(&current), &snapshot);
        self.snapshot_tx.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    /// Register a feature set or update it to a compatible new version.
    ///
    /// Re-registering an identical spec is a no-op and does not bump the
    /// snapshot version.
    pub async fn register_feature_set(&self, spec: FeatureSetSpec) -> Result<FeatureSetReference> {
        spec.validate()?;
        let reference = spec.reference();

        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.backend.get_feature_set(&reference).await? {
            if existing == spec {
                return Ok(reference);
            }
            existing.check_compatible(&spec)?;
        }

        let version = self.backend.put_feature_set(&spec).await?;
        self.refresh().await?;

        info!("Registered feature set {} at snapshot {}", reference, version);
        Ok(reference)
    }

    pub async fn delete_feature_set(&self, reference: &FeatureSetReference) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backend
            .delete_feature_set(reference)
            .await?
            .ok_or_else(|| Error::FeatureSetNotFound(reference.to_string()))?;
        self.refresh().await?;
        Ok(())
    }

    /// Create or replace a store.
    ///
    /// `expected_version` turns the write into a compare-and-swap on the
    /// store's version: `Some(0)` requires that the store does not exist yet.
    /// Returns the new store version.
    pub async fn apply_store(&self, store: Store, expected_version: Option<u64>) -> Result<u64> {
        store.validate()?;
        let record = StoreRecord::from_store(&store, expected_version.unwrap_or(0))?;

        let _guard = self.write_lock.lock().await;
        match self.backend.commit_store(&record, expected_version).await? {
            StoreCommit::Committed { store_version } => {
                self.refresh().await?;
                info!(
                    store = %store.name,
                    store_type = %store.store_type(),
                    "Applied store at version {}",
                    store_version
                );
                Ok(store_version)
            }
            StoreCommit::Conflict { actual } => Err(Error::Conflict {
                target: format!("store/{}", store.name),
                expected: expected_version.unwrap_or(0),
                actual,
            }),
        }
    }

    pub async fn delete_store(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backend
            .delete_store(name)
            .await?
            .ok_or_else(|| Error::StoreNotFound(name.to_string()))?;
        self.refresh().await?;
        Ok(())
    }

    /// Names of the stores that must receive `reference`, per the current
    /// snapshot.
    pub fn get_subscribed_stores(&self, reference: &FeatureSetReference) -> BTreeSet<String> {
        self.snapshot().get_subscribed_stores(reference)
    }

    pub async fn save_job(&self, job: &IngestionJob) -> Result<()> {
        Ok(self.backend.save_job(job).await?)
    }

    pub async fn list_jobs(&self) -> Result<Vec<IngestionJob>> {
        Ok(self.backend.list_jobs().await?)
    }

    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        Ok(self.backend.delete_job(id).await?)
    }
}

/// Report store rows that became corrupt since `previous`
fn log_quarantined(previous: Option<&RegistrySnapshot>, next: &RegistrySnapshot) {
    for corrupt in next.corrupt_stores() {
        let known = previous.map_or(false, |p| p.corrupt_stores().any(|c| c == corrupt));
        if !known {
            error!(
                store = %corrupt.name,
                store_type = %corrupt.store_type,
                version = corrupt.version,
                reason = %corrupt.reason,
                "Store record failed to decode; quarantined until it is repaired"
            );
        }
    }
}
