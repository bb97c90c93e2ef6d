//! SQLite backend implementation with WAL mode
//!
//! This backend uses SQLite with Write-Ahead Logging (WAL) for multi-process
//! safety. Every mutation runs in one transaction that also bumps the global
//! snapshot version, so a reader never sees a row change without the matching
//! version.

use crate::backend::{RegistryBackend, RegistryState, StoreCommit};
use crate::record::StoreRecord;
use crate::schema;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use featurelane_core::{recover_mutex, FeatureSetReference, FeatureSetSpec, IngestionJob};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// SQLite backend with WAL mode for multi-process safety
pub struct SqliteBackend {
    db: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Create new SQLite backend from file path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        let is_memory = path_str == ":memory:" || path_str.starts_with("file::memory:");

        if !is_memory {
            if let Some(parent) = path.as_ref().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create registry directory {:?}", parent)
                    })?;
                }
            }
        }

        let db = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .context("Failed to open SQLite connection for registry")?;

        if !is_memory {
            db.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;

            // Wait for locks held by other processes instead of failing
            db.pragma_update(None, "busy_timeout", 5000)
                .context("Failed to set busy timeout")?;

            db.pragma_update(None, "synchronous", "NORMAL")
                .context("Failed to set synchronous mode")?;

            info!(
                "Initialized SQLite registry at {:?} with WAL mode",
                path.as_ref()
            );
        } else {
            info!("Initialized in-memory SQLite registry (testing mode)");
        }

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Create in-memory SQLite backend (for testing)
    pub fn in_memory() -> Result<Self> {
        let db =
            Connection::open_in_memory().context("Failed to create in-memory SQLite connection")?;

        info!("Initialized in-memory SQLite registry");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

fn bump_snapshot_version(tx: &Transaction<'_>) -> Result<u64> {
    tx.execute(
        "UPDATE registry_meta SET snapshot_version = snapshot_version + 1 WHERE id = 1",
        [],
    )
    .context("Failed to bump snapshot version")?;
    read_snapshot_version(tx)
}

fn read_snapshot_version(db: &Connection) -> Result<u64> {
    let version: i64 = db
        .query_row(
            "SELECT snapshot_version FROM registry_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .context("Failed to read snapshot version")?;
    Ok(version as u64)
}

fn read_feature_sets(db: &Connection) -> Result<Vec<FeatureSetSpec>> {
    let mut stmt = db.prepare("SELECT project, name, spec FROM feature_sets ORDER BY project, name")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut specs = Vec::new();
    for row in rows {
        let (project, name, spec_json) = row?;
        let spec: FeatureSetSpec = serde_json::from_str(&spec_json)
            .with_context(|| format!("Corrupt spec for feature set '{}/{}'", project, name))?;
        specs.push(spec);
    }
    Ok(specs)
}

fn read_stores(db: &Connection) -> Result<Vec<StoreRecord>> {
    let mut stmt = db.prepare(
        "SELECT name, store_type, config, subscriptions, version FROM stores ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| {
        let version: i64 = row.get(4)?;
        Ok(StoreRecord {
            name: row.get(0)?,
            store_type: row.get(1)?,
            config: row.get(2)?,
            subscriptions: row.get(3)?,
            version: version as u64,
        })
    })?;

    let mut stores = Vec::new();
    for row in rows {
        stores.push(row?);
    }
    Ok(stores)
}

#[async_trait]
impl RegistryBackend for SqliteBackend {
    async fn init_schema(&self) -> Result<()> {
        let db = recover_mutex(&self.db, "FeatureRegistry")?;
        schema::create_tables(&db)?;
        Ok(())
    }

    async fn load_state(&self) -> Result<RegistryState> {
        let mut db = recover_mutex(&self.db, "FeatureRegistry")?;
        // One read transaction so version and rows agree
        let tx = db.transaction()?;
        let state = RegistryState {
            version: read_snapshot_version(&tx)?,
            feature_sets: read_feature_sets(&tx)?,
            stores: read_stores(&tx)?,
        };
        tx.commit()?;
        Ok(state)
    }

    async fn get_feature_set(
        &self,
        reference: &FeatureSetReference,
    ) -> Result<Option<FeatureSetSpec>> {
        let db = recover_mutex(&self.db, "FeatureRegistry")?;

        let spec_json: Option<String> = db
            .query_row(
                "SELECT spec FROM feature_sets WHERE project = ? AND name = ?",
                params![reference.project, reference.name],
                |row| row.get(0),
            )
            .optional()?;

        spec_json
            .map(|json| {
                serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt spec for feature set '{}'", reference))
            })
            .transpose()
    }

    async fn put_feature_set(&self, spec: &FeatureSetSpec) -> Result<u64> {
        let mut db = recover_mutex(&self.db, "FeatureRegistry")?;
        let spec_json = serde_json::to_string(spec)?;
        let now = Utc::now().timestamp();

        let tx = db.transaction()?;
        tx.execute(
            r#"
            INSERT INTO feature_sets (project, name, spec, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(project, name) DO UPDATE SET
                spec = excluded.spec,
                updated_at = excluded.updated_at
            "#,
            params![spec.project, spec.name, spec_json, now, now],
        )
        .with_context(|| format!("Failed to register feature set '{}'", spec.reference()))?;
        let version = bump_snapshot_version(&tx)?;
        tx.commit()?;

        debug!("Registered feature set: {} (snapshot {})", spec.reference(), version);
        Ok(version)
    }

    async fn delete_feature_set(&self, reference: &FeatureSetReference) -> Result<Option<u64>> {
        let mut db = recover_mutex(&self.db, "FeatureRegistry")?;

        let tx = db.transaction()?;
        let deleted = tx
            .execute(
                "DELETE FROM feature_sets WHERE project = ? AND name = ?",
                params![reference.project, reference.name],
            )
            .with_context(|| format!("Failed to delete feature set '{}'", reference))?;
        if deleted == 0 {
            return Ok(None);
        }
        let version = bump_snapshot_version(&tx)?;
        tx.commit()?;

        info!("Deleted feature set: {}", reference);
        Ok(Some(version))
    }

    async fn commit_store(
        &self,
        record: &StoreRecord,
        expected: Option<u64>,
    ) -> Result<StoreCommit> {
        let mut db = recover_mutex(&self.db, "FeatureRegistry")?;

        let tx = db.transaction()?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM stores WHERE name = ?",
                params![record.name],
                |row| row.get(0),
            )
            .optional()?;
        let actual = current.unwrap_or(0) as u64;

        if let Some(expected) = expected {
            if expected != actual {
                return Ok(StoreCommit::Conflict { actual });
            }
        }

        let store_version = actual + 1;
        tx.execute(
            r#"
            INSERT INTO stores (name, store_type, config, subscriptions, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                store_type = excluded.store_type,
                config = excluded.config,
                subscriptions = excluded.subscriptions,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
            params![
                record.name,
                record.store_type,
                record.config,
                record.subscriptions,
                store_version as i64,
                Utc::now().timestamp(),
            ],
        )
        .with_context(|| format!("Failed to apply store '{}'", record.name))?;
        let snapshot = bump_snapshot_version(&tx)?;
        tx.commit()?;

        debug!(
            "Applied store: {} (version {}, snapshot {})",
            record.name, store_version, snapshot
        );
        Ok(StoreCommit::Committed { store_version })
    }

    async fn delete_store(&self, name: &str) -> Result<Option<u64>> {
        let mut db = recover_mutex(&self.db, "FeatureRegistry")?;

        let tx = db.transaction()?;
        let deleted = tx
            .execute("DELETE FROM stores WHERE name = ?", params![name])
            .with_context(|| format!("Failed to delete store '{}'", name))?;
        if deleted == 0 {
            return Ok(None);
        }
        let version = bump_snapshot_version(&tx)?;
        tx.commit()?;

        info!("Deleted store: {}", name);
        Ok(Some(version))
    }

    async fn snapshot_version(&self) -> Result<u64> {
        let db = recover_mutex(&self.db, "FeatureRegistry")?;
        read_snapshot_version(&db)
    }

    async fn save_job(&self, job: &IngestionJob) -> Result<()> {
        let db = recover_mutex(&self.db, "FeatureRegistry")?;
        let job_json = serde_json::to_string(job)?;

        db.execute(
            r#"
            INSERT INTO ingestion_jobs (id, store_name, status, job, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                store_name = excluded.store_name,
                status = excluded.status,
                job = excluded.job,
                updated_at = excluded.updated_at
            "#,
            params![
                job.id,
                job.store_name,
                job.status.as_str(),
                job_json,
                job.updated_at.timestamp(),
            ],
        )
        .with_context(|| format!("Failed to save job '{}'", job.id))?;

        debug!("Saved job {} ({})", job.id, job.status);
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<IngestionJob>> {
        let db = recover_mutex(&self.db, "FeatureRegistry")?;

        let mut stmt = db.prepare("SELECT id, job FROM ingestion_jobs ORDER BY store_name, id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            let (id, job_json) = row?;
            let job: IngestionJob = serde_json::from_str(&job_json)
                .with_context(|| format!("Corrupt job record '{}'", id))?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn delete_job(&self, id: &str) -> Result<bool> {
        let db = recover_mutex(&self.db, "FeatureRegistry")?;

        let deleted = db
            .execute("DELETE FROM ingestion_jobs WHERE id = ?", params![id])
            .with_context(|| format!("Failed to delete job '{}'", id))?;

        if deleted > 0 {
            debug!("Deleted job {}", id);
        }
        Ok(deleted > 0)
    }
}
