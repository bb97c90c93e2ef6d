//! Database schema for the featurelane registry
//!
//! # Tables
//!
//! - **registry_meta**: single-row table holding the global snapshot version
//! - **feature_sets**: current spec of every feature set, stored as JSON
//! - **stores**: one row per store; config is the codec's bytes and
//!   subscriptions the flattened `project:name:exclude` list
//! - **ingestion_jobs**: jobs owned by the reconciliation loop
//!
//! # Design Decisions
//!
//! - Every mutation bumps `registry_meta.snapshot_version` in the same
//!   transaction as the row change, so the version is the single
//!   arbitration point for readers
//! - BIGINT timestamps: Unix epoch seconds for portability

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn create_tables(db: &Connection) -> Result<()> {
    db.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS registry_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            snapshot_version INTEGER NOT NULL
        );

        INSERT OR IGNORE INTO registry_meta (id, snapshot_version) VALUES (1, 0);

        CREATE TABLE IF NOT EXISTS feature_sets (
            project TEXT NOT NULL,
            name TEXT NOT NULL,
            spec TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            PRIMARY KEY (project, name)
        );

        CREATE TABLE IF NOT EXISTS stores (
            name TEXT PRIMARY KEY,
            store_type TEXT NOT NULL,
            config BLOB NOT NULL,
            subscriptions TEXT NOT NULL,
            version INTEGER NOT NULL,
            updated_at BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ingestion_jobs (
            id TEXT PRIMARY KEY,
            store_name TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PENDING', 'RUNNING', 'ABORTING', 'ABORTED', 'ERROR')),
            job TEXT NOT NULL,
            updated_at BIGINT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_store ON ingestion_jobs(store_name);
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON ingestion_jobs(status);
        "#,
    )
    .context("Failed to create registry schema")?;

    Ok(())
}
