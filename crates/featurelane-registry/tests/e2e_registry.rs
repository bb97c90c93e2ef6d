//! End-to-end integration tests for the feature registry
//!
//! These tests exercise complete workflows against an on-disk SQLite
//! registry: registration, subscription resolution, optimistic concurrency
//! and job persistence.

use featurelane_core::{
    CassandraConfig, Error, FeatureSetReference, FeatureSetSpec, FieldSpec, IngestionJob,
    JobStatus, RedisConfig, SourceDescriptor, Store, StoreConfig, Subscription, ValueType,
};
use featurelane_registry::{FeatureRegistry, RegistryConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tempfile::TempDir;

fn create_spec(project: &str, name: &str) -> FeatureSetSpec {
    FeatureSetSpec {
        project: project.to_string(),
        name: name.to_string(),
        entities: vec![FieldSpec::new("customer_id", ValueType::String)],
        features: vec![
            FieldSpec::new("txn_count_1h", ValueType::Int64),
            FieldSpec::new("avg_amount_1h", ValueType::Double),
        ],
        source: SourceDescriptor::kafka("kafka:9092", format!("{}-{}", project, name)),
        max_age_seconds: Some(3600),
        labels: BTreeMap::from([("team".to_string(), "risk".to_string())]),
    }
}

fn online_store() -> Store {
    Store::new("online", StoreConfig::Redis(RedisConfig::new("redis", 6379)))
        .with_subscription(Subscription::include("*", "*"))
        .with_subscription(Subscription::exclude("fraud", "*"))
}

fn fraud_store() -> Store {
    Store::new(
        "fraud_cassandra",
        StoreConfig::Cassandra(CassandraConfig {
            bootstrap_hosts: "cass-1,cass-2".to_string(),
            port: 9042,
            keyspace: "features".to_string(),
            table_name: "fraud".to_string(),
            replication_options: BTreeMap::from([(
                "class".to_string(),
                "NetworkTopologyStrategy".to_string(),
            )]),
            default_ttl: 86400,
            versionless: false,
            consistency: "QUORUM".to_string(),
            tombstone: false,
        }),
    )
    .with_subscription(Subscription::include("fraud", "*"))
}

fn db_config(temp_dir: &TempDir) -> RegistryConfig {
    RegistryConfig::sqlite(
        temp_dir
            .path()
            .join("registry.db")
            .to_string_lossy()
            .to_string(),
    )
}

#[tokio::test]
async fn test_e2e_subscription_topology() {
    // Given: A registry with two stores and three feature sets
    let temp_dir = TempDir::new().unwrap();
    let registry = FeatureRegistry::new(db_config(&temp_dir)).await.unwrap();

    registry.apply_store(online_store(), Some(0)).await.unwrap();
    registry.apply_store(fraud_store(), Some(0)).await.unwrap();
    for (project, name) in [("fraud", "txn"), ("ads", "click"), ("ads", "view")] {
        registry
            .register_feature_set(create_spec(project, name))
            .await
            .unwrap();
    }

    // When: Resolving subscribers
    let fraud = FeatureSetReference::new("fraud", "txn");
    let ads = FeatureSetReference::new("ads", "click");

    // Then: Exclusion keeps fraud out of the online store
    assert_eq!(
        registry.get_subscribed_stores(&fraud),
        BTreeSet::from(["fraud_cassandra".to_string()])
    );
    assert_eq!(
        registry.get_subscribed_stores(&ads),
        BTreeSet::from(["online".to_string()])
    );

    // When: The online store drops its exclusion
    let mut relaxed = online_store();
    relaxed.subscriptions.retain(|s| !s.exclude);
    registry.apply_store(relaxed, Some(1)).await.unwrap();

    // Then: The next evaluation sees it immediately
    assert_eq!(
        registry.get_subscribed_stores(&fraud),
        BTreeSet::from(["fraud_cassandra".to_string(), "online".to_string()])
    );
}

#[tokio::test]
async fn test_e2e_state_survives_reopen() {
    // Given: A registry that has been written to and dropped
    let temp_dir = TempDir::new().unwrap();
    let version = {
        let registry = FeatureRegistry::new(db_config(&temp_dir)).await.unwrap();
        registry.apply_store(fraud_store(), Some(0)).await.unwrap();
        registry
            .register_feature_set(create_spec("fraud", "txn"))
            .await
            .unwrap();
        registry.snapshot().version()
    };

    // When: Reopening the same database
    let registry = FeatureRegistry::new(db_config(&temp_dir)).await.unwrap();
    let snapshot = registry.snapshot();

    // Then: Stores decode back to the same typed config
    assert_eq!(snapshot.version(), version);
    assert_eq!(snapshot.store("fraud_cassandra"), Some(&fraud_store()));
    assert_eq!(
        snapshot.feature_set(&FeatureSetReference::new("fraud", "txn")),
        Some(&create_spec("fraud", "txn"))
    );
}

#[tokio::test]
async fn test_e2e_concurrent_create_exactly_one_wins() {
    // Given: Two writers racing to create the same store
    let registry = Arc::new(FeatureRegistry::in_memory().await.unwrap());

    let mut handles = Vec::new();
    for port in [6379, 6380] {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let store = Store::new("online", StoreConfig::Redis(RedisConfig::new("redis", port)))
                .with_subscription(Subscription::include("*", "*"));
            registry.apply_store(store, Some(0)).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    // Then: Exactly one commits and the other gets a conflict
    let committed = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::Conflict { .. })))
        .count();
    assert_eq!(committed, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(registry.snapshot().store_version("online"), 1);
}

#[tokio::test]
async fn test_e2e_second_process_sees_external_writes() {
    // Given: Two registries over the same database file
    let temp_dir = TempDir::new().unwrap();
    let writer = FeatureRegistry::new(db_config(&temp_dir)).await.unwrap();
    let reader = FeatureRegistry::new(db_config(&temp_dir)).await.unwrap();

    // When: One writes
    writer.apply_store(online_store(), Some(0)).await.unwrap();

    // Then: The other observes a newer latest version before refreshing
    let latest = reader.latest_version().await.unwrap();
    assert!(latest > reader.snapshot().version());

    let refreshed = reader.refresh().await.unwrap();
    assert_eq!(refreshed.version(), latest);
    assert!(refreshed.store("online").is_some());

    // And: A stale compare-and-swap from the reader is rejected
    let err = reader.apply_store(online_store(), Some(0)).await.unwrap_err();
    assert!(matches!(err, Error::Conflict { actual: 1, .. }));
}

#[tokio::test]
async fn test_e2e_job_persistence() {
    // Given: A registry with a saved job
    let temp_dir = TempDir::new().unwrap();
    let registry = FeatureRegistry::new(db_config(&temp_dir)).await.unwrap();

    let mut job = IngestionJob::new(
        "online-1",
        "online",
        BTreeSet::from([SourceDescriptor::kafka("kafka:9092", "ads-click")]),
        BTreeSet::from([FeatureSetReference::new("ads", "click")]),
        11,
        12,
    );
    registry.save_job(&job).await.unwrap();

    // When: The job moves on and is saved again
    job.transition_to(JobStatus::Running).unwrap();
    job.executor_handle = Some("exec-42".to_string());
    registry.save_job(&job).await.unwrap();

    // Then: A reopened registry lists the latest state
    drop(registry);
    let registry = FeatureRegistry::new(db_config(&temp_dir)).await.unwrap();
    let jobs = registry.list_jobs().await.unwrap();
    assert_eq!(jobs, vec![job]);

    // When: Deleting it
    assert!(registry.delete_job("online-1").await.unwrap());
    assert!(!registry.delete_job("online-1").await.unwrap());
    assert!(registry.list_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_e2e_delete_store_and_feature_set() {
    let registry = FeatureRegistry::in_memory().await.unwrap();
    registry.apply_store(online_store(), None).await.unwrap();
    let reference = registry
        .register_feature_set(create_spec("ads", "click"))
        .await
        .unwrap();
    let before = registry.snapshot().version();

    registry.delete_store("online").await.unwrap();
    registry.delete_feature_set(&reference).await.unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.version(), before + 2);
    assert!(snapshot.store("online").is_none());
    assert!(snapshot.feature_set(&reference).is_none());
    assert!(registry.get_subscribed_stores(&reference).is_empty());
}
