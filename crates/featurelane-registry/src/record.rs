//! Persisted row forms of registry entities
//!
//! The storage boundary is the only place where a store config becomes bytes
//! and a subscription list becomes a string. Both conversions are pure.

use featurelane_core::store_config::{decode_named, encode};
use featurelane_core::{format_subscriptions, parse_subscriptions, Result, Store};

/// One row of the `stores` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRecord {
    pub name: String,
    pub store_type: String,
    pub config: Vec<u8>,
    pub subscriptions: String,
    pub version: u64,
}

impl StoreRecord {
    /// Flatten a store for persistence. `version` is assigned by the backend
    /// on commit; callers pass the version they expect to replace.
    pub fn from_store(store: &Store, version: u64) -> Result<Self> {
        let store_type = store.store_type();
        Ok(Self {
            name: store.name.clone(),
            store_type: store_type.as_str().to_string(),
            config: encode(store_type, &store.config)?,
            subscriptions: format_subscriptions(&store.subscriptions),
            version,
        })
    }

    /// Rebuild the store, failing with a data-integrity error when the
    /// config bytes or subscription string no longer parse.
    pub fn into_store(self) -> Result<Store> {
        let config = decode_named(&self.store_type, &self.config)?;
        let subscriptions = parse_subscriptions(&self.subscriptions)?;
        Ok(Store {
            name: self.name,
            config,
            subscriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurelane_core::{BigQueryConfig, Error, ErrorKind, StoreConfig, Subscription};

    fn warehouse() -> Store {
        Store::new(
            "warehouse",
            StoreConfig::BigQuery(BigQueryConfig {
                project_id: "analytics".to_string(),
                dataset_id: "features".to_string(),
                staging_location: "gs://analytics-staging".to_string(),
                initial_retry_delay_seconds: 1,
                total_timeout_seconds: 120,
                write_triggering_frequency_seconds: 60,
            }),
        )
        .with_subscription(Subscription::include("*", "*"))
        .with_subscription(Subscription::exclude("fraud", "*"))
    }

    #[test]
    fn test_record_layout() {
        let record = StoreRecord::from_store(&warehouse(), 3).unwrap();
        assert_eq!(record.name, "warehouse");
        assert_eq!(record.store_type, "BIGQUERY");
        assert_eq!(record.subscriptions, "*:*:false,fraud:*:true");
        assert_eq!(record.version, 3);
        assert!(!record.config.is_empty());
    }

    #[test]
    fn test_into_store_restores_store() {
        let store = warehouse();
        let restored = StoreRecord::from_store(&store, 1)
            .unwrap()
            .into_store()
            .unwrap();
        assert_eq!(restored, store);
    }

    #[test]
    fn test_corrupt_row_is_data_integrity_error() {
        let mut record = StoreRecord::from_store(&warehouse(), 1).unwrap();
        record.config = vec![0xc1, 0x00];
        let err = record.into_store().unwrap_err();
        assert!(matches!(err, Error::CorruptConfig { .. }));
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);

        let mut record = StoreRecord::from_store(&warehouse(), 1).unwrap();
        record.store_type = "MEMCACHED".to_string();
        assert!(matches!(
            record.into_store(),
            Err(Error::UnsupportedStoreType(_))
        ));

        let mut record = StoreRecord::from_store(&warehouse(), 1).unwrap();
        record.subscriptions = "broken".to_string();
        assert!(matches!(
            record.into_store(),
            Err(Error::CorruptRecord { .. })
        ));
    }
}
