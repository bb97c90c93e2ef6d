//! Store config codec
//!
//! Each store backend has its own fixed config schema. [`StoreConfig`] is the
//! closed union of those schemas: adding a backend means adding a variant, and
//! every `match` over it stops compiling until the new backend is handled.
//!
//! ## Wire format
//!
//! Configs are persisted as MessagePack with named fields. Every schema
//! denies unknown fields, so bytes written for one backend never decode as
//! another.
//!
//! ```rust,ignore
//! use featurelane_core::store_config::{self, RedisConfig, StoreConfig, StoreType};
//!
//! let config = StoreConfig::Redis(RedisConfig::new("redis.internal", 6379));
//! let bytes = store_config::encode(StoreType::Redis, &config)?;
//! assert_eq!(store_config::decode(StoreType::Redis, &bytes)?, config);
//! ```

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hasher;
use std::io::Cursor;
use std::str::FromStr;

/// Supported store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StoreType {
    #[serde(rename = "REDIS")]
    Redis,
    #[serde(rename = "REDIS_CLUSTER")]
    RedisCluster,
    #[serde(rename = "BIGQUERY")]
    BigQuery,
    #[serde(rename = "CASSANDRA")]
    Cassandra,
}

impl StoreType {
    pub const ALL: [StoreType; 4] = [
        StoreType::Redis,
        StoreType::RedisCluster,
        StoreType::BigQuery,
        StoreType::Cassandra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreType::Redis => "REDIS",
            StoreType::RedisCluster => "REDIS_CLUSTER",
            StoreType::BigQuery => "BIGQUERY",
            StoreType::Cassandra => "CASSANDRA",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        StoreType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnsupportedStoreType(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    pub host: String,
    pub port: u32,
    /// Initial backoff for writer retries, in milliseconds
    #[serde(default)]
    pub initial_backoff_ms: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub flush_frequency_seconds: u32,
}

impl RedisConfig {
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Self {
            host: host.into(),
            port,
            initial_backoff_ms: 0,
            max_retries: 0,
            flush_frequency_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisClusterConfig {
    /// Comma separated `host:port` seed nodes
    pub connection_string: String,
    #[serde(default)]
    pub initial_backoff_ms: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub flush_frequency_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub dataset_id: String,
    #[serde(default)]
    pub staging_location: String,
    #[serde(default)]
    pub initial_retry_delay_seconds: u32,
    #[serde(default)]
    pub total_timeout_seconds: u32,
    #[serde(default)]
    pub write_triggering_frequency_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CassandraConfig {
    pub bootstrap_hosts: String,
    pub port: u32,
    pub keyspace: String,
    pub table_name: String,
    #[serde(default)]
    pub replication_options: BTreeMap<String, String>,
    #[serde(default)]
    pub default_ttl: u32,
    #[serde(default)]
    pub versionless: bool,
    #[serde(default)]
    pub consistency: String,
    #[serde(default)]
    pub tombstone: bool,
}

/// Typed config of a store, discriminated by backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreConfig {
    #[serde(rename = "REDIS")]
    Redis(RedisConfig),
    #[serde(rename = "REDIS_CLUSTER")]
    RedisCluster(RedisClusterConfig),
    #[serde(rename = "BIGQUERY")]
    BigQuery(BigQueryConfig),
    #[serde(rename = "CASSANDRA")]
    Cassandra(CassandraConfig),
}

impl StoreConfig {
    pub fn store_type(&self) -> StoreType {
        match self {
            StoreConfig::Redis(_) => StoreType::Redis,
            StoreConfig::RedisCluster(_) => StoreType::RedisCluster,
            StoreConfig::BigQuery(_) => StoreType::BigQuery,
            StoreConfig::Cassandra(_) => StoreType::Cassandra,
        }
    }

    /// Serialize the variant's payload under its backend schema
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let encoded = match self {
            StoreConfig::Redis(c) => rmp_serde::to_vec_named(c),
            StoreConfig::RedisCluster(c) => rmp_serde::to_vec_named(c),
            StoreConfig::BigQuery(c) => rmp_serde::to_vec_named(c),
            StoreConfig::Cassandra(c) => rmp_serde::to_vec_named(c),
        };
        encoded.map_err(|e| {
            Error::internal(format!("failed to encode {} config: {}", self.store_type(), e))
        })
    }
}

/// Encode `config` as the bytes persisted for a store of `store_type`.
///
/// Fails with a validation error when the config belongs to another backend.
pub fn encode(store_type: StoreType, config: &StoreConfig) -> Result<Vec<u8>> {
    if config.store_type() != store_type {
        return Err(Error::validation(format!(
            "store type {} does not match {} config",
            store_type,
            config.store_type()
        )));
    }
    config.to_bytes()
}

/// Decode persisted config bytes under the schema of `store_type`
pub fn decode(store_type: StoreType, bytes: &[u8]) -> Result<StoreConfig> {
    match store_type {
        StoreType::Redis => decode_schema(store_type, bytes).map(StoreConfig::Redis),
        StoreType::RedisCluster => decode_schema(store_type, bytes).map(StoreConfig::RedisCluster),
        StoreType::BigQuery => decode_schema(store_type, bytes).map(StoreConfig::BigQuery),
        StoreType::Cassandra => decode_schema(store_type, bytes).map(StoreConfig::Cassandra),
    }
}

/// Decode persisted config bytes tagged with a raw type name
pub fn decode_named(store_type: &str, bytes: &[u8]) -> Result<StoreConfig> {
    decode(store_type.parse()?, bytes)
}

fn decode_schema<T: DeserializeOwned>(store_type: StoreType, bytes: &[u8]) -> Result<T> {
    let mut cursor = Cursor::new(bytes);
    let config = T::deserialize(&mut rmp_serde::Deserializer::new(&mut cursor))
        .map_err(|e| Error::corrupt_config(store_type.as_str(), e))?;

    // A valid config followed by junk is still a corrupt record
    let trailing = bytes.len() as u64 - cursor.position();
    if trailing > 0 {
        return Err(Error::corrupt_config(
            store_type.as_str(),
            format!("{} trailing bytes after config", trailing),
        ));
    }
    Ok(config)
}

/// Stable digest of a store config, used to detect config changes.
pub fn config_version(config: &StoreConfig) -> Result<u64> {
    let bytes = config.to_bytes()?;
    let mut hasher = SipHasher13::new();
    hasher.write(config.store_type().as_str().as_bytes());
    hasher.write(&bytes);
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_configs() -> Vec<StoreConfig> {
        let mut replication = BTreeMap::new();
        replication.insert("class".to_string(), "SimpleStrategy".to_string());
        replication.insert("replication_factor".to_string(), "3".to_string());

        vec![
            StoreConfig::Redis(RedisConfig {
                host: "redis.internal".to_string(),
                port: 6379,
                initial_backoff_ms: 50,
                max_retries: 5,
                flush_frequency_seconds: 1,
            }),
            StoreConfig::RedisCluster(RedisClusterConfig {
                connection_string: "node1:7000,node2:7000".to_string(),
                initial_backoff_ms: 100,
                max_retries: 3,
                flush_frequency_seconds: 2,
            }),
            StoreConfig::BigQuery(BigQueryConfig {
                project_id: "ml-platform".to_string(),
                dataset_id: "features".to_string(),
                staging_location: "gs://staging/features".to_string(),
                initial_retry_delay_seconds: 1,
                total_timeout_seconds: 120,
                write_triggering_frequency_seconds: 60,
            }),
            StoreConfig::Cassandra(CassandraConfig {
                bootstrap_hosts: "cass1,cass2".to_string(),
                port: 9042,
                keyspace: "feast".to_string(),
                table_name: "feature_store".to_string(),
                replication_options: replication,
                default_ttl: 86400,
                versionless: true,
                consistency: "ONE".to_string(),
                tombstone: false,
            }),
        ]
    }

    #[test]
    fn test_round_trip_every_backend() {
        let configs = sample_configs();
        assert_eq!(configs.len(), StoreType::ALL.len());

        for config in configs {
            let store_type = config.store_type();
            let bytes = encode(store_type, &config).unwrap();
            let decoded = decode(store_type, &bytes).unwrap();
            assert_eq!(decoded, config, "round trip failed for {}", store_type);
        }
    }

    #[test]
    fn test_corrupt_bytes_are_data_integrity_errors() {
        for config in sample_configs() {
            let store_type = config.store_type();
            let bytes = encode(store_type, &config).unwrap();

            let truncated = &bytes[..bytes.len() / 2];
            let err = decode(store_type, truncated).unwrap_err();
            assert!(matches!(err, Error::CorruptConfig { .. }));
            assert_eq!(err.kind(), crate::ErrorKind::DataIntegrity);

            assert!(matches!(
                decode(store_type, b""),
                Err(Error::CorruptConfig { .. })
            ));
            assert!(matches!(
                decode(store_type, &[0xc1, 0x00, 0xff]),
                Err(Error::CorruptConfig { .. })
            ));

            let mut padded = bytes.clone();
            padded.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
            assert!(matches!(
                decode(store_type, &padded),
                Err(Error::CorruptConfig { .. })
            ));
        }
    }

    #[test]
    fn test_bytes_of_one_backend_do_not_decode_as_another() {
        let redis = &sample_configs()[0];
        let bytes = redis.to_bytes().unwrap();
        assert!(decode(StoreType::RedisCluster, &bytes).is_err());
        assert!(decode(StoreType::BigQuery, &bytes).is_err());
        assert!(decode(StoreType::Cassandra, &bytes).is_err());
    }

    #[test]
    fn test_unsupported_store_type() {
        let err = decode_named("MEMCACHED", b"").unwrap_err();
        assert!(matches!(err, Error::UnsupportedStoreType(ref t) if t == "MEMCACHED"));
        assert_eq!(err.kind(), crate::ErrorKind::DataIntegrity);
    }

    #[test]
    fn test_encode_rejects_mismatched_type() {
        let redis = &sample_configs()[0];
        let err = encode(StoreType::BigQuery, redis).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_store_type_names() {
        for t in StoreType::ALL {
            assert_eq!(t.as_str().parse::<StoreType>().unwrap(), t);
        }
        assert_eq!(StoreType::BigQuery.to_string(), "BIGQUERY");
        assert!("redis".parse::<StoreType>().is_err());
    }

    #[test]
    fn test_config_version_tracks_content() {
        let configs = sample_configs();
        let v1 = config_version(&configs[0]).unwrap();
        assert_eq!(v1, config_version(&configs[0].clone()).unwrap());

        let mut changed = configs[0].clone();
        if let StoreConfig::Redis(ref mut c) = changed {
            c.port = 6380;
        }
        assert_ne!(v1, config_version(&changed).unwrap());
    }

    #[test]
    fn test_store_config_document_is_tagged() {
        let json = r#"{"type": "REDIS", "host": "localhost", "port": 6379}"#;
        let config: StoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config, StoreConfig::Redis(RedisConfig::new("localhost", 6379)));

        let value = serde_json::to_value(&sample_configs()[2]).unwrap();
        assert_eq!(value["type"], "BIGQUERY");
        assert_eq!(value["dataset_id"], "features");
    }
}
