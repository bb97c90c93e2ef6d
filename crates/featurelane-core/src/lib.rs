//! # featurelane core library
//!
//! Foundation types shared by every featurelane crate: the registry model,
//! the subscription resolver and the store config codec.
//!
//! Nothing in this crate performs I/O. Everything here is a plain value or a
//! pure function, so the registry, planner and reconciliation loop can all
//! call into it freely from any thread.
//!
//! ## Key Components
//!
//! - **Types**: `FeatureSetReference`, `FeatureSetSpec`, `Store`
//! - **Subscriptions**: pattern matching and the exclude-dominant `resolve`
//! - **Store configs**: the closed `StoreConfig` union and its byte codec
//! - **Jobs**: `IngestionJob` and its status state machine
//! - **Errors**: the crate-wide `Error` with an operator-facing `ErrorKind`
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use featurelane_core::{resolve, FeatureSetReference, Subscription};
//!
//! let subs = vec![
//!     Subscription::include("*", "*"),
//!     Subscription::exclude("fraud", "*"),
//! ];
//! assert!(!resolve(&FeatureSetReference::new("fraud", "txn"), &subs));
//! assert!(resolve(&FeatureSetReference::new("ads", "click"), &subs));
//! ```

pub use error::{Error, ErrorKind, Result};
pub use job::{IngestionJob, JobStatus};
pub use store_config::{
    config_version, BigQueryConfig, CassandraConfig, RedisClusterConfig, RedisConfig,
    StoreConfig, StoreType,
};
pub use subscription::{format_subscriptions, parse_subscriptions, resolve, Subscription};
pub use types::{
    FeatureSetReference, FeatureSetSpec, FieldSpec, SourceDescriptor, Store, ValueType,
};

mod error;
pub mod job;
pub mod retry;
pub mod store_config;
pub mod subscription;
mod types;

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Registry state behind these mutexes is only mutated inside single SQL
/// statements or transactions, so a poisoned lock never leaves it half
/// written.
pub fn recover_mutex<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>> {
    match mutex.lock() {
        Ok(guard) => Ok(guard),
        Err(poisoned) => {
            tracing::warn!("Recovering poisoned mutex: {}", name);
            Ok(poisoned.into_inner())
        }
    }
}

pub mod prelude {
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::job::{IngestionJob, JobStatus};
    pub use crate::store_config::{StoreConfig, StoreType};
    pub use crate::subscription::{resolve, Subscription};
    pub use crate::types::{FeatureSetReference, FeatureSetSpec, Store};
}
