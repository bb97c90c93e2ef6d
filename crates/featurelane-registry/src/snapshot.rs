//! Immutable registry snapshots
//!
//! A snapshot is the unit the planner consumes. It is built once per
//! committed version and shared as `Arc<RegistrySnapshot>`; nothing mutates
//! it afterwards.
//!
//! Store rows that no longer decode are quarantined: they are left out of
//! [`stores`](RegistrySnapshot::stores) and listed by
//! [`corrupt_stores`](RegistrySnapshot::corrupt_stores) instead, so one bad
//! record never hides the healthy ones.

use crate::backend::RegistryState;
use featurelane_core::{resolve, FeatureSetReference, FeatureSetSpec, Store};
use std::collections::{BTreeMap, BTreeSet};

/// A store together with its per-store version
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedStore {
    pub store: Store,
    pub version: u64,
}

/// A persisted store row that failed to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptStore {
    pub name: String,
    pub store_type: String,
    pub version: u64,
    /// Data-integrity error raised by the decode
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    version: u64,
    feature_sets: BTreeMap<FeatureSetReference, FeatureSetSpec>,
    stores: BTreeMap<String, VersionedStore>,
    corrupt_stores: BTreeMap<String, CorruptStore>,
}

impl RegistrySnapshot {
    pub fn new(
        version: u64,
        feature_sets: impl IntoIterator<Item = FeatureSetSpec>,
        stores: impl IntoIterator<Item = VersionedStore>,
    ) -> Self {
        Self {
            version,
            feature_sets: feature_sets
                .into_iter()
                .map(|spec| (spec.reference(), spec))
                .collect(),
            stores: stores
                .into_iter()
                .map(|s| (s.store.name.clone(), s))
                .collect(),
            corrupt_stores: BTreeMap::new(),
        }
    }

    /// Decode a backend state, quarantining store rows that fail to decode.
    pub fn from_state(state: RegistryState) -> Self {
        let mut stores = Vec::with_capacity(state.stores.len());
        let mut corrupt_stores = BTreeMap::new();
        for record in state.stores {
            let name = record.name.clone();
            let store_type = record.store_type.clone();
            let version = record.version;
            match record.into_store() {
                Ok(store) => stores.push(VersionedStore { store, version }),
                Err(e) => {
                    corrupt_stores.insert(
                        name.clone(),
                        CorruptStore {
                            name,
                            store_type,
                            version,
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }

        let mut snapshot = Self::new(state.version, state.feature_sets, stores);
        snapshot.corrupt_stores = corrupt_stores;
        snapshot
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn feature_sets(&self) -> impl Iterator<Item = &FeatureSetSpec> {
        self.feature_sets.values()
    }

    pub fn feature_set(&self, reference: &FeatureSetReference) -> Option<&FeatureSetSpec> {
        self.feature_sets.get(reference)
    }

    pub fn stores(&self) -> impl Iterator<Item = &Store> {
        self.stores.values().map(|s| &s.store)
    }

    pub fn store(&self, name: &str) -> Option<&Store> {
        self.stores.get(name).map(|s| &s.store)
    }

    /// Store rows quarantined because they failed to decode
    pub fn corrupt_stores(&self) -> impl Iterator<Item = &CorruptStore> {
        self.corrupt_stores.values()
    }

    pub fn is_quarantined(&self, name: &str) -> bool {
        self.corrupt_stores.contains_key(name)
    }

    /// Per-store version, 0 when the store does not exist. Quarantined rows
    /// keep their version so they can be overwritten with a repaired store.
    pub fn store_version(&self, name: &str) -> u64 {
        self.stores
            .get(name)
            .map(|s| s.version)
            .or_else(|| self.corrupt_stores.get(name).map(|c| c.version))
            .unwrap_or(0)
    }

    /// Names of every store whose subscriptions resolve `reference` in.
    ///
    /// Evaluated from the subscriptions each time; no result is cached.
    pub fn get_subscribed_stores(&self, reference: &FeatureSetReference) -> BTreeSet<String> {
        self.stores()
            .filter(|store| resolve(reference, &store.subscriptions))
            .map(|store| store.name.clone())
            .collect()
    }
}
