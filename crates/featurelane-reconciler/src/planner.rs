//! Job topology planner
//!
//! Turns one immutable registry snapshot into the set of ingestion jobs that
//! should exist: one per store that resolves at least one feature set.

use featurelane_core::{
    config_version, resolve, FeatureSetReference, Result, SourceDescriptor, StoreConfig,
    StoreType,
};
use featurelane_registry::RegistrySnapshot;
use siphasher::sip::SipHasher13;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;

/// What a store's ingestion job must look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredJob {
    pub store_type: StoreType,
    pub store_config: StoreConfig,
    pub config_version: u64,
    pub feature_set_refs: BTreeSet<FeatureSetReference>,
    /// Distinct sources of the resolved feature sets
    pub sources: BTreeSet<SourceDescriptor>,
}

impl DesiredJob {
    /// Digest of everything a running job must match: the store config, the
    /// resolved feature sets and the sources they are read from. Equal
    /// revisions need no action.
    pub fn revision(&self) -> u64 {
        let mut hasher = SipHasher13::new();
        hasher.write_u64(self.config_version);
        for reference in &self.feature_set_refs {
            hasher.write(reference.project.as_bytes());
            hasher.write_u8(b'/');
            hasher.write(reference.name.as_bytes());
            hasher.write_u8(0);
        }
        hasher.write_u8(0xff);
        for source in &self.sources {
            match source {
                SourceDescriptor::Kafka {
                    bootstrap_servers,
                    topic,
                } => {
                    hasher.write(b"kafka");
                    hasher.write_u8(0);
                    hasher.write(bootstrap_servers.as_bytes());
                    hasher.write_u8(0);
                    hasher.write(topic.as_bytes());
                    hasher.write_u8(0);
                }
            }
        }
        hasher.finish()
    }
}

/// Desired job per store name
pub type DesiredTopology = BTreeMap<String, DesiredJob>;

/// Compute the desired topology of `snapshot`.
///
/// Stores whose subscriptions resolve no feature set are left out entirely.
pub fn plan(snapshot: &RegistrySnapshot) -> Result<DesiredTopology> {
    let mut topology = DesiredTopology::new();

    for store in snapshot.stores() {
        let mut refs = BTreeSet::new();
        let mut sources = BTreeSet::new();
        for spec in snapshot.feature_sets() {
            let reference = spec.reference();
            if resolve(&reference, &store.subscriptions) {
                sources.insert(spec.source.clone());
                refs.insert(reference);
            }
        }

        if refs.is_empty() {
            continue;
        }

        topology.insert(
            store.name.clone(),
            DesiredJob {
                store_type: store.store_type(),
                store_config: store.config.clone(),
                config_version: config_version(&store.config)?,
                feature_set_refs: refs,
                sources,
            },
        );
    }

    Ok(topology)
}
