//! Core registry types
//!
//! Feature sets and stores are plain immutable values. The registry
//! version-stamps them on every mutation; nothing in here knows about
//! persistence.

use crate::error::{Error, Result};
use crate::store_config::{StoreConfig, StoreType};
use crate::subscription::Subscription;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Identity of a feature set: `(project, name)`
///
/// The canonical string form is `"project/name"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureSetReference {
    pub project: String,
    pub name: String,
}

impl FeatureSetReference {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }

    /// Reject empty components and components containing the `/` separator
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [("project", &self.project), ("name", &self.name)] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!(
                    "feature set {} must not be empty",
                    label
                )));
            }
            if value.contains('/') {
                return Err(Error::validation(format!(
                    "feature set {} '{}' must not contain '/'",
                    label, value
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for FeatureSetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.name)
    }
}

impl FromStr for FeatureSetReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (project, name) = s.split_once('/').ok_or_else(|| {
            Error::validation(format!("feature set reference '{}' is not 'project/name'", s))
        })?;
        let reference = Self::new(project.trim(), name.trim());
        reference.validate()?;
        Ok(reference)
    }
}

/// Value type of an entity or feature column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Bytes,
    String,
    Int32,
    Int64,
    Float,
    Double,
    Bool,
    BytesList,
    StringList,
    Int64List,
    DoubleList,
}

/// A named, typed column of a feature set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub value_type: ValueType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Stream a feature set is ingested from
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Kafka {
        bootstrap_servers: String,
        topic: String,
    },
}

impl SourceDescriptor {
    pub fn kafka(bootstrap_servers: impl Into<String>, topic: impl Into<String>) -> Self {
        Self::Kafka {
            bootstrap_servers: bootstrap_servers.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::Kafka {
                bootstrap_servers,
                topic,
            } => write!(f, "kafka://{}/{}", bootstrap_servers, topic),
        }
    }
}

/// Registered definition of a feature set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSetSpec {
    pub project: String,
    pub name: String,
    pub entities: Vec<FieldSpec>,
    pub features: Vec<FieldSpec>,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub max_age_seconds: Option<u64>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl FeatureSetSpec {
    pub fn reference(&self) -> FeatureSetReference {
        FeatureSetReference::new(&self.project, &self.name)
    }

    /// Structural checks performed before the spec is persisted
    pub fn validate(&self) -> Result<()> {
        self.reference().validate()?;

        if self.entities.is_empty() {
            return Err(Error::validation(format!(
                "feature set '{}' must declare at least one entity",
                self.reference()
            )));
        }

        let mut seen = HashSet::new();
        for field in self.entities.iter().chain(self.features.iter()) {
            if field.name.trim().is_empty() {
                return Err(Error::validation(format!(
                    "feature set '{}' has a field with an empty name",
                    self.reference()
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::validation(format!(
                    "feature set '{}' declares field '{}' twice",
                    self.reference(),
                    field.name
                )));
            }
        }

        Ok(())
    }

    /// Check that `next` may replace `self` as the current version.
    ///
    /// Every existing entity and feature must survive with the same value
    /// type. New features may be added.
    pub fn check_compatible(&self, next: &FeatureSetSpec) -> Result<()> {
        let conflict = |reason: String| Error::VersionConflict {
            reference: self.reference().to_string(),
            reason,
        };

        if self.reference() != next.reference() {
            return Err(conflict(format!(
                "cannot replace with a spec for '{}'",
                next.reference()
            )));
        }

        let index = |fields: &[FieldSpec]| -> BTreeMap<String, ValueType> {
            fields
                .iter()
                .map(|f| (f.name.clone(), f.value_type))
                .collect()
        };

        let next_entities = index(&next.entities);
        if next_entities.len() != self.entities.len() {
            return Err(conflict("entity set changed".to_string()));
        }
        for entity in &self.entities {
            match next_entities.get(&entity.name) {
                Some(t) if *t == entity.value_type => {}
                Some(t) => {
                    return Err(conflict(format!(
                        "entity '{}' changed type {:?} -> {:?}",
                        entity.name, entity.value_type, t
                    )))
                }
                None => return Err(conflict(format!("entity '{}' removed", entity.name))),
            }
        }

        let next_features = index(&next.features);
        for feature in &self.features {
            match next_features.get(&feature.name) {
                Some(t) if *t == feature.value_type => {}
                Some(t) => {
                    return Err(conflict(format!(
                        "feature '{}' changed type {:?} -> {:?}",
                        feature.name, feature.value_type, t
                    )))
                }
                None => return Err(conflict(format!("feature '{}' removed", feature.name))),
            }
        }

        Ok(())
    }
}

/// A storage backend and the subscriptions deciding what lands in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    /// Sole identity key
    pub name: String,
    pub config: StoreConfig,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl Store {
    pub fn new(name: impl Into<String>, config: StoreConfig) -> Self {
        Self {
            name: name.into(),
            config,
            subscriptions: Vec::new(),
        }
    }

    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn store_type(&self) -> StoreType {
        self.config.store_type()
    }

    /// Subscriptions carrying the given exclude flag
    pub fn subscriptions_by_polarity(&self, exclude: bool) -> Vec<&Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.exclude == exclude)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("store name must not be empty"));
        }
        if self.name.contains(',') || self.name.contains(':') {
            return Err(Error::validation(format!(
                "store name '{}' must not contain ',' or ':'",
                self.name
            )));
        }
        for subscription in &self.subscriptions {
            subscription.validate()?;
        }
        Ok(())
    }
}
