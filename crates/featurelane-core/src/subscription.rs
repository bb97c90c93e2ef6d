//! Store subscriptions and the subscription resolver
//!
//! A [`Subscription`] selects feature sets by `(project, name)` pattern. Each
//! pattern is either an exact literal or the wildcard `*`, which matches any
//! non-empty value. A subscription is an *include* rule unless its `exclude`
//! flag is set.
//!
//! ## Resolution rule
//!
//! [`resolve`] scans every subscription of a store. A feature set lands in the
//! store iff at least one include matches and no exclude matches. Exclusion
//! dominates any number of matching includes, and the order of the list has
//! no effect on the outcome.
//!
//! ## Persisted form
//!
//! Subscriptions are kept as a structured list everywhere except the storage
//! boundary, where [`format_subscriptions`] flattens them into
//! `project:name:exclude` entries joined by commas and
//! [`parse_subscriptions`] reverses it.

use crate::error::{Error, Result};
use crate::types::FeatureSetReference;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wildcard pattern matching any non-empty component
pub const WILDCARD: &str = "*";

const ENTRY_DELIMITER: char = ',';
const FIELD_DELIMITER: char = ':';

/// Pattern-based rule selecting which feature sets feed a store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Project pattern: a literal or `*`
    pub project: String,
    /// Feature set name pattern: a literal or `*`
    pub name: String,
    #[serde(default)]
    pub exclude: bool,
}

impl Subscription {
    pub fn new(project: impl Into<String>, name: impl Into<String>, exclude: bool) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            exclude,
        }
    }

    pub fn include(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(project, name, false)
    }

    pub fn exclude(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(project, name, true)
    }

    /// True iff both patterns match the corresponding component of `reference`
    pub fn matches(&self, reference: &FeatureSetReference) -> bool {
        pattern_matches(&self.project, &reference.project)
            && pattern_matches(&self.name, &reference.name)
    }

    /// Reject patterns that could never match or that would not survive the
    /// persisted encoding.
    pub fn validate(&self) -> Result<()> {
        for (label, pattern) in [("project", &self.project), ("name", &self.name)] {
            if pattern.trim().is_empty() {
                return Err(Error::validation(format!(
                    "subscription {} pattern must not be empty",
                    label
                )));
            }
            // The persisted form is trimmed on parse
            if pattern.trim() != pattern.as_str() {
                return Err(Error::validation(format!(
                    "subscription {} pattern '{}' has leading or trailing whitespace",
                    label, pattern
                )));
            }
            if pattern.contains(ENTRY_DELIMITER) || pattern.contains(FIELD_DELIMITER) {
                return Err(Error::validation(format!(
                    "subscription {} pattern '{}' must not contain ',' or ':'",
                    label, pattern
                )));
            }
            if pattern != WILDCARD && pattern.contains('*') {
                return Err(Error::validation(format!(
                    "subscription {} pattern '{}' mixes a wildcard into a literal",
                    label, pattern
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.project, FIELD_DELIMITER, self.name, FIELD_DELIMITER, self.exclude
        )
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == WILDCARD {
        !value.is_empty()
    } else {
        pattern == value
    }
}

/// Decide whether `reference` belongs in a store with these subscriptions.
///
/// Returns `has_include && !has_exclude` accumulated over every matching
/// subscription.
pub fn resolve(reference: &FeatureSetReference, subscriptions: &[Subscription]) -> bool {
    let mut has_include = false;
    let mut has_exclude = false;

    for subscription in subscriptions.iter().filter(|s| s.matches(reference)) {
        if subscription.exclude {
            has_exclude = true;
        } else {
            has_include = true;
        }
    }

    has_include && !has_exclude
}

/// Flatten subscriptions into their persisted string
pub fn format_subscriptions(subscriptions: &[Subscription]) -> String {
    subscriptions
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(&ENTRY_DELIMITER.to_string())
}

/// Parse the persisted subscription string.
///
/// Whitespace around entries and fields is ignored. Entries written without
/// the exclude flag are read as includes.
pub fn parse_subscriptions(raw: &str) -> Result<Vec<Subscription>> {
    let corrupt = |reason: String| Error::CorruptRecord {
        record: "subscriptions".to_string(),
        reason,
    };

    raw.split(ENTRY_DELIMITER)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let fields: Vec<&str> = entry.split(FIELD_DELIMITER).map(str::trim).collect();
            let exclude = match fields.as_slice() {
                [_, _] => false,
                [_, _, flag] => match flag.to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(corrupt(format!(
                            "entry '{}' has invalid exclude flag '{}'",
                            entry, other
                        )))
                    }
                },
                _ => {
                    return Err(corrupt(format!(
                        "entry '{}' is not 'project:name:exclude'",
                        entry
                    )))
                }
            };
            let subscription = Subscription::new(fields[0], fields[1], exclude);
            subscription
                .validate()
                .map_err(|e| corrupt(format!("entry '{}': {}", entry, e)))?;
            Ok(subscription)
        })
        .collect()
}
