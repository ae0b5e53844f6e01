use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{
    definition::{validate_flags, DefinitionSet, FlagDefinition},
    DefinitionValidationError,
};

/// An immutable, versioned set of flag definitions valid at a point in time.
///
/// Snapshots are never mutated. A change in definitions produces a new snapshot that replaces
/// the old one in [`DefinitionCache`](crate::DefinitionCache).
#[derive(Debug)]
pub struct Snapshot {
    flags: HashMap<String, FlagDefinition>,
    /// Version (etag) token used for conditional re-fetch.
    version: Option<String>,
    /// Timestamp when definitions were fetched. `None` for the empty cold-start snapshot.
    fetched_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Snapshot served before the first successful fetch. Every flag lookup misses.
    pub fn empty() -> Snapshot {
        Snapshot {
            flags: HashMap::new(),
            version: None,
            fetched_at: None,
        }
    }

    /// Build a snapshot from a fetched definition set. `version` overrides the version carried
    /// in the set itself (e.g., an HTTP `ETag`).
    pub fn from_definitions(definitions: DefinitionSet, version: Option<String>) -> Snapshot {
        Snapshot {
            version: version.or(definitions.version),
            flags: definitions.flags,
            fetched_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, flag_key: &str) -> Option<&FlagDefinition> {
        self.flags.get(flag_key)
    }

    pub fn flags(&self) -> impl Iterator<Item = &FlagDefinition> {
        self.flags.values()
    }

    pub fn flag_keys(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// Check every definition in the snapshot. See [`DefinitionSet::validate`].
    pub fn validate(&self) -> Result<(), DefinitionValidationError> {
        validate_flags(&self.flags)
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot::empty()
    }
}
