//! Real → placeholder mapping model.
//!
//! A [`MappingSet`] holds two tables:
//! - **manual**: curated by the operator, authoritative, never written here
//! - **automatic**: discovered at runtime and persisted by the store
//!
//! The merged view ([`MappingSet::all`]) overlays manual on top of automatic,
//! so a manual entry always wins for the same real value while the automatic
//! entry stays stored.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Ordered real → placeholder table.
///
/// Ordered so that persisted JSON is stable between runs.
pub type Mapping = BTreeMap<String, String>;

/// Manual and automatic mappings as stored in the config document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingSet {
    /// Operator-curated entries.
    #[serde(rename = "mappingsManual", alias = "mappings")]
    pub manual: Mapping,

    /// Entries discovered at runtime.
    #[serde(rename = "mappingsAuto", alias = "autoMappings")]
    pub auto: Mapping,
}

impl MappingSet {
    #[must_use]
    pub const fn new(manual: Mapping, auto: Mapping) -> Self {
        Self { manual, auto }
    }

    /// Merged real → placeholder table. Manual overrides automatic.
    #[must_use]
    pub fn all(&self) -> Mapping {
        let mut all = self.auto.clone();
        for (real, placeholder) in &self.manual {
            all.insert(real.clone(), placeholder.clone());
        }
        all
    }

    /// Placeholder → real table derived from [`Self::all`].
    #[must_use]
    pub fn reverse(&self) -> Mapping {
        self.all()
            .into_iter()
            .map(|(real, placeholder)| (placeholder, real))
            .collect()
    }

    /// Whether `real` already has a placeholder in either table.
    #[must_use]
    pub fn contains(&self, real: &str) -> bool {
        self.manual.contains_key(real) || self.auto.contains_key(real)
    }

    /// Every placeholder currently handed out, across both tables.
    #[must_use]
    pub fn used_placeholders(&self) -> HashSet<String> {
        self.manual
            .values()
            .chain(self.auto.values())
            .cloned()
            .collect()
    }

    /// Merge newly discovered entries into the automatic table.
    ///
    /// An entry is only added when its key is absent from both tables, so an
    /// existing placeholder is never regenerated.
    #[must_use]
    pub fn merge(&self, discovered: &Mapping) -> Mapping {
        let mut merged = self.auto.clone();
        for (real, placeholder) in discovered {
            if !self.contains(real) {
                merged.insert(real.clone(), placeholder.clone());
            }
        }
        merged
    }

    /// Copy of this set with `discovered` merged into the automatic table.
    #[must_use]
    pub fn with_discovered(&self, discovered: &Mapping) -> Self {
        Self {
            manual: self.manual.clone(),
            auto: self.merge(discovered),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manual.is_empty() && self.auto.is_empty()
    }
}
