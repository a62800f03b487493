//! Structural diff between two configuration documents

use std::collections::BTreeSet;

use serde::Serialize;

use crate::document::ConfigDocument;

/// Dot paths that differ between two documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigDiff {
    /// Present only in the new document
    pub added: BTreeSet<String>,
    /// Present only in the old document
    pub removed: BTreeSet<String>,
    /// Present in both with unequal values
    pub modified: BTreeSet<String>,
}

impl ConfigDiff {
    /// Compare flattened `old` and `new`
    pub fn between(old: &ConfigDocument, new: &ConfigDocument) -> Self {
        let old_flat = old.flatten();
        let new_flat = new.flatten();
        let mut diff = ConfigDiff::default();

        for (key, old_value) in &old_flat {
            match new_flat.get(key) {
                None => {
                    diff.removed.insert(key.clone());
                }
                Some(new_value) if new_value != old_value => {
                    diff.modified.insert(key.clone());
                }
                Some(_) => {}
            }
        }
        for key in new_flat.keys() {
            if !old_flat.contains_key(key) {
                diff.added.insert(key.clone());
            }
        }
        diff
    }

    /// Union of added, removed and modified keys
    pub fn changed_keys(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .chain(&self.removed)
            .chain(&self.modified)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}
