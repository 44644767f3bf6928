//! Dirty-tracking ledger.

use std::collections::HashMap;

use skelmap_core::{Change, ChangeSet, ObjectId};

/// Change sets per tracked object, keyed by identity token.
///
/// Entries are only ever appended; the whole ledger is replaced on clear or
/// after a successful commit.
#[derive(Debug, Clone, Default)]
pub struct ChangeSets {
    sets: HashMap<ObjectId, ChangeSet>,
}

impl ChangeSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object_change(&mut self, object: ObjectId, change: Change) {
        self.sets.entry(object).or_default().add_change(change);
    }

    /// Recorded changes for `object`, or an empty set.
    pub fn object_change_set(&self, object: ObjectId) -> ChangeSet {
        self.sets.get(&object).cloned().unwrap_or_default()
    }

    /// Number of objects with at least one recorded change.
    pub(crate) fn len(&self) -> usize {
        self.sets.len()
    }
}
