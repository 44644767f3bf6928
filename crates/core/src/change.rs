//! Field-level change records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::ObjectData;

/// One observed mutation of a single field. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    field_name: String,
    old_value: Value,
    new_value: Value,
}

impl Change {
    pub fn new(field_name: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            field_name: field_name.into(),
            old_value,
            new_value,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn old_value(&self) -> &Value {
        &self.old_value
    }

    pub fn new_value(&self) -> &Value {
        &self.new_value
    }
}

/// Ordered changes recorded for one object since its last flush.
///
/// Later changes to a field are appended, never merged, so a field may appear
/// more than once. Consumers either replay entries in order or use
/// [`ChangeSet::latest`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_change(&mut self, change: Change) {
        self.changes.push(change);
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn has_field_change(&self, field_name: &str) -> bool {
        self.changes.iter().any(|c| c.field_name == field_name)
    }

    /// Most recent change recorded for `field_name`.
    pub fn field_change(&self, field_name: &str) -> Option<&Change> {
        self.changes.iter().rev().find(|c| c.field_name == field_name)
    }

    /// Collapse the set into `field -> latest new value`.
    pub fn latest(&self) -> ObjectData {
        let mut data = ObjectData::new();
        for change in &self.changes {
            data.insert(change.field_name.clone(), change.new_value.clone());
        }
        data
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Change;
    type IntoIter = core::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
