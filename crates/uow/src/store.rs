//! In-memory row store backing the in-memory persister and repository.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use skelmap_core::{MapperError, MapperResult, ObjectData};

use crate::identity_map::{IdentityStrategy, natural_key};

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<String, ObjectData>,
    last_id: u64,
}

/// Per-class tables of rows keyed by natural key.
///
/// Intended for tests/dev. A row inserted without its identifier gets one
/// assigned when the class has a single identifier field: the next value of
/// a per-class sequence starting at 1.
pub struct InMemoryObjectStore {
    strategy: Arc<dyn IdentityStrategy>,
    tables: RwLock<HashMap<String, Table>>,
}

impl InMemoryObjectStore {
    pub fn new(strategy: Arc<dyn IdentityStrategy>) -> Self {
        Self {
            strategy,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> &Arc<dyn IdentityStrategy> {
        &self.strategy
    }

    /// Insert a new row; returns it as stored (with any generated identifier).
    ///
    /// Inserting a row identical to the one already stored under its key
    /// succeeds without writing, so a retried commit can replay its persists.
    /// Any other row under an existing key is a [`MapperError::Storage`] error.
    pub fn insert(&self, class_name: &str, mut data: ObjectData) -> MapperResult<ObjectData> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let table = tables.entry(class_name.to_string()).or_default();

        let identifier = match self.strategy.identifier(class_name, &data) {
            Some(identifier) => identifier,
            None => {
                let fields = self.strategy.identifier_fields(class_name);
                let [field] = fields.as_slice() else {
                    return Err(MapperError::missing_identifier(class_name));
                };
                table.last_id += 1;
                data.insert(field.clone(), Value::from(table.last_id));
                let mut identifier = ObjectData::new();
                identifier.insert(field.clone(), Value::from(table.last_id));
                identifier
            }
        };

        // Keep the sequence ahead of explicitly supplied numeric ids.
        if let Some(id) = identifier.values().next().and_then(Value::as_u64)
            && identifier.len() == 1
        {
            table.last_id = table.last_id.max(id);
        }

        let key = natural_key(&identifier);
        match table.rows.get(&key) {
            // Replaying an insert that already landed.
            Some(existing) if *existing == data => return Ok(data),
            Some(_) => {
                return Err(MapperError::storage(format!(
                    "duplicate {class_name} row with key {key}"
                )));
            }
            None => {}
        }
        table.rows.insert(key, data.clone());
        Ok(data)
    }

    /// Merge `fields` into the row identified by `identifier`; returns the updated row.
    pub fn update(&self, class_name: &str, identifier: &ObjectData, fields: ObjectData) -> MapperResult<ObjectData> {
        let key = natural_key(identifier);
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let row = tables
            .get_mut(class_name)
            .and_then(|t| t.rows.get_mut(&key))
            .ok_or_else(|| MapperError::NotFound {
                class_name: class_name.to_string(),
                key: key.clone(),
            })?;

        for (field, value) in fields {
            row.insert(field, value);
        }
        Ok(row.clone())
    }

    pub fn delete(&self, class_name: &str, identifier: &ObjectData) -> MapperResult<()> {
        let key = natural_key(identifier);
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .get_mut(class_name)
            .and_then(|t| t.rows.remove(&key))
            .map(|_| ())
            .ok_or_else(|| MapperError::NotFound {
                class_name: class_name.to_string(),
                key,
            })
    }

    pub fn find(&self, class_name: &str, identifier: &ObjectData) -> Option<ObjectData> {
        let key = natural_key(identifier);
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(class_name)?.rows.get(&key).cloned()
    }

    /// All rows of a class, ordered by natural key.
    pub fn rows(&self, class_name: &str) -> Vec<ObjectData> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(class_name)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, class_name: &str) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(class_name).map(|t| t.rows.len()).unwrap_or(0)
    }
}

impl core::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryObjectStore")
            .field("classes", &tables.len())
            .finish()
    }
}
