//! Persister boundary.
//!
//! Persisters perform the actual writes for one class. The unit of work only
//! schedules objects on them and asks them to commit, phase by phase.

pub mod in_memory;
pub mod r#trait;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use skelmap_core::{MapperError, MapperResult};

pub use in_memory::InMemoryObjectPersister;
pub use r#trait::{CommitFailure, FlushedObject, ObjectAction, ObjectPersister, ObjectPersisterFactory};

/// Factory backed by an explicit class → persister registry.
#[derive(Default)]
pub struct PersisterRegistry {
    persisters: RwLock<HashMap<String, Arc<dyn ObjectPersister>>>,
}

impl PersisterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `persister` under its own class name.
    pub fn register(&self, persister: Arc<dyn ObjectPersister>) {
        let class_name = persister.class_name().to_string();
        self.register_for(class_name, persister);
    }

    /// Register `persister` for `class_name`; one persister may serve several classes.
    pub fn register_for(&self, class_name: impl Into<String>, persister: Arc<dyn ObjectPersister>) {
        self.persisters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class_name.into(), persister);
    }
}

impl ObjectPersisterFactory for PersisterRegistry {
    fn persister(&self, class_name: &str) -> MapperResult<Arc<dyn ObjectPersister>> {
        self.persisters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class_name)
            .cloned()
            .ok_or_else(|| MapperError::PersisterNotFound(class_name.to_string()))
    }
}

impl core::fmt::Debug for PersisterRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let persisters = self.persisters.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("PersisterRegistry")
            .field("classes", &persisters.keys().collect::<Vec<_>>())
            .finish()
    }
}
