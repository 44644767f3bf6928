//! Repository boundary: creating, hydrating, merging and refreshing objects.

pub mod in_memory;
pub mod r#trait;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use skelmap_core::{MapperError, MapperResult};

pub use in_memory::InMemoryObjectRepository;
pub use r#trait::{ObjectManager, ObjectRepository};

/// Object manager backed by an explicit class → repository registry.
#[derive(Default)]
pub struct RepositoryRegistry {
    repositories: RwLock<HashMap<String, Arc<dyn ObjectRepository>>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, repository: Arc<dyn ObjectRepository>) {
        self.repositories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repository.class_name().to_string(), repository);
    }
}

impl ObjectManager for RepositoryRegistry {
    fn repository(&self, class_name: &str) -> MapperResult<Arc<dyn ObjectRepository>> {
        self.repositories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class_name)
            .cloned()
            .ok_or_else(|| MapperError::RepositoryNotFound(class_name.to_string()))
    }
}

impl core::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let repositories = self.repositories.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RepositoryRegistry")
            .field("classes", &repositories.keys().collect::<Vec<_>>())
            .finish()
    }
}
