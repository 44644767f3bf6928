use std::sync::Arc;

use tracing::trace;

use skelmap_core::{MapperError, MapperResult, MappedObject, ObjectData, ObjectHandle};

use super::r#trait::ObjectRepository;
use crate::identity_map::{ObjectIdentityMap, natural_key};
use crate::store::InMemoryObjectStore;

type ObjectFactory = dyn Fn() -> Arc<dyn MappedObject> + Send + Sync;

/// Repository reading from an [`InMemoryObjectStore`].
///
/// Instances come from a factory closure; hydration goes through the
/// [`Hydratable`](skelmap_core::Hydratable) capability and identifiers are read
/// through [`Persistable`](skelmap_core::Persistable).
pub struct InMemoryObjectRepository {
    class_name: String,
    store: Arc<InMemoryObjectStore>,
    identity_map: Arc<ObjectIdentityMap>,
    factory: Box<ObjectFactory>,
}

impl InMemoryObjectRepository {
    pub fn new<F>(
        class_name: impl Into<String>,
        store: Arc<InMemoryObjectStore>,
        identity_map: Arc<ObjectIdentityMap>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Arc<dyn MappedObject> + Send + Sync + 'static,
    {
        Self {
            class_name: class_name.into(),
            store,
            identity_map,
            factory: Box::new(factory),
        }
    }

    fn identifier_of(&self, object: &ObjectHandle) -> MapperResult<(ObjectData, ObjectData)> {
        let data = object.persistable()?.prepare_persist_change_set();
        let identifier = self
            .store
            .strategy()
            .identifier(&self.class_name, &data)
            .ok_or_else(|| MapperError::missing_identifier(&self.class_name))?;
        Ok((identifier, data))
    }
}

impl ObjectRepository for InMemoryObjectRepository {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn create(&self, class_name: &str) -> MapperResult<ObjectHandle> {
        if class_name != self.class_name {
            return Err(MapperError::RepositoryNotFound(class_name.to_string()));
        }
        Ok(ObjectHandle::from_arc((self.factory)()))
    }

    fn hydrate(&self, object: &ObjectHandle, data: &ObjectData) -> MapperResult<()> {
        object.hydratable()?.hydrate(data)
    }

    fn merge(&self, object: &ObjectHandle) -> MapperResult<ObjectHandle> {
        let (identifier, data) = self.identifier_of(object)?;

        match self.identity_map.try_get_by_id(&self.class_name, &identifier)? {
            Some(managed) if managed != *object => {
                trace!(class_name = %self.class_name, key = %natural_key(&identifier), "merging onto managed instance");
                self.hydrate(&managed, &data)?;
                Ok(managed)
            }
            _ => Ok(object.clone()),
        }
    }

    fn refresh(&self, object: &ObjectHandle) -> MapperResult<()> {
        let (identifier, _) = self.identifier_of(object)?;
        let row = self
            .store
            .find(&self.class_name, &identifier)
            .ok_or_else(|| MapperError::NotFound {
                class_name: self.class_name.clone(),
                key: natural_key(&identifier),
            })?;
        self.hydrate(object, &row)
    }
}

impl core::fmt::Debug for InMemoryObjectRepository {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryObjectRepository")
            .field("class_name", &self.class_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Note, User, data};
    use crate::identity_map::FieldIdentityStrategy;
    use crate::persister::{InMemoryObjectPersister, ObjectPersister};
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
        identity_map: Arc<ObjectIdentityMap>,
        repository: InMemoryObjectRepository,
    }

    fn fixture() -> Fixture {
        let strategy = Arc::new(FieldIdentityStrategy::default());
        let store = Arc::new(InMemoryObjectStore::new(strategy.clone()));
        let identity_map = Arc::new(ObjectIdentityMap::new(strategy));
        let repository = InMemoryObjectRepository::new("User", store.clone(), identity_map.clone(), || {
            Arc::new(User::default())
        });
        Fixture {
            store,
            identity_map,
            repository,
        }
    }

    #[test]
    fn create_only_serves_its_class() {
        let f = fixture();
        let user = f.repository.create("User").unwrap();
        assert!(user.downcast_ref::<User>().is_some());
        assert_eq!(
            f.repository.create("Group"),
            Err(MapperError::RepositoryNotFound("Group".to_string()))
        );
    }

    #[test]
    fn object_to_array_then_hydrate_reproduces_fields() {
        let f = fixture();
        let persister = InMemoryObjectPersister::new("User", f.store.clone());
        let original = User::handle("alice");
        let typed = original.downcast_ref::<User>().unwrap();
        typed.set_id(3);
        typed.set_email("alice@example.com").unwrap();

        let row = persister.object_to_array(&original).unwrap();
        let copy = f.repository.create("User").unwrap();
        f.repository.hydrate(&copy, &row).unwrap();

        let copy = copy.downcast_ref::<User>().unwrap();
        assert_eq!(copy.id(), Some(3));
        assert_eq!(copy.name(), "alice");
        assert_eq!(copy.email().as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn refresh_discards_in_memory_state() {
        let f = fixture();
        f.store
            .insert("User", data(json!({ "id": 1, "name": "stored", "email": null })))
            .unwrap();
        let user = User::handle("edited");
        user.downcast_ref::<User>().unwrap().set_id(1);

        f.repository.refresh(&user).unwrap();

        assert_eq!(user.downcast_ref::<User>().unwrap().name(), "stored");
    }

    #[test]
    fn refresh_of_unknown_row_fails() {
        let f = fixture();
        let user = User::handle("ghost");
        user.downcast_ref::<User>().unwrap().set_id(99);

        assert!(matches!(f.repository.refresh(&user), Err(MapperError::NotFound { .. })));
    }

    #[test]
    fn merge_copies_onto_managed_instance() {
        let f = fixture();
        let managed = User::handle("managed");
        managed.downcast_ref::<User>().unwrap().set_id(5);
        f.identity_map
            .add_to_identity_map(&managed, &data(json!({ "id": 5 })))
            .unwrap();

        let detached = User::handle("detached");
        detached.downcast_ref::<User>().unwrap().set_id(5);

        let merged = f.repository.merge(&detached).unwrap();
        assert_eq!(merged, managed);
        assert_eq!(managed.downcast_ref::<User>().unwrap().name(), "detached");
    }

    #[test]
    fn merge_without_managed_instance_returns_the_object() {
        let f = fixture();
        let detached = User::handle("detached");
        detached.downcast_ref::<User>().unwrap().set_id(8);

        assert_eq!(f.repository.merge(&detached).unwrap(), detached);
    }

    #[test]
    fn capabilities_are_required() {
        let f = fixture();
        let note = ObjectHandle::new(Note);
        assert!(matches!(
            f.repository.hydrate(&note, &ObjectData::new()),
            Err(MapperError::MissingCapability { capability: "Hydratable", .. })
        ));
    }
}
