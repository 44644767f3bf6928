//! Three-phase write execution.
//!
//! ```text
//! phase objects
//!   ↓
//! 1. Resolve each object's persister (factory) and schedule the object on it
//!   ↓
//! 2. Commit every distinct persister touched, once, in first-touch order
//!   ↓
//! 3. Feed the flushed writes back (identifiers, identity map, post-* events)
//! ```
//!
//! The unit of work runs the phases strictly in the order persists, updates,
//! removes. Later phases may rely on identifiers assigned by earlier ones.
//!
//! A failed phase clears the queues of every persister it touched so that a
//! retry of the whole commit starts from empty persister queues. Writes a
//! persister completed before failing are still fed back, so objects already
//! inserted carry their identifier into the retry.

use std::sync::Arc;

use tracing::{debug, warn};

use skelmap_core::{MapperResult, ObjectHandle, ScheduleOperation};

use crate::change_sets::ChangeSets;
use crate::event_dispatcher::EventDispatcher;
use crate::identity_map::ObjectIdentityMap;
use crate::persister::{CommitFailure, FlushedObject, ObjectPersister, ObjectPersisterFactory};

pub struct PersisterDispatcher {
    persister_factory: Arc<dyn ObjectPersisterFactory>,
    identity_map: Arc<ObjectIdentityMap>,
    event_dispatcher: EventDispatcher,
}

impl PersisterDispatcher {
    pub fn new(
        persister_factory: Arc<dyn ObjectPersisterFactory>,
        identity_map: Arc<ObjectIdentityMap>,
        event_dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            persister_factory,
            identity_map,
            event_dispatcher,
        }
    }

    pub fn execute_persists(&self, objects: &[ObjectHandle]) -> MapperResult<()> {
        self.execute_phase(ScheduleOperation::Persist, objects, |persister, object| {
            persister.persist(object)
        })
    }

    /// Each persister receives the change set recorded for the object.
    pub fn execute_updates(&self, objects: &[ObjectHandle], change_sets: &ChangeSets) -> MapperResult<()> {
        self.execute_phase(ScheduleOperation::Update, objects, |persister, object| {
            persister.update(object, change_sets.object_change_set(object.id()))
        })
    }

    pub fn execute_removes(&self, objects: &[ObjectHandle]) -> MapperResult<()> {
        self.execute_phase(ScheduleOperation::Remove, objects, |persister, object| {
            persister.remove(object)
        })
    }

    fn execute_phase<F>(&self, operation: ScheduleOperation, objects: &[ObjectHandle], schedule: F) -> MapperResult<()>
    where
        F: Fn(&dyn ObjectPersister, &ObjectHandle) -> MapperResult<()>,
    {
        if objects.is_empty() {
            return Ok(());
        }

        let mut touched: Vec<Arc<dyn ObjectPersister>> = Vec::new();
        let result = self.run_phase(objects, &schedule, &mut touched);

        match result {
            Ok(writes) => {
                debug!(phase = %operation, objects = objects.len(), persisters = touched.len(), writes, "phase executed");
                Ok(())
            }
            Err(err) => {
                warn!(phase = %operation, error = %err, "phase failed; clearing persister queues");
                for persister in &touched {
                    persister.clear();
                }
                Err(err)
            }
        }
    }

    fn run_phase<F>(
        &self,
        objects: &[ObjectHandle],
        schedule: &F,
        touched: &mut Vec<Arc<dyn ObjectPersister>>,
    ) -> MapperResult<usize>
    where
        F: Fn(&dyn ObjectPersister, &ObjectHandle) -> MapperResult<()>,
    {
        for object in objects {
            let persister = self.persister_factory.persister(object.class_name())?;
            if !touched
                .iter()
                .any(|seen| std::ptr::addr_eq(Arc::as_ptr(seen), Arc::as_ptr(&persister)))
            {
                touched.push(persister.clone());
            }
            schedule(persister.as_ref(), object)?;
        }

        let mut writes = 0;
        for persister in touched.iter() {
            match persister.commit() {
                Ok(flushed) => {
                    for flushed in flushed {
                        self.after_write(flushed)?;
                        writes += 1;
                    }
                }
                Err(CommitFailure { flushed, error }) => {
                    self.after_partial_write(flushed);
                    return Err(error);
                }
            }
        }
        Ok(writes)
    }

    // The write error wins over any feedback error.
    fn after_partial_write(&self, flushed: Vec<FlushedObject>) {
        for flushed in flushed {
            let object_id = flushed.object.id();
            if let Err(err) = self.after_write(flushed) {
                warn!(%object_id, error = %err, "feedback for completed write failed");
            }
        }
    }

    fn after_write(&self, flushed: FlushedObject) -> MapperResult<()> {
        let FlushedObject { object, operation, data } = flushed;
        match operation {
            ScheduleOperation::Persist => {
                let identifier = data
                    .as_ref()
                    .and_then(|data| self.identity_map.strategy().identifier(object.class_name(), data));
                if let (Some(identifier), Some(data)) = (identifier, data.as_ref()) {
                    if let Some(identifiable) = object.object().as_identifiable() {
                        identifiable.assign_identifier(&identifier);
                    }
                    self.identity_map.add_to_identity_map(&object, data)?;
                }
                self.event_dispatcher.dispatch_post_persist(&object)
            }
            ScheduleOperation::Update => self.event_dispatcher.dispatch_post_update(&object),
            ScheduleOperation::Remove => {
                self.identity_map.detach(&object);
                self.event_dispatcher.dispatch_post_remove(&object)
            }
        }
    }
}

impl core::fmt::Debug for PersisterDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PersisterDispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Note, User, data};
    use crate::identity_map::FieldIdentityStrategy;
    use crate::persister::{InMemoryObjectPersister, PersisterRegistry};
    use crate::store::InMemoryObjectStore;
    use serde_json::json;
    use skelmap_core::{Change, LifecycleEvent, MapperError};
    use skelmap_events::InMemoryEventManager;

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
        identity_map: Arc<ObjectIdentityMap>,
        persister: Arc<InMemoryObjectPersister>,
        dispatcher: PersisterDispatcher,
    }

    fn fixture() -> Fixture {
        let strategy = Arc::new(FieldIdentityStrategy::default());
        let store = Arc::new(InMemoryObjectStore::new(strategy.clone()));
        let identity_map = Arc::new(ObjectIdentityMap::new(strategy));
        let persister = Arc::new(InMemoryObjectPersister::new("User", store.clone()));
        let registry = PersisterRegistry::new();
        registry.register(persister.clone());
        let dispatcher = PersisterDispatcher::new(
            Arc::new(registry),
            identity_map.clone(),
            EventDispatcher::new(Arc::new(InMemoryEventManager::new())),
        );
        Fixture {
            store,
            identity_map,
            persister,
            dispatcher,
        }
    }

    #[test]
    fn persist_assigns_identifier_and_maps_object() {
        let f = fixture();
        let user = User::handle("alice");

        f.dispatcher.execute_persists(&[user.clone()]).unwrap();

        let typed = user.downcast_ref::<User>().unwrap();
        assert_eq!(typed.id(), Some(1));
        assert!(f.identity_map.contains(&user));
        assert_eq!(f.store.len("User"), 1);
        assert_eq!(typed.callbacks(), vec![LifecycleEvent::PostPersist]);
    }

    #[test]
    fn update_writes_recorded_changes() {
        let f = fixture();
        let user = User::handle("alice");
        f.dispatcher.execute_persists(&[user.clone()]).unwrap();
        user.downcast_ref::<User>().unwrap().set_name("bob").unwrap();

        let mut change_sets = ChangeSets::new();
        change_sets.add_object_change(user.id(), Change::new("name", "alice".into(), "bob".into()));
        f.dispatcher.execute_updates(&[user.clone()], &change_sets).unwrap();

        let row = f.store.rows("User").pop().unwrap();
        assert_eq!(row["name"], "bob");
    }

    #[test]
    fn remove_detaches_from_identity_map() {
        let f = fixture();
        let user = User::handle("alice");
        f.dispatcher.execute_persists(&[user.clone()]).unwrap();

        f.dispatcher.execute_removes(&[user.clone()]).unwrap();

        assert!(!f.identity_map.contains(&user));
        assert_eq!(f.store.len("User"), 0);
    }

    #[test]
    fn missing_persister_clears_touched_persisters() {
        let f = fixture();
        let user = User::handle("alice");
        let note = ObjectHandle::new(Note);

        let err = f.dispatcher.execute_persists(&[user.clone(), note]).unwrap_err();

        assert_eq!(err, MapperError::PersisterNotFound("Note".to_string()));
        assert!(!f.persister.is_scheduled_for_persist(&user));
        assert_eq!(f.store.len("User"), 0);
    }

    #[test]
    fn writes_before_a_failure_get_their_identifiers() {
        let f = fixture();
        f.store
            .insert("User", data(json!({ "id": 5, "name": "taken", "email": null })))
            .unwrap();
        let alice = User::handle("alice");
        let bob = User::handle("bob");
        bob.downcast_ref::<User>().unwrap().set_id(5);

        let err = f.dispatcher.execute_persists(&[alice.clone(), bob.clone()]).unwrap_err();

        assert!(matches!(err, MapperError::Storage(_)));
        let typed = alice.downcast_ref::<User>().unwrap();
        assert_eq!(typed.id(), Some(6));
        assert!(f.identity_map.contains(&alice));
        assert_eq!(typed.callbacks(), vec![LifecycleEvent::PostPersist]);
        assert!(!f.identity_map.contains(&bob));

        bob.downcast_ref::<User>().unwrap().set_id(7);
        f.dispatcher.execute_persists(&[alice.clone(), bob.clone()]).unwrap();

        let names: Vec<_> = f.store.rows("User").iter().map(|row| row["name"].clone()).collect();
        assert_eq!(names, vec![json!("taken"), json!("alice"), json!("bob")]);
        assert_eq!(typed.id(), Some(6));
    }

    #[test]
    fn empty_phase_touches_nothing() {
        let f = fixture();
        f.dispatcher.execute_removes(&[]).unwrap();
        assert_eq!(f.store.len("User"), 0);
    }
}
