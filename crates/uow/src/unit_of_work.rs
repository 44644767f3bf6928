//! Session-scoped orchestrator of pending writes.
//!
//! ## Commit pipeline
//!
//! ```text
//! commit()
//!   ↓
//! 1. Nothing scheduled → return (no events, no persister calls)
//!   ↓
//! 2. preFlush → per-object preFlush callbacks → onFlush
//!   ↓
//! 3. persists → updates → removes (persister dispatcher, one phase at a time)
//!   ↓
//! 4. postFlush
//!   ↓
//! 5. Reset queues and the change-set ledger
//!   ↓
//! 6. Replay property changes deferred while committing
//! ```
//!
//! Any failure skips step 5; scheduled work stays in place
//! and the whole commit may be retried. Scheduling events (`prePersist`,
//! `preUpdate`, `preRemove`) are not dispatched again on retry.
//!
//! ## Reentrancy
//!
//! No lock is held while events are dispatched, so listeners may call back
//! into the unit of work. While a commit runs, `persist`, `update`, `remove`,
//! `clear` and `commit` fail with [`MapperError::CommitInProgress`].
//!
//! Property changes reported while a commit runs are deferred. Once the commit
//! ends, successfully or not, they go through the normal tracking path: the
//! object is scheduled for update and the change is recorded, so the next
//! commit writes it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::{Span, debug, field, instrument, trace, warn};

use skelmap_core::{
    Change, ChangeSet, MapperError, MapperResult, ObjectData, ObjectHandle, ObjectId,
    PropertyChangedListener, ScheduleOperation,
};
use skelmap_events::EventManager;

use crate::change_sets::ChangeSets;
use crate::event_dispatcher::EventDispatcher;
use crate::identity_map::ObjectIdentityMap;
use crate::persister::{ObjectPersister, ObjectPersisterFactory};
use crate::persister_dispatcher::PersisterDispatcher;
use crate::repository::{ObjectManager, ObjectRepository};

/// Insertion-ordered set of scheduled objects.
#[derive(Debug, Default, Clone)]
struct ScheduleQueue {
    objects: Vec<ObjectHandle>,
    ids: HashSet<ObjectId>,
}

impl ScheduleQueue {
    fn insert(&mut self, object: &ObjectHandle) -> bool {
        if !self.ids.insert(object.id()) {
            return false;
        }
        self.objects.push(object.clone());
        true
    }

    fn contains(&self, object: ObjectId) -> bool {
        self.ids.contains(&object)
    }

    fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn len(&self) -> usize {
        self.objects.len()
    }

    fn to_vec(&self) -> Vec<ObjectHandle> {
        self.objects.clone()
    }
}

#[derive(Debug, Default)]
struct ScheduledState {
    objects_to_persist: ScheduleQueue,
    objects_to_update: ScheduleQueue,
    objects_to_remove: ScheduleQueue,
    change_sets: ChangeSets,
    committing: bool,
    deferred_changes: Vec<(ObjectId, Change)>,
}

impl ScheduledState {
    fn ensure_idle(&self) -> MapperResult<()> {
        if self.committing {
            return Err(MapperError::CommitInProgress);
        }
        Ok(())
    }

    fn queue(&self, operation: ScheduleOperation) -> &ScheduleQueue {
        match operation {
            ScheduleOperation::Persist => &self.objects_to_persist,
            ScheduleOperation::Update => &self.objects_to_update,
            ScheduleOperation::Remove => &self.objects_to_remove,
        }
    }

    fn queue_mut(&mut self, operation: ScheduleOperation) -> &mut ScheduleQueue {
        match operation {
            ScheduleOperation::Persist => &mut self.objects_to_persist,
            ScheduleOperation::Update => &mut self.objects_to_update,
            ScheduleOperation::Remove => &mut self.objects_to_remove,
        }
    }

    fn has_scheduled_work(&self) -> bool {
        !(self.objects_to_persist.is_empty() && self.objects_to_update.is_empty() && self.objects_to_remove.is_empty())
    }

    /// Drops scheduled work and the ledger; the commit flag and deferred
    /// changes are left alone.
    fn reset(&mut self) {
        self.objects_to_persist = ScheduleQueue::default();
        self.objects_to_update = ScheduleQueue::default();
        self.objects_to_remove = ScheduleQueue::default();
        self.change_sets = ChangeSets::new();
    }
}

/// Clears the commit flag when the commit ends, including by unwinding.
struct CommitGuard<'a> {
    state: &'a Mutex<ScheduledState>,
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).committing = false;
    }
}

/// Tracks objects of one session and flushes their changes together.
///
/// Always used behind `Arc`: the unit of work registers a `Weak` reference to
/// itself as property-change listener on the objects it manages.
pub struct UnitOfWork {
    this: Weak<UnitOfWork>,
    object_manager: Arc<dyn ObjectManager>,
    persister_factory: Arc<dyn ObjectPersisterFactory>,
    identity_map: Arc<ObjectIdentityMap>,
    event_dispatcher: EventDispatcher,
    persister_dispatcher: PersisterDispatcher,
    state: Mutex<ScheduledState>,
}

impl UnitOfWork {
    pub fn new(
        object_manager: Arc<dyn ObjectManager>,
        persister_factory: Arc<dyn ObjectPersisterFactory>,
        event_manager: Arc<dyn EventManager>,
        identity_map: Arc<ObjectIdentityMap>,
    ) -> Arc<Self> {
        let event_dispatcher = EventDispatcher::new(event_manager);
        let persister_dispatcher =
            PersisterDispatcher::new(persister_factory.clone(), identity_map.clone(), event_dispatcher.clone());

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            object_manager,
            persister_factory,
            identity_map,
            event_dispatcher,
            persister_dispatcher,
            state: Mutex::new(ScheduledState::default()),
        })
    }

    pub fn identity_map(&self) -> &Arc<ObjectIdentityMap> {
        &self.identity_map
    }

    pub fn event_dispatcher(&self) -> &EventDispatcher {
        &self.event_dispatcher
    }

    /// Schedule `object` for insertion.
    ///
    /// Dispatches `prePersist` first, then queues the object and, if it
    /// supports change notification, starts listening to it.
    pub fn persist(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.check_schedulable(ScheduleOperation::Persist, object)?;
        self.event_dispatcher.dispatch_pre_persist(object)?;
        self.enqueue(ScheduleOperation::Persist, object)?;
        self.listen_to(object);
        Ok(())
    }

    /// Schedule `object` for update; `preUpdate` sees its current change set.
    pub fn update(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.check_schedulable(ScheduleOperation::Update, object)?;
        let change_set = self.object_change_set(object);
        self.event_dispatcher.dispatch_pre_update(object, &change_set)?;
        self.enqueue(ScheduleOperation::Update, object)
    }

    pub fn remove(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.check_schedulable(ScheduleOperation::Remove, object)?;
        self.event_dispatcher.dispatch_pre_remove(object)?;
        self.enqueue(ScheduleOperation::Remove, object)
    }

    /// Forget all scheduled work and the identity map (only `class_name`'s
    /// entries if given), then dispatch `onClear`. Idempotent.
    pub fn clear(&self, class_name: Option<&str>) -> MapperResult<()> {
        {
            let mut state = self.state();
            state.ensure_idle()?;
            self.identity_map.clear(class_name);
            state.reset();
        }
        debug!(class_name = class_name.unwrap_or("*"), "unit of work cleared");
        self.event_dispatcher.dispatch_on_clear(class_name)
    }

    /// Remove `object` from the identity map; scheduled work is untouched.
    pub fn detach(&self, object: &ObjectHandle) -> bool {
        self.identity_map.detach(object)
    }

    pub fn contains(&self, object: &ObjectHandle) -> bool {
        self.identity_map.contains(object) || self.is_scheduled_for_persist(object)
    }

    /// Flush everything scheduled. See the module docs for the protocol.
    #[instrument(skip(self), fields(persists = field::Empty, updates = field::Empty, removes = field::Empty))]
    pub fn commit(&self) -> MapperResult<()> {
        let (persists, updates, removes, change_sets) = {
            let mut state = self.state();
            state.ensure_idle()?;
            if !state.has_scheduled_work() {
                trace!("nothing scheduled");
                return Ok(());
            }
            state.committing = true;
            (
                state.objects_to_persist.to_vec(),
                state.objects_to_update.to_vec(),
                state.objects_to_remove.to_vec(),
                state.change_sets.clone(),
            )
        };
        let result = {
            let _committing = CommitGuard { state: &self.state };

            let span = Span::current();
            span.record("persists", persists.len());
            span.record("updates", updates.len());
            span.record("removes", removes.len());

            let result = self.flush(&persists, &updates, &removes, &change_sets);
            match &result {
                Ok(()) => {
                    self.state().reset();
                    debug!(changed_objects = change_sets.len(), "commit complete");
                }
                Err(err) => warn!(error = %err, "commit failed; scheduled work kept for retry"),
            }
            result
        };

        // A commit error takes precedence over a replay error.
        let replayed = self.replay_deferred_changes();
        result.and(replayed)
    }

    fn replay_deferred_changes(&self) -> MapperResult<()> {
        let deferred = std::mem::take(&mut self.state().deferred_changes);
        let mut result = Ok(());
        for (object, change) in deferred {
            let replayed = self.property_changed(object, change.field_name(), change.old_value(), change.new_value());
            if let Err(err) = replayed {
                warn!(object_id = %object, field_name = change.field_name(), error = %err, "deferred change not tracked");
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    fn flush(
        &self,
        persists: &[ObjectHandle],
        updates: &[ObjectHandle],
        removes: &[ObjectHandle],
        change_sets: &ChangeSets,
    ) -> MapperResult<()> {
        self.event_dispatcher.dispatch_pre_flush()?;

        let affected: Vec<ObjectHandle> = persists.iter().chain(updates).chain(removes).cloned().collect();
        self.event_dispatcher.dispatch_pre_flush_lifecycle_callbacks(&affected)?;
        self.event_dispatcher.dispatch_on_flush()?;

        self.persister_dispatcher.execute_persists(persists)?;
        self.persister_dispatcher.execute_updates(updates, change_sets)?;
        self.persister_dispatcher.execute_removes(removes)?;

        self.event_dispatcher.dispatch_post_flush()
    }

    /// The identity-mapped instance for `data`'s natural key, or a new one
    /// created and hydrated through the class repository.
    pub fn get_or_create_object(&self, class_name: &str, mut data: ObjectData) -> MapperResult<ObjectHandle> {
        if let Some(existing) = self.identity_map.try_get_by_id(class_name, &data)? {
            return Ok(existing);
        }

        let repository = self.object_manager.repository(class_name)?;
        let object = repository.create(class_name)?;
        self.listen_to(&object);

        self.event_dispatcher.dispatch_pre_load(&object, &mut data)?;
        repository.hydrate(&object, &data)?;
        self.event_dispatcher.dispatch_post_load(&object)?;

        self.identity_map.add_to_identity_map(&object, &data)?;
        trace!(class_name, object_id = %object.id(), "object loaded");
        Ok(object)
    }

    pub fn merge(&self, object: &ObjectHandle) -> MapperResult<ObjectHandle> {
        self.object_repository(object)?.merge(object)
    }

    pub fn refresh(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.object_repository(object)?.refresh(object)
    }

    pub fn object_persister(&self, object: &ObjectHandle) -> MapperResult<Arc<dyn ObjectPersister>> {
        self.persister_factory.persister(object.class_name())
    }

    pub fn object_repository(&self, object: &ObjectHandle) -> MapperResult<Arc<dyn ObjectRepository>> {
        self.object_manager.repository(object.class_name())
    }

    /// Accumulated changes for `object`; empty if none were recorded.
    pub fn object_change_set(&self, object: &ObjectHandle) -> ChangeSet {
        self.state().change_sets.object_change_set(object.id())
    }

    pub fn objects_to_persist(&self) -> Vec<ObjectHandle> {
        self.state().objects_to_persist.to_vec()
    }

    pub fn objects_to_update(&self) -> Vec<ObjectHandle> {
        self.state().objects_to_update.to_vec()
    }

    pub fn objects_to_remove(&self) -> Vec<ObjectHandle> {
        self.state().objects_to_remove.to_vec()
    }

    pub fn is_in_identity_map(&self, object: &ObjectHandle) -> bool {
        self.identity_map.contains(object)
    }

    pub fn is_scheduled_for_persist(&self, object: &ObjectHandle) -> bool {
        self.state().objects_to_persist.contains(object.id())
    }

    pub fn is_scheduled_for_update(&self, object: &ObjectHandle) -> bool {
        self.state().objects_to_update.contains(object.id())
    }

    pub fn is_scheduled_for_remove(&self, object: &ObjectHandle) -> bool {
        self.state().objects_to_remove.contains(object.id())
    }

    fn state(&self) -> MutexGuard<'_, ScheduledState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_schedulable(&self, operation: ScheduleOperation, object: &ObjectHandle) -> MapperResult<()> {
        let state = self.state();
        state.ensure_idle()?;
        if state.queue(operation).contains(object.id()) {
            return Err(MapperError::already_scheduled(operation, object.class_name()));
        }
        Ok(())
    }

    // Re-checked after the pre-* event: a listener may have scheduled the
    // object or started a commit in the meantime.
    fn enqueue(&self, operation: ScheduleOperation, object: &ObjectHandle) -> MapperResult<()> {
        let mut state = self.state();
        state.ensure_idle()?;
        if !state.queue_mut(operation).insert(object) {
            return Err(MapperError::already_scheduled(operation, object.class_name()));
        }
        trace!(
            operation = %operation,
            class_name = object.class_name(),
            object_id = %object.id(),
            queued = state.queue(operation).len(),
            "object scheduled"
        );
        Ok(())
    }

    fn listen_to(&self, object: &ObjectHandle) {
        if let Some(notifier) = object.object().as_notify_property_changed() {
            let listener: Weak<dyn PropertyChangedListener> = self.this.clone();
            notifier.add_property_changed_listener(object.id(), listener);
        }
    }
}

impl PropertyChangedListener for UnitOfWork {
    /// Record a field change on a managed object, scheduling it for update
    /// first if needed. In that case `preUpdate` sees the change set as it
    /// stood before this change.
    fn property_changed(
        &self,
        object: ObjectId,
        field_name: &str,
        old_value: &Value,
        new_value: &Value,
    ) -> MapperResult<()> {
        let Some(handle) = self.identity_map.get(object) else {
            trace!(object_id = %object, field_name, "change on unmanaged object ignored");
            return Ok(());
        };

        let scheduled = {
            let mut state = self.state();
            if state.committing {
                debug!(object_id = %object, field_name, "change during commit deferred");
                state
                    .deferred_changes
                    .push((object, Change::new(field_name, old_value.clone(), new_value.clone())));
                return Ok(());
            }
            state.objects_to_update.contains(object)
        };
        if !scheduled {
            self.update(&handle)?;
        }

        self.state()
            .change_sets
            .add_object_change(object, Change::new(field_name, old_value.clone(), new_value.clone()));
        Ok(())
    }
}

impl core::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state();
        f.debug_struct("UnitOfWork")
            .field("objects_to_persist", &state.objects_to_persist.len())
            .field("objects_to_update", &state.objects_to_update.len())
            .field("objects_to_remove", &state.objects_to_remove.len())
            .field("changed_objects", &state.change_sets.len())
            .field("committing", &state.committing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{User, data};
    use crate::identity_map::FieldIdentityStrategy;
    use crate::persister::{InMemoryObjectPersister, PersisterRegistry};
    use crate::repository::{InMemoryObjectRepository, RepositoryRegistry};
    use crate::store::InMemoryObjectStore;
    use serde_json::json;
    use skelmap_core::LifecycleEvent;
    use skelmap_events::{InMemoryEventManager, from_fn};

    fn unit_of_work() -> Arc<UnitOfWork> {
        unit_of_work_with_events().0
    }

    fn unit_of_work_with_events() -> (Arc<UnitOfWork>, Arc<InMemoryEventManager>) {
        let strategy = Arc::new(FieldIdentityStrategy::default());
        let store = Arc::new(InMemoryObjectStore::new(strategy.clone()));
        let identity_map = Arc::new(ObjectIdentityMap::new(strategy));

        let persisters = PersisterRegistry::new();
        persisters.register(Arc::new(InMemoryObjectPersister::new("User", store.clone())));
        let repositories = RepositoryRegistry::new();
        repositories.register(Arc::new(InMemoryObjectRepository::new(
            "User",
            store,
            identity_map.clone(),
            || Arc::new(User::default()),
        )));

        let events = Arc::new(InMemoryEventManager::new());
        let uow = UnitOfWork::new(Arc::new(repositories), Arc::new(persisters), events.clone(), identity_map);
        (uow, events)
    }

    #[test]
    fn persist_registers_as_listener_once() {
        let uow = unit_of_work();
        let user = User::handle("alice");

        uow.persist(&user).unwrap();

        assert!(uow.is_scheduled_for_persist(&user));
        assert!(uow.contains(&user));
        assert!(!uow.is_in_identity_map(&user));
        assert_eq!(user.downcast_ref::<User>().unwrap().listener_count(), 1);
    }

    #[test]
    fn scheduling_twice_fails_per_operation() {
        let uow = unit_of_work();
        let user = User::handle("alice");

        uow.update(&user).unwrap();
        uow.remove(&user).unwrap();

        assert_eq!(
            uow.update(&user),
            Err(MapperError::already_scheduled(ScheduleOperation::Update, "User"))
        );
        assert_eq!(
            uow.remove(&user),
            Err(MapperError::already_scheduled(ScheduleOperation::Remove, "User"))
        );
        assert_eq!(uow.objects_to_update(), vec![user.clone()]);
        assert_eq!(uow.objects_to_remove(), vec![user]);
    }

    #[test]
    fn queues_keep_scheduling_order() {
        let uow = unit_of_work();
        let users: Vec<_> = ["a", "b", "c"].into_iter().map(User::handle).collect();
        for user in &users {
            uow.persist(user).unwrap();
        }
        assert_eq!(uow.objects_to_persist(), users);
    }

    #[test]
    fn changes_during_commit_are_scheduled_for_the_next_one() {
        let (uow, events) = unit_of_work_with_events();
        let user = uow.get_or_create_object("User", data(json!({ "id": 1, "name": "alice" }))).unwrap();
        uow.persist(&user).unwrap();

        let late = user.clone();
        events.add_listener(
            LifecycleEvent::PreFlush,
            from_fn(move |_| late.downcast_ref::<User>().unwrap().set_name("late")),
        );
        uow.commit().unwrap();

        assert!(uow.is_scheduled_for_update(&user));
        assert!(!uow.is_scheduled_for_persist(&user));
        assert_eq!(
            uow.object_change_set(&user).changes(),
            &[Change::new("name", json!("alice"), json!("late"))]
        );

        events.remove_listeners(LifecycleEvent::PreFlush);
        uow.commit().unwrap();
        assert!(!uow.is_scheduled_for_update(&user));
        assert!(uow.object_change_set(&user).is_empty());
    }

    #[test]
    fn loaded_object_changes_are_tracked() {
        let uow = unit_of_work();
        let user = uow.get_or_create_object("User", data(json!({ "id": 1, "name": "alice" }))).unwrap();
        let typed = user.downcast_ref::<User>().unwrap();

        typed.set_name("bob").unwrap();
        typed.set_email("bob@example.com").unwrap();

        assert!(uow.is_scheduled_for_update(&user));
        let change_set = uow.object_change_set(&user);
        assert_eq!(change_set.len(), 2);
        assert_eq!(change_set.changes()[0].field_name(), "name");
        assert_eq!(change_set.changes()[0].old_value(), &json!("alice"));
        assert_eq!(change_set.changes()[1].new_value(), &json!("bob@example.com"));
        assert_eq!(
            typed.callbacks(),
            vec![LifecycleEvent::PreLoad, LifecycleEvent::PostLoad, LifecycleEvent::PreUpdate]
        );
    }

    #[test]
    fn clear_scoped_to_class_keeps_other_entries() {
        let uow = unit_of_work();
        let user = uow.get_or_create_object("User", data(json!({ "id": 1, "name": "alice" }))).unwrap();

        uow.clear(Some("Group")).unwrap();
        assert!(uow.is_in_identity_map(&user));

        uow.clear(Some("User")).unwrap();
        assert!(!uow.is_in_identity_map(&user));
    }

    #[test]
    fn detach_leaves_queues_alone() {
        let uow = unit_of_work();
        let user = uow.get_or_create_object("User", data(json!({ "id": 1, "name": "alice" }))).unwrap();
        uow.remove(&user).unwrap();

        assert!(uow.detach(&user));
        assert!(!uow.contains(&user));
        assert!(uow.is_scheduled_for_remove(&user));
    }

    #[test]
    fn debug_reports_queue_sizes() {
        let uow = unit_of_work();
        uow.persist(&User::handle("alice")).unwrap();
        let rendered = format!("{uow:?}");
        assert!(rendered.contains("objects_to_persist: 1"));
    }
}
