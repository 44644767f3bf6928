use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use skelmap_core::{ChangeSet, MapperError, MapperResult, ObjectData, ObjectHandle, ObjectId, ScheduleOperation};

use super::r#trait::{CommitFailure, FlushedObject, ObjectPersister};
use crate::store::InMemoryObjectStore;

#[derive(Debug, Default)]
struct PersisterQueues {
    persists: Vec<ObjectHandle>,
    updates: Vec<(ObjectHandle, ChangeSet)>,
    removes: Vec<ObjectHandle>,
    scheduled: HashSet<(ScheduleOperation, ObjectId)>,
}

impl PersisterQueues {
    fn schedule(&mut self, operation: ScheduleOperation, object: &ObjectHandle) -> MapperResult<()> {
        if !self.scheduled.insert((operation, object.id())) {
            return Err(MapperError::already_scheduled(operation, object.class_name()));
        }
        Ok(())
    }

    fn is_scheduled(&self, operation: ScheduleOperation, object: &ObjectHandle) -> bool {
        self.scheduled.contains(&(operation, object.id()))
    }
}

/// Persister writing through an [`InMemoryObjectStore`].
///
/// Objects must implement [`Persistable`](skelmap_core::Persistable). Writes
/// happen on `commit()` in the order persists, updates, removes.
pub struct InMemoryObjectPersister {
    class_name: String,
    store: Arc<InMemoryObjectStore>,
    queues: Mutex<PersisterQueues>,
}

impl InMemoryObjectPersister {
    pub fn new(class_name: impl Into<String>, store: Arc<InMemoryObjectStore>) -> Self {
        Self {
            class_name: class_name.into(),
            store,
            queues: Mutex::new(PersisterQueues::default()),
        }
    }

    pub fn store(&self) -> &Arc<InMemoryObjectStore> {
        &self.store
    }

    fn queues(&self) -> MutexGuard<'_, PersisterQueues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_all(&self, queues: PersisterQueues, flushed: &mut Vec<FlushedObject>) -> MapperResult<()> {
        for object in queues.persists {
            let data = self.persist_object(&object)?;
            flushed.push(FlushedObject::persisted(object, data));
        }
        for (object, change_set) in queues.updates {
            let data = self.update_object(&object, &change_set)?;
            flushed.push(FlushedObject::updated(object, data));
        }
        for object in queues.removes {
            self.remove_object(&object)?;
            flushed.push(FlushedObject::removed(object));
        }
        Ok(())
    }

    fn identifier_of(&self, object: &ObjectHandle) -> MapperResult<ObjectData> {
        let data = self.object_to_array(object)?;
        self.store
            .strategy()
            .identifier(&self.class_name, &data)
            .ok_or_else(|| MapperError::missing_identifier(&self.class_name))
    }
}

impl ObjectPersister for InMemoryObjectPersister {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn persist(&self, object: &ObjectHandle) -> MapperResult<()> {
        let mut queues = self.queues();
        queues.schedule(ScheduleOperation::Persist, object)?;
        queues.persists.push(object.clone());
        Ok(())
    }

    fn update(&self, object: &ObjectHandle, change_set: ChangeSet) -> MapperResult<()> {
        let mut queues = self.queues();
        queues.schedule(ScheduleOperation::Update, object)?;
        queues.updates.push((object.clone(), change_set));
        Ok(())
    }

    fn remove(&self, object: &ObjectHandle) -> MapperResult<()> {
        let mut queues = self.queues();
        queues.schedule(ScheduleOperation::Remove, object)?;
        queues.removes.push(object.clone());
        Ok(())
    }

    fn commit(&self) -> Result<Vec<FlushedObject>, CommitFailure> {
        // Writes run without the queue lock held.
        let queues = std::mem::take(&mut *self.queues());
        let mut flushed = Vec::with_capacity(queues.persists.len() + queues.updates.len() + queues.removes.len());

        if let Err(error) = self.write_all(queues, &mut flushed) {
            debug!(class_name = %self.class_name, writes = flushed.len(), %error, "persister commit stopped");
            return Err(CommitFailure::new(flushed, error));
        }

        debug!(class_name = %self.class_name, writes = flushed.len(), "persister committed");
        Ok(flushed)
    }

    fn object_to_array(&self, object: &ObjectHandle) -> MapperResult<ObjectData> {
        Ok(object.persistable()?.prepare_persist_change_set())
    }

    fn persist_object(&self, object: &ObjectHandle) -> MapperResult<ObjectData> {
        let data = self.object_to_array(object)?;
        self.store.insert(&self.class_name, data)
    }

    fn update_object(&self, object: &ObjectHandle, change_set: &ChangeSet) -> MapperResult<ObjectData> {
        let identifier = self.identifier_of(object)?;
        let fields = object.persistable()?.prepare_update_change_set(change_set);
        self.store.update(&self.class_name, &identifier, fields)
    }

    fn remove_object(&self, object: &ObjectHandle) -> MapperResult<()> {
        let identifier = self.identifier_of(object)?;
        self.store.delete(&self.class_name, &identifier)
    }

    fn clear(&self) {
        *self.queues() = PersisterQueues::default();
    }

    fn is_scheduled_for_persist(&self, object: &ObjectHandle) -> bool {
        self.queues().is_scheduled(ScheduleOperation::Persist, object)
    }

    fn is_scheduled_for_update(&self, object: &ObjectHandle) -> bool {
        self.queues().is_scheduled(ScheduleOperation::Update, object)
    }

    fn is_scheduled_for_remove(&self, object: &ObjectHandle) -> bool {
        self.queues().is_scheduled(ScheduleOperation::Remove, object)
    }
}

impl core::fmt::Debug for InMemoryObjectPersister {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryObjectPersister")
            .field("class_name", &self.class_name)
            .finish_non_exhaustive()
    }
}
