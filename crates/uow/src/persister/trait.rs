use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use skelmap_core::{ChangeSet, MapperError, MapperResult, ObjectData, ObjectHandle, ScheduleOperation};

/// One write a persister performed during its `commit()`.
///
/// The persister dispatcher feeds these back into the session: persisted
/// objects receive their generated identifier and enter the identity map,
/// removed objects leave it.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedObject {
    pub object: ObjectHandle,
    pub operation: ScheduleOperation,
    /// Data written to (or returned by) the store; `None` for removals.
    pub data: Option<ObjectData>,
}

impl FlushedObject {
    pub fn persisted(object: ObjectHandle, data: ObjectData) -> Self {
        Self {
            object,
            operation: ScheduleOperation::Persist,
            data: Some(data),
        }
    }

    pub fn updated(object: ObjectHandle, data: ObjectData) -> Self {
        Self {
            object,
            operation: ScheduleOperation::Update,
            data: Some(data),
        }
    }

    pub fn removed(object: ObjectHandle) -> Self {
        Self {
            object,
            operation: ScheduleOperation::Remove,
            data: None,
        }
    }
}

/// A persister `commit` that stopped at a failed write.
///
/// `flushed` holds the writes that reached storage before `error`. They are
/// fed back into the session like a successful commit's writes.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} (after {} completed writes)", .flushed.len())]
pub struct CommitFailure {
    pub flushed: Vec<FlushedObject>,
    pub error: MapperError,
}

impl CommitFailure {
    pub fn new(flushed: Vec<FlushedObject>, error: MapperError) -> Self {
        Self { flushed, error }
    }
}

impl From<MapperError> for CommitFailure {
    fn from(error: MapperError) -> Self {
        Self::new(Vec::new(), error)
    }
}

/// A persister-specific operation on one object (e.g. "archive", "increment").
#[derive(Debug, Clone)]
pub struct ObjectAction {
    object: ObjectHandle,
    name: String,
    params: ObjectData,
    result: Option<Value>,
}

impl ObjectAction {
    pub fn new(object: ObjectHandle, name: impl Into<String>, params: ObjectData) -> Self {
        Self {
            object,
            name: name.into(),
            params,
            result: None,
        }
    }

    pub fn object(&self) -> &ObjectHandle {
        &self.object
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &ObjectData {
        &self.params
    }

    pub fn set_result(&mut self, result: Value) {
        self.result = Some(result);
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }
}

/// Translates objects of one class to storable form and writes them.
///
/// A persister keeps its own scheduling queues, distinct from the unit of
/// work's: `persist`/`update`/`remove` only schedule, `commit` performs the
/// writes (through `persist_object`/`update_object`/`remove_object`) and
/// drains the queues.
///
/// ## Implementation requirements
///
/// - Scheduling the same object twice for one operation before `commit` is an
///   [`MapperError::AlreadyScheduled`] error.
/// - `commit` returns one [`FlushedObject`] per write, in scheduling order.
///   When a write fails, the writes that already succeeded are returned in
///   the [`CommitFailure`] alongside the error.
/// - `clear` drops scheduled work without writing anything.
pub trait ObjectPersister: Send + Sync {
    /// Class of the objects this persister manages.
    fn class_name(&self) -> &str;

    fn persist(&self, object: &ObjectHandle) -> MapperResult<()>;

    /// Schedule an update; `change_set` is what the unit of work recorded for the object.
    fn update(&self, object: &ObjectHandle, change_set: ChangeSet) -> MapperResult<()>;

    fn remove(&self, object: &ObjectHandle) -> MapperResult<()>;

    /// Execute everything scheduled, then drain the queues.
    fn commit(&self) -> Result<Vec<FlushedObject>, CommitFailure>;

    /// Storable representation of `object`.
    fn object_to_array(&self, object: &ObjectHandle) -> MapperResult<ObjectData>;

    /// Insert `object`; returns the stored data, including generated identifiers.
    fn persist_object(&self, object: &ObjectHandle) -> MapperResult<ObjectData>;

    /// Write `change_set` for `object`; returns the stored data.
    fn update_object(&self, object: &ObjectHandle, change_set: &ChangeSet) -> MapperResult<ObjectData>;

    fn remove_object(&self, object: &ObjectHandle) -> MapperResult<()>;

    fn execute_object_action(&self, action: &mut ObjectAction) -> MapperResult<()> {
        Err(MapperError::UnsupportedAction {
            class_name: self.class_name().to_string(),
            action: action.name().to_string(),
        })
    }

    /// Drop scheduled work without writing.
    fn clear(&self);

    fn is_scheduled_for_persist(&self, object: &ObjectHandle) -> bool;

    fn is_scheduled_for_update(&self, object: &ObjectHandle) -> bool;

    fn is_scheduled_for_remove(&self, object: &ObjectHandle) -> bool;
}

impl<P> ObjectPersister for Arc<P>
where
    P: ObjectPersister + ?Sized,
{
    fn class_name(&self) -> &str {
        (**self).class_name()
    }

    fn persist(&self, object: &ObjectHandle) -> MapperResult<()> {
        (**self).persist(object)
    }

    fn update(&self, object: &ObjectHandle, change_set: ChangeSet) -> MapperResult<()> {
        (**self).update(object, change_set)
    }

    fn remove(&self, object: &ObjectHandle) -> MapperResult<()> {
        (**self).remove(object)
    }

    fn commit(&self) -> Result<Vec<FlushedObject>, CommitFailure> {
        (**self).commit()
    }

    fn object_to_array(&self, object: &ObjectHandle) -> MapperResult<ObjectData> {
        (**self).object_to_array(object)
    }

    fn persist_object(&self, object: &ObjectHandle) -> MapperResult<ObjectData> {
        (**self).persist_object(object)
    }

    fn update_object(&self, object: &ObjectHandle, change_set: &ChangeSet) -> MapperResult<ObjectData> {
        (**self).update_object(object, change_set)
    }

    fn remove_object(&self, object: &ObjectHandle) -> MapperResult<()> {
        (**self).remove_object(object)
    }

    fn execute_object_action(&self, action: &mut ObjectAction) -> MapperResult<()> {
        (**self).execute_object_action(action)
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn is_scheduled_for_persist(&self, object: &ObjectHandle) -> bool {
        (**self).is_scheduled_for_persist(object)
    }

    fn is_scheduled_for_update(&self, object: &ObjectHandle) -> bool {
        (**self).is_scheduled_for_update(object)
    }

    fn is_scheduled_for_remove(&self, object: &ObjectHandle) -> bool {
        (**self).is_scheduled_for_remove(object)
    }
}

/// Resolves the persister for a class. Expected to return the same instance
/// for a class for the whole session.
pub trait ObjectPersisterFactory: Send + Sync {
    fn persister(&self, class_name: &str) -> MapperResult<Arc<dyn ObjectPersister>>;
}
