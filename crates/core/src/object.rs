//! Tracked objects and the optional capabilities they may declare.
//!
//! The mapper never relies on a common base type. A domain type implements
//! [`MappedObject`] and answers capability queries (`as_*`) for the interfaces
//! it supports; everything else is `None` by default.

use std::any::Any;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::change::ChangeSet;
use crate::error::MapperResult;
use crate::id::ObjectId;
use crate::lifecycle::LifecycleEvent;
use crate::notify::NotifyPropertyChanged;

/// Raw field data as loaded from, or written to, a backing store.
pub type ObjectData = Map<String, Value>;

/// A domain object the mapper can track.
///
/// Implementations are shared behind `Arc` and use interior mutability for
/// their fields, so every capability takes `&self`.
pub trait MappedObject: Any + Send + Sync {
    /// Class name used to resolve persisters, repositories and identity scopes.
    fn class_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    fn as_notify_property_changed(&self) -> Option<&dyn NotifyPropertyChanged> {
        None
    }

    fn as_lifecycle_callbacks(&self) -> Option<&dyn LifecycleCallbacks> {
        None
    }

    fn as_persistable(&self) -> Option<&dyn Persistable> {
        None
    }

    fn as_hydratable(&self) -> Option<&dyn Hydratable> {
        None
    }

    fn as_identifiable(&self) -> Option<&dyn Identifiable> {
        None
    }
}

/// Arguments handed to an object's own lifecycle callback.
#[derive(Debug)]
pub enum CallbackArgs<'a> {
    None,
    /// `preUpdate`: the change set as dispatched.
    ChangeSet(&'a ChangeSet),
    /// `preLoad`: raw data about to be hydrated; callbacks may rewrite it.
    Data(&'a mut ObjectData),
}

/// Objects that declare their own handlers for lifecycle events.
pub trait LifecycleCallbacks {
    fn has_lifecycle_callback(&self, event: LifecycleEvent) -> bool;

    fn invoke_lifecycle_callback(
        &self,
        event: LifecycleEvent,
        args: CallbackArgs<'_>,
    ) -> MapperResult<()>;
}

/// Objects that can describe themselves as storable data.
pub trait Persistable {
    /// Full field data for an insert.
    fn prepare_persist_change_set(&self) -> ObjectData;

    /// Field data for an update, given the accumulated changes.
    fn prepare_update_change_set(&self, change_set: &ChangeSet) -> ObjectData {
        change_set.latest()
    }
}

/// Objects that can be populated from stored data.
pub trait Hydratable {
    fn hydrate(&self, data: &ObjectData) -> MapperResult<()>;
}

/// Objects that accept an identifier generated by the backing store.
pub trait Identifiable {
    fn assign_identifier(&self, identifier: &ObjectData);
}

/// Shared handle to a tracked object, carrying its identity token.
///
/// Equality and hashing use the token only; field values never take part.
#[derive(Clone)]
pub struct ObjectHandle {
    id: ObjectId,
    object: Arc<dyn MappedObject>,
}

impl ObjectHandle {
    /// Wrap a new instance and issue it a fresh token.
    pub fn new<T: MappedObject>(object: T) -> Self {
        Self::from_arc(Arc::new(object))
    }

    pub fn from_arc(object: Arc<dyn MappedObject>) -> Self {
        Self {
            id: ObjectId::new(),
            object,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn class_name(&self) -> &str {
        self.object.class_name()
    }

    pub fn object(&self) -> &dyn MappedObject {
        self.object.as_ref()
    }

    pub fn downcast_ref<T: MappedObject>(&self) -> Option<&T> {
        self.object.as_any().downcast_ref::<T>()
    }

    /// Field data through the [`Persistable`] capability.
    pub fn persistable(&self) -> MapperResult<&dyn Persistable> {
        self.object
            .as_persistable()
            .ok_or_else(|| crate::MapperError::missing_capability(self.class_name(), "Persistable"))
    }

    /// Population through the [`Hydratable`] capability.
    pub fn hydratable(&self) -> MapperResult<&dyn Hydratable> {
        self.object
            .as_hydratable()
            .ok_or_else(|| crate::MapperError::missing_capability(self.class_name(), "Hydratable"))
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ObjectHandle {}

impl core::hash::Hash for ObjectHandle {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl core::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("class_name", &self.class_name())
            .field("id", &self.id)
            .finish()
    }
}
