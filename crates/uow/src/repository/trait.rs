use std::sync::Arc;

use skelmap_core::{MapperResult, ObjectData, ObjectHandle};

/// Creates and populates objects of one class.
pub trait ObjectRepository: Send + Sync {
    fn class_name(&self) -> &str;

    /// A fresh, empty instance of `class_name`.
    fn create(&self, class_name: &str) -> MapperResult<ObjectHandle>;

    /// Populate `object` from raw stored data.
    fn hydrate(&self, object: &ObjectHandle, data: &ObjectData) -> MapperResult<()>;

    /// Copy the state of a possibly detached `object` onto the managed instance
    /// with the same identity; returns the managed instance.
    fn merge(&self, object: &ObjectHandle) -> MapperResult<ObjectHandle>;

    /// Reload `object` from the backing store, discarding in-memory field changes.
    fn refresh(&self, object: &ObjectHandle) -> MapperResult<()>;
}

impl<R> ObjectRepository for Arc<R>
where
    R: ObjectRepository + ?Sized,
{
    fn class_name(&self) -> &str {
        (**self).class_name()
    }

    fn create(&self, class_name: &str) -> MapperResult<ObjectHandle> {
        (**self).create(class_name)
    }

    fn hydrate(&self, object: &ObjectHandle, data: &ObjectData) -> MapperResult<()> {
        (**self).hydrate(object, data)
    }

    fn merge(&self, object: &ObjectHandle) -> MapperResult<ObjectHandle> {
        (**self).merge(object)
    }

    fn refresh(&self, object: &ObjectHandle) -> MapperResult<()> {
        (**self).refresh(object)
    }
}

/// Session-level context that owns the repositories.
pub trait ObjectManager: Send + Sync {
    fn repository(&self, class_name: &str) -> MapperResult<Arc<dyn ObjectRepository>>;
}
