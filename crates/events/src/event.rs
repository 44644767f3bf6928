use skelmap_core::{ChangeSet, LifecycleEvent, ObjectData, ObjectHandle};

/// Arguments passed to bus listeners for one lifecycle event.
///
/// Which fields are set depends on the event:
/// - object-scoped events carry `object`,
/// - `preUpdate` also carries the dispatched `change_set`,
/// - `preLoad` carries the raw `data`, which listeners may rewrite before hydration,
/// - `onClear` carries the cleared `class_name` when the clear was scoped.
#[derive(Debug)]
pub struct EventArgs<'a> {
    event: LifecycleEvent,
    object: Option<&'a ObjectHandle>,
    change_set: Option<&'a ChangeSet>,
    data: Option<&'a mut ObjectData>,
    class_name: Option<&'a str>,
}

impl<'a> EventArgs<'a> {
    /// Arguments for an event that concerns no particular object (flush, clear).
    pub fn new(event: LifecycleEvent) -> Self {
        Self {
            event,
            object: None,
            change_set: None,
            data: None,
            class_name: None,
        }
    }

    pub fn for_object(event: LifecycleEvent, object: &'a ObjectHandle) -> Self {
        Self {
            object: Some(object),
            ..Self::new(event)
        }
    }

    pub fn with_change_set(mut self, change_set: &'a ChangeSet) -> Self {
        self.change_set = Some(change_set);
        self
    }

    pub fn with_data(mut self, data: &'a mut ObjectData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_class_name(mut self, class_name: Option<&'a str>) -> Self {
        self.class_name = class_name;
        self
    }

    pub fn event(&self) -> LifecycleEvent {
        self.event
    }

    pub fn object(&self) -> Option<&'a ObjectHandle> {
        self.object
    }

    pub fn change_set(&self) -> Option<&'a ChangeSet> {
        self.change_set
    }

    pub fn data(&self) -> Option<&ObjectData> {
        self.data.as_deref()
    }

    pub fn data_mut(&mut self) -> Option<&mut ObjectData> {
        self.data.as_deref_mut()
    }

    /// Class the event is scoped to: the object's class, or the cleared class for `onClear`.
    pub fn class_name(&self) -> Option<&str> {
        self.object
            .map(|o| o.class_name())
            .or(self.class_name)
    }
}
