//! Lifecycle event protocol.
//!
//! Every object-scoped event is delivered in a fixed order:
//!
//! 1. the generic bus ([`EventManager`]) listeners,
//! 2. then the object's own [`LifecycleCallbacks`](skelmap_core::LifecycleCallbacks), if it declares one for the event.
//!
//! Around a commit the unit of work drives:
//!
//! ```text
//! preFlush → preFlush callbacks (per object) → onFlush → persists/updates/removes → postFlush
//! ```
//!
//! Errors from either side abort the dispatch and are returned unchanged.

use std::sync::Arc;

use tracing::trace;

use skelmap_core::{CallbackArgs, ChangeSet, LifecycleEvent, MapperResult, ObjectData, ObjectHandle};
use skelmap_events::{EventArgs, EventManager};

#[derive(Clone)]
pub struct EventDispatcher {
    event_manager: Arc<dyn EventManager>,
}

impl EventDispatcher {
    pub fn new(event_manager: Arc<dyn EventManager>) -> Self {
        Self { event_manager }
    }

    pub fn dispatch_pre_persist(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.dispatch_lifecycle_event(LifecycleEvent::PrePersist, object)
    }

    pub fn dispatch_post_persist(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.dispatch_lifecycle_event(LifecycleEvent::PostPersist, object)
    }

    pub fn dispatch_pre_update(&self, object: &ObjectHandle, change_set: &ChangeSet) -> MapperResult<()> {
        let event = LifecycleEvent::PreUpdate;
        if self.event_manager.has_listeners(event) {
            let mut args = EventArgs::for_object(event, object).with_change_set(change_set);
            self.event_manager.dispatch_event(&mut args)?;
        }
        self.invoke_callback(event, object, CallbackArgs::ChangeSet(change_set))
    }

    pub fn dispatch_post_update(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.dispatch_lifecycle_event(LifecycleEvent::PostUpdate, object)
    }

    pub fn dispatch_pre_remove(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.dispatch_lifecycle_event(LifecycleEvent::PreRemove, object)
    }

    pub fn dispatch_post_remove(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.dispatch_lifecycle_event(LifecycleEvent::PostRemove, object)
    }

    /// `preLoad` exposes `data` mutably; what listeners leave there is what gets hydrated.
    pub fn dispatch_pre_load(&self, object: &ObjectHandle, data: &mut ObjectData) -> MapperResult<()> {
        let event = LifecycleEvent::PreLoad;
        if self.event_manager.has_listeners(event) {
            let mut args = EventArgs::for_object(event, object).with_data(data);
            self.event_manager.dispatch_event(&mut args)?;
        }
        self.invoke_callback(event, object, CallbackArgs::Data(data))
    }

    pub fn dispatch_post_load(&self, object: &ObjectHandle) -> MapperResult<()> {
        self.dispatch_lifecycle_event(LifecycleEvent::PostLoad, object)
    }

    pub fn dispatch_pre_flush(&self) -> MapperResult<()> {
        self.dispatch_event(EventArgs::new(LifecycleEvent::PreFlush))
    }

    /// Per-object `preFlush` callbacks; the bus is not involved.
    pub fn dispatch_pre_flush_lifecycle_callbacks(&self, objects: &[ObjectHandle]) -> MapperResult<()> {
        for object in objects {
            self.invoke_callback(LifecycleEvent::PreFlush, object, CallbackArgs::None)?;
        }
        Ok(())
    }

    pub fn dispatch_on_flush(&self) -> MapperResult<()> {
        self.dispatch_event(EventArgs::new(LifecycleEvent::OnFlush))
    }

    pub fn dispatch_post_flush(&self) -> MapperResult<()> {
        self.dispatch_event(EventArgs::new(LifecycleEvent::PostFlush))
    }

    pub fn dispatch_on_clear(&self, class_name: Option<&str>) -> MapperResult<()> {
        self.dispatch_event(EventArgs::new(LifecycleEvent::OnClear).with_class_name(class_name))
    }

    fn dispatch_lifecycle_event(&self, event: LifecycleEvent, object: &ObjectHandle) -> MapperResult<()> {
        self.dispatch_event(EventArgs::for_object(event, object))?;
        self.invoke_callback(event, object, CallbackArgs::None)
    }

    fn dispatch_event(&self, mut args: EventArgs<'_>) -> MapperResult<()> {
        if !self.event_manager.has_listeners(args.event()) {
            return Ok(());
        }
        trace!(event = %args.event(), "dispatching");
        self.event_manager.dispatch_event(&mut args)
    }

    fn invoke_callback(
        &self,
        event: LifecycleEvent,
        object: &ObjectHandle,
        args: CallbackArgs<'_>,
    ) -> MapperResult<()> {
        match object.object().as_lifecycle_callbacks() {
            Some(callbacks) if callbacks.has_lifecycle_callback(event) => {
                trace!(event = %event, object_id = %object.id(), "invoking lifecycle callback");
                callbacks.invoke_lifecycle_callback(event, args)
            }
            _ => Ok(()),
        }
    }
}

impl core::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}
