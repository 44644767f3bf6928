//! Domain types shared by the unit tests.

use std::any::Any;
use std::sync::{Mutex, Weak};

use serde_json::{Value, json};

use skelmap_core::{
    CallbackArgs, Hydratable, Identifiable, LifecycleCallbacks, LifecycleEvent, MappedObject,
    MapperResult, NotifyPropertyChanged, ObjectData, ObjectHandle, ObjectId, Persistable,
    PropertyChangedListener, PropertyChangedNotifier,
};

pub fn data(value: Value) -> ObjectData {
    value.as_object().cloned().unwrap()
}

/// Fully capable domain object: notifies, persists, hydrates, receives ids and
/// records the lifecycle callbacks it receives.
#[derive(Debug, Default)]
pub struct User {
    id: Mutex<Option<u64>>,
    name: Mutex<String>,
    email: Mutex<Option<String>>,
    notifier: PropertyChangedNotifier,
    callbacks: Mutex<Vec<LifecycleEvent>>,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self {
            name: Mutex::new(name.to_string()),
            ..Self::default()
        }
    }

    pub fn handle(name: &str) -> ObjectHandle {
        ObjectHandle::new(Self::new(name))
    }

    pub fn id(&self) -> Option<u64> {
        *self.id.lock().unwrap()
    }

    pub fn set_id(&self, id: u64) {
        *self.id.lock().unwrap() = Some(id);
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub fn set_name(&self, name: &str) -> MapperResult<()> {
        let old = std::mem::replace(&mut *self.name.lock().unwrap(), name.to_string());
        self.notifier.notify("name", &json!(old), &json!(name))
    }

    pub fn email(&self) -> Option<String> {
        self.email.lock().unwrap().clone()
    }

    pub fn set_email(&self, email: &str) -> MapperResult<()> {
        let old = self.email.lock().unwrap().replace(email.to_string());
        self.notifier.notify("email", &json!(old), &json!(email))
    }

    pub fn listener_count(&self) -> usize {
        self.notifier.listener_count()
    }

    pub fn callbacks(&self) -> Vec<LifecycleEvent> {
        self.callbacks.lock().unwrap().clone()
    }
}

impl MappedObject for User {
    fn class_name(&self) -> &str {
        "User"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_notify_property_changed(&self) -> Option<&dyn NotifyPropertyChanged> {
        Some(self)
    }

    fn as_lifecycle_callbacks(&self) -> Option<&dyn LifecycleCallbacks> {
        Some(self)
    }

    fn as_persistable(&self) -> Option<&dyn Persistable> {
        Some(self)
    }

    fn as_hydratable(&self) -> Option<&dyn Hydratable> {
        Some(self)
    }

    fn as_identifiable(&self) -> Option<&dyn Identifiable> {
        Some(self)
    }
}

impl NotifyPropertyChanged for User {
    fn add_property_changed_listener(&self, object: ObjectId, listener: Weak<dyn PropertyChangedListener>) {
        self.notifier.add_listener(object, listener);
    }
}

impl LifecycleCallbacks for User {
    fn has_lifecycle_callback(&self, event: LifecycleEvent) -> bool {
        !matches!(event, LifecycleEvent::OnFlush | LifecycleEvent::PostFlush | LifecycleEvent::OnClear)
    }

    fn invoke_lifecycle_callback(&self, event: LifecycleEvent, _args: CallbackArgs<'_>) -> MapperResult<()> {
        self.callbacks.lock().unwrap().push(event);
        Ok(())
    }
}

impl Persistable for User {
    fn prepare_persist_change_set(&self) -> ObjectData {
        let mut data = ObjectData::new();
        if let Some(id) = self.id() {
            data.insert("id".to_string(), json!(id));
        }
        data.insert("name".to_string(), json!(self.name()));
        data.insert("email".to_string(), json!(self.email()));
        data
    }
}

impl Hydratable for User {
    fn hydrate(&self, data: &ObjectData) -> MapperResult<()> {
        if let Some(id) = data.get("id").and_then(Value::as_u64) {
            self.set_id(id);
        }
        if let Some(name) = data.get("name").and_then(Value::as_str) {
            *self.name.lock().unwrap() = name.to_string();
        }
        if let Some(email) = data.get("email") {
            *self.email.lock().unwrap() = email.as_str().map(str::to_string);
        }
        Ok(())
    }
}

impl Identifiable for User {
    fn assign_identifier(&self, identifier: &ObjectData) {
        if let Some(id) = identifier.get("id").and_then(Value::as_u64) {
            self.set_id(id);
        }
    }
}

/// Object with no optional capabilities.
#[derive(Debug, Default)]
pub struct Note;

impl MappedObject for Note {
    fn class_name(&self) -> &str {
        "Note"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
