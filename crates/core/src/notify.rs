//! Property change notification.

use std::sync::{Mutex, PoisonError, Weak};

use serde_json::Value;

use crate::error::MapperResult;
use crate::id::ObjectId;

/// Receives field mutations from objects that support notification.
pub trait PropertyChangedListener: Send + Sync {
    fn property_changed(
        &self,
        object: ObjectId,
        property: &str,
        old_value: &Value,
        new_value: &Value,
    ) -> MapperResult<()>;
}

/// Objects that report their own field mutations.
///
/// The listener is registered together with the token of the handle the
/// object is tracked under, since the object itself does not know it.
pub trait NotifyPropertyChanged {
    fn add_property_changed_listener(&self, object: ObjectId, listener: Weak<dyn PropertyChangedListener>);
}

/// Listener registry a domain type can embed to implement [`NotifyPropertyChanged`].
#[derive(Default)]
pub struct PropertyChangedNotifier {
    listeners: Mutex<Vec<(ObjectId, Weak<dyn PropertyChangedListener>)>>,
}

impl PropertyChangedNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; registering the same listener for the same token twice is a no-op.
    pub fn add_listener(&self, object: ObjectId, listener: Weak<dyn PropertyChangedListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop listeners whose owner is gone.
        listeners.retain(|(_, l)| l.strong_count() > 0);

        if listeners
            .iter()
            .any(|(id, l)| *id == object && Weak::ptr_eq(l, &listener))
        {
            return;
        }
        listeners.push((object, listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, l)| l.strong_count() > 0)
            .count()
    }

    /// Notify every live listener. Stops at the first listener error.
    ///
    /// The registry lock is released before listeners run, so a listener may
    /// read the notifying object or register further listeners.
    pub fn notify(&self, property: &str, old_value: &Value, new_value: &Value) -> MapperResult<()> {
        let live: Vec<_> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners
                .iter()
                .filter_map(|(id, l)| l.upgrade().map(|l| (*id, l)))
                .collect()
        };

        for (object, listener) in live {
            listener.property_changed(object, property, old_value, new_value)?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for PropertyChangedNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyChangedNotifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(ObjectId, String, Value, Value)>>,
    }

    impl PropertyChangedListener for Recorder {
        fn property_changed(
            &self,
            object: ObjectId,
            property: &str,
            old_value: &Value,
            new_value: &Value,
        ) -> MapperResult<()> {
            self.seen.lock().unwrap().push((
                object,
                property.to_string(),
                old_value.clone(),
                new_value.clone(),
            ));
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_notifies_once() {
        let notifier = PropertyChangedNotifier::new();
        let recorder = Arc::new(Recorder::default());
        let as_listener: Arc<dyn PropertyChangedListener> = recorder.clone();
        let id = ObjectId::new();

        notifier.add_listener(id, Arc::downgrade(&as_listener));
        notifier.add_listener(id, Arc::downgrade(&as_listener));
        notifier.notify("name", &json!("a"), &json!("b")).unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (id, "name".to_string(), json!("a"), json!("b")));
    }

    #[test]
    fn dropped_listeners_are_skipped() {
        let notifier = PropertyChangedNotifier::new();
        {
            let listener: Arc<dyn PropertyChangedListener> = Arc::new(Recorder::default());
            notifier.add_listener(ObjectId::new(), Arc::downgrade(&listener));
            assert_eq!(notifier.listener_count(), 1);
        }

        assert_eq!(notifier.listener_count(), 0);
        notifier.notify("name", &json!(null), &json!(1)).unwrap();
    }
}
