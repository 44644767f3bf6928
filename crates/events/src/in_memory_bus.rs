//! In-process event manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, mpsc};

use skelmap_core::{LifecycleEvent, MapperResult};

use crate::bus::{EventManager, Subscription};
use crate::envelope::EventRecord;
use crate::event::EventArgs;
use crate::handler::EventListener;

/// In-memory listener registry with broadcast subscriptions.
///
/// - No IO
/// - Listeners run synchronously, in registration order
/// - Subscribers receive an [`EventRecord`] for every dispatched event and
///   therefore count as listeners of every event
#[derive(Default)]
pub struct InMemoryEventManager {
    listeners: RwLock<HashMap<LifecycleEvent, Vec<Arc<dyn EventListener>>>>,
    subscribers: Mutex<Vec<mpsc::Sender<EventRecord>>>,
}

impl InMemoryEventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, event: LifecycleEvent, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push(listener);
    }

    /// Register one listener for several events.
    pub fn add_listeners(&self, events: &[LifecycleEvent], listener: Arc<dyn EventListener>) {
        for event in events {
            self.add_listener(*event, listener.clone());
        }
    }

    pub fn remove_listeners(&self, event: LifecycleEvent) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&event);
    }

    pub fn subscribe(&self) -> Subscription<EventRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Subscription::new(rx)
    }

    fn publish(&self, record: EventRecord) {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);

        // Drop any dead subscribers while publishing.
        subs.retain(|tx| tx.send(record.clone()).is_ok());
    }

    fn has_subscribers(&self) -> bool {
        !self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl EventManager for InMemoryEventManager {
    fn has_listeners(&self, event: LifecycleEvent) -> bool {
        let registered = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .is_some_and(|l| !l.is_empty());

        registered || self.has_subscribers()
    }

    fn dispatch_event(&self, args: &mut EventArgs<'_>) -> MapperResult<()> {
        self.publish(EventRecord::from_args(args));

        // Clone the list so listeners may register further listeners.
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&args.event())
            .cloned()
            .unwrap_or_default();

        for listener in listeners {
            listener.on_event(args)?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for InMemoryEventManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryEventManager")
            .field("events_with_listeners", &listeners.len())
            .finish()
    }
}
