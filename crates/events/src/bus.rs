//! Lifecycle event bus abstraction.
//!
//! The unit of work notifies a generic listener bus for every lifecycle event,
//! in addition to the object's own callbacks. This module defines that bus
//! without assuming how listeners are registered or stored.
//!
//! ## Delivery
//!
//! - **Synchronous**: `dispatch_event` returns only after every listener has run.
//! - **Ordered**: listeners for one event run in registration order.
//! - **Fail-fast**: the first listener error stops dispatch and is returned as-is.
//!
//! Listeners receive [`EventArgs`] by mutable reference, which is how `preLoad`
//! listeners rewrite data before hydration.

use std::sync::Arc;
use std::sync::mpsc::Receiver;

use skelmap_core::{LifecycleEvent, MapperResult};

use crate::event::EventArgs;

/// A subscription to the records of dispatched events.
///
/// Each subscription gets a copy of every record published after it was
/// created, in dispatch order.
///
/// ```ignore
/// let subscription = events.subscribe();
/// uow.commit()?;
/// let names: Vec<_> = subscription.drain().iter().map(|r| r.event()).collect();
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Take every message currently queued, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Generic listener bus for lifecycle events.
///
/// `has_listeners` lets the dispatcher skip building arguments for events
/// nobody listens to; it must return `true` whenever `dispatch_event` would
/// reach at least one listener.
pub trait EventManager: Send + Sync {
    fn has_listeners(&self, event: LifecycleEvent) -> bool;

    fn dispatch_event(&self, args: &mut EventArgs<'_>) -> MapperResult<()>;
}

impl<M> EventManager for Arc<M>
where
    M: EventManager + ?Sized,
{
    fn has_listeners(&self, event: LifecycleEvent) -> bool {
        (**self).has_listeners(event)
    }

    fn dispatch_event(&self, args: &mut EventArgs<'_>) -> MapperResult<()> {
        (**self).dispatch_event(args)
    }
}
