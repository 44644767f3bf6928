use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use skelmap_core::{LifecycleEvent, ObjectId};

use crate::event::EventArgs;

/// Owned record of one dispatched lifecycle event, broadcast to subscribers.
///
/// Listeners get borrowed [`EventArgs`]; subscribers only need to know what
/// happened and to whom, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    event: LifecycleEvent,
    object_id: Option<ObjectId>,
    class_name: Option<String>,

    /// Number of changes carried by a `preUpdate` dispatch.
    change_count: Option<usize>,

    occurred_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn from_args(args: &EventArgs<'_>) -> Self {
        Self {
            event: args.event(),
            object_id: args.object().map(|o| o.id()),
            class_name: args.class_name().map(str::to_string),
            change_count: args.change_set().map(|c| c.len()),
            occurred_at: Utc::now(),
        }
    }

    pub fn event(&self) -> LifecycleEvent {
        self.event
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        self.object_id
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    pub fn change_count(&self) -> Option<usize> {
        self.change_count
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
