//! Lifecycle event names.

use serde::{Deserialize, Serialize};

/// Named points in an object's lifecycle at which listeners and callbacks run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleEvent {
    PrePersist,
    PostPersist,
    PreUpdate,
    PostUpdate,
    PreRemove,
    PostRemove,
    PreLoad,
    PostLoad,
    PreFlush,
    OnFlush,
    PostFlush,
    OnClear,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 12] = [
        LifecycleEvent::PrePersist,
        LifecycleEvent::PostPersist,
        LifecycleEvent::PreUpdate,
        LifecycleEvent::PostUpdate,
        LifecycleEvent::PreRemove,
        LifecycleEvent::PostRemove,
        LifecycleEvent::PreLoad,
        LifecycleEvent::PostLoad,
        LifecycleEvent::PreFlush,
        LifecycleEvent::OnFlush,
        LifecycleEvent::PostFlush,
        LifecycleEvent::OnClear,
    ];

    /// Stable event name (e.g. "prePersist").
    pub fn name(self) -> &'static str {
        match self {
            LifecycleEvent::PrePersist => "prePersist",
            LifecycleEvent::PostPersist => "postPersist",
            LifecycleEvent::PreUpdate => "preUpdate",
            LifecycleEvent::PostUpdate => "postUpdate",
            LifecycleEvent::PreRemove => "preRemove",
            LifecycleEvent::PostRemove => "postRemove",
            LifecycleEvent::PreLoad => "preLoad",
            LifecycleEvent::PostLoad => "postLoad",
            LifecycleEvent::PreFlush => "preFlush",
            LifecycleEvent::OnFlush => "onFlush",
            LifecycleEvent::PostFlush => "postFlush",
            LifecycleEvent::OnClear => "onClear",
        }
    }
}

impl core::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_name_matches_display_name() {
        for event in LifecycleEvent::ALL {
            let encoded = serde_json::to_value(event).unwrap();
            assert_eq!(encoded, serde_json::Value::String(event.name().to_string()));
        }
    }
}
