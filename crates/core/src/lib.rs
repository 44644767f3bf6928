//! `skelmap-core`: building blocks shared by the mapper crates.
//!
//! This crate holds object identity, change records, lifecycle event names and
//! the capability traits domain types opt into. It has no storage concerns.

pub mod change;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod notify;
pub mod object;

pub use change::{Change, ChangeSet};
pub use error::{MapperError, MapperResult, ScheduleOperation};
pub use id::ObjectId;
pub use lifecycle::LifecycleEvent;
pub use notify::{NotifyPropertyChanged, PropertyChangedListener, PropertyChangedNotifier};
pub use object::{
    CallbackArgs, Hydratable, Identifiable, LifecycleCallbacks, MappedObject, ObjectData,
    ObjectHandle, Persistable,
};
