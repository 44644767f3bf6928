//! `skelmap-uow`: unit of work for a data-mapper persistence layer.
//!
//! The unit of work tracks domain objects, records their field changes and
//! flushes scheduled inserts, updates and removals through per-class
//! persisters. Storage itself stays behind the [`ObjectPersister`] and
//! [`ObjectRepository`] traits; in-memory implementations are included for
//! tests and development.

pub mod change_sets;
pub mod config;
pub mod event_dispatcher;
pub mod identity_map;
pub mod persister;
pub mod persister_dispatcher;
pub mod repository;
pub mod store;
pub mod unit_of_work;

#[cfg(test)]
mod fixtures;


pub use change_sets::ChangeSets;
pub use config::{ConfigError, MapperConfig};
pub use event_dispatcher::EventDispatcher;
pub use identity_map::{FieldIdentityStrategy, IdentityStrategy, ObjectIdentityMap, natural_key};
pub use persister::{
    CommitFailure, FlushedObject, InMemoryObjectPersister, ObjectAction, ObjectPersister, ObjectPersisterFactory,
    PersisterRegistry,
};
pub use persister_dispatcher::PersisterDispatcher;
pub use repository::{InMemoryObjectRepository, ObjectManager, ObjectRepository, RepositoryRegistry};
pub use store::InMemoryObjectStore;
pub use unit_of_work::UnitOfWork;
