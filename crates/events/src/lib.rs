//! Lifecycle event bus: listener contract, event arguments and an in-memory manager.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventManager, Subscription};
pub use envelope::EventRecord;
pub use event::EventArgs;
pub use handler::{EventListener, from_fn};
pub use in_memory_bus::InMemoryEventManager;
