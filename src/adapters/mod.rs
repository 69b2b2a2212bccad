//! Collaborator interfaces for external systems.
//!
//! Adapters hide the messaging transport and the result database behind
//! traits so the orchestrator can be driven by in-process or test doubles.

pub mod bus;
pub mod store;

pub use bus::{
    BusError, InMemoryBus, Message, MessageBus, StageSubjects, Subject, Subscription,
};
pub use store::{ResultStore, SqliteResultStore, StoreError};
