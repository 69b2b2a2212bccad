//! eventchain - three-stage pub/sub event chain
//!
//! One event name flows through three chained listeners, each subscribed to
//! its own per-run subject:
//!
//! - listener 1 uppercases the seed and forwards it
//! - listener 2 reverses it and forwards it
//! - listener 3 lowercases it
//!
//! The orchestrator waits on a completion barrier under a fixed deadline,
//! persists one record per completed run, and keeps an interrupt marker so
//! runs cut short by a crash are reconciled on the next boot.
//!
//! # Modules
//!
//! - `adapters`: message bus and result store
//! - `core`: orchestration (barrier, watcher, handlers, marker, recovery)
//! - `domain`: data structures (Event, Stage, PipelineRun, PipelineResult)
//! - `config`: configuration resolution
//! - `cli`: command-line interface and request boundary
//!
//! # Usage
//!
//! ```bash
//! eventchain publish go
//! echo '{"eventName":"go"}' | eventchain serve
//! eventchain events --limit 5
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{InMemoryBus, MessageBus, ResultStore, SqliteResultStore};
pub use core::{ErrorKind, InterruptMarker, Orchestrator, PipelineError, RecoveryReport};
pub use domain::{Event, EventRequest, PipelineResult, Stage};
