//! Domain types for the event chain.
//!
//! This module contains the core data structures:
//! - Event: the inbound request
//! - Stage: the three fixed transforms and their results
//! - Run: per-event pipeline state
//! - Result: the persisted output of a completed run

pub mod events;
pub mod result;
pub mod run;
pub mod stage;

// Re-export commonly used types
pub use events::{Event, EventRequest};
pub use result::PipelineResult;
pub use run::{PipelineRun, RecordOutcome, RunState, StageResults};
pub use stage::{Stage, StageResult, STAGE_COUNT};
