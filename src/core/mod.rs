//! Core orchestration logic.
//!
//! This module contains:
//! - CompletionBarrier: counting latch for stage completions
//! - CancellationWatcher: deadline race for one run
//! - StageHandler: per-delivery transform and forward
//! - InterruptMarker / RecoveryScanner: unclean-shutdown detection
//! - Orchestrator: main execution engine

pub mod barrier;
pub mod error;
pub mod marker;
pub mod orchestrator;
pub mod recovery;
pub mod stage_handler;
pub mod watcher;

// Re-export commonly used types
pub use barrier::{BarrierWait, CompletionBarrier, SignalOutcome};
pub use error::{ErrorKind, PipelineError, RecoveryError};
pub use marker::{InterruptMarker, MarkerContents, MarkerEntry};
pub use orchestrator::{Orchestrator, RUN_DEADLINE};
pub use recovery::{lost_run_ids, RecoveryReport, RecoveryScanner};
pub use stage_handler::{HandleOutcome, StageHandler};
pub use watcher::{CancellationWatcher, WatchHandle, WatchOutcome};
