//! Pipeline run state.
//!
//! A `PipelineRun` is created per accepted event and shared only between the
//! orchestrator invocation that created it, its stage handlers and its
//! watcher. Results and state live behind one lock so that finalization and
//! late stage deliveries cannot interleave: once the run leaves `Running`,
//! every further write is discarded.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::events::Event;
use super::stage::{Stage, StageResult, STAGE_COUNT};

/// Per-stage result slots of a run
pub type StageResults = [Option<StageResult>; STAGE_COUNT];

/// State of a pipeline run. Transitions only leave `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Waiting for stage deliveries
    Running,

    /// All three stages reported
    Completed,

    /// Deadline elapsed first
    TimedOut,

    /// Aborted by a subscription, publish or marker failure
    Failed,
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}

impl RunState {
    /// Whether moving to `next` is a legal forward transition
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(self, RunState::Running) && !matches!(next, RunState::Running)
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// What happened to a stage delivery offered to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First result for this stage; stored
    Recorded,

    /// The stage already holds a result (redelivery)
    Duplicate,

    /// The run is finalized; the write was dropped
    Discarded,
}

#[derive(Debug, Default)]
struct RunSlot {
    results: StageResults,
    state: RunState,
}

/// One end-to-end execution of the chain for a single event
#[derive(Debug)]
pub struct PipelineRun {
    id: Uuid,
    event: Event,
    deadline: Instant,
    deadline_at: DateTime<Utc>,
    slot: Mutex<RunSlot>,
}

impl PipelineRun {
    /// Create a run whose deadline is `timeout` from now
    pub fn new(event: Event, timeout: Duration) -> Self {
        let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        Self {
            id: Uuid::new_v4(),
            event,
            deadline: Instant::now() + timeout,
            deadline_at: Utc::now() + chrono::Duration::milliseconds(millis),
            slot: Mutex::new(RunSlot::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Monotonic deadline used for waiting
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wall-clock deadline, for logs
    pub fn deadline_at(&self) -> DateTime<Utc> {
        self.deadline_at
    }

    pub fn state(&self) -> RunState {
        self.slot.lock().state
    }

    /// Store a stage result unless the stage already has one or the run is
    /// finalized.
    pub fn record(&self, stage: Stage, payload: String) -> RecordOutcome {
        let mut slot = self.slot.lock();
        if slot.state.is_terminal() {
            return RecordOutcome::Discarded;
        }

        let entry = &mut slot.results[stage.slot()];
        if entry.is_some() {
            return RecordOutcome::Duplicate;
        }

        *entry = Some(StageResult::new(stage, payload));
        RecordOutcome::Recorded
    }

    /// Move the run to a terminal state.
    ///
    /// Only the first call succeeds and receives the collected results;
    /// later calls (and calls with `Running`) get `None`.
    pub fn finalize(&self, state: RunState) -> Option<StageResults> {
        let mut slot = self.slot.lock();
        if !slot.state.can_transition_to(state) {
            return None;
        }
        slot.state = state;
        Some(std::mem::take(&mut slot.results))
    }

    /// Number of stages that have reported so far
    pub fn recorded_count(&self) -> usize {
        self.slot.lock().results.iter().filter(|r| r.is_some()).count()
    }
}
