//! Races barrier completion against the run deadline.
//!
//! The watcher is a spawned task with exactly one terminal outcome. It
//! returns as soon as the barrier opens, the deadline passes, or the
//! orchestrator cancels its token, so it never outlives the run.

use std::sync::Arc;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};
use uuid::Uuid;

use super::barrier::{BarrierWait, CompletionBarrier};

/// Terminal outcome of a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// All expected stages signalled
    Completed,

    /// Deadline elapsed first
    TimedOut,

    /// The orchestrator cancelled the run
    Cancelled,
}

/// Watches one run
pub struct CancellationWatcher {
    run_id: Uuid,
    barrier: Arc<CompletionBarrier>,
    deadline: Instant,
    cancel: CancellationToken,
}

impl CancellationWatcher {
    pub fn new(
        run_id: Uuid,
        barrier: Arc<CompletionBarrier>,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            barrier,
            deadline,
            cancel,
        }
    }

    /// Start watching in a background task
    pub fn spawn(self) -> WatchHandle {
        let span = info_span!("watcher", run_id = %self.run_id);
        WatchHandle {
            task: tokio::spawn(self.watch().instrument(span)),
        }
    }

    async fn watch(self) -> WatchOutcome {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => WatchOutcome::Cancelled,
            wait = self.barrier.wait(self.deadline) => match wait {
                BarrierWait::Satisfied => WatchOutcome::Completed,
                BarrierWait::DeadlineElapsed => WatchOutcome::TimedOut,
            },
        };

        match outcome {
            WatchOutcome::TimedOut => error!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                completed = self.barrier.count(),
                expected = self.barrier.target(),
                "operation cancelled: operation took too long"
            ),
            WatchOutcome::Completed => debug!("all pubsub processes done"),
            WatchOutcome::Cancelled => debug!("watch cancelled"),
        }
        outcome
    }
}

/// Handle to a running watcher
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<WatchOutcome>,
}

impl WatchHandle {
    /// Wait for the watcher's single outcome
    pub async fn outcome(&mut self) -> WatchOutcome {
        match (&mut self.task).await {
            Ok(outcome) => outcome,
            Err(e) => Self::join_failed(e),
        }
    }

    /// Whether the watcher task has terminated
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn join_failed(e: JoinError) -> WatchOutcome {
        error!(error = %e, "watcher task failed");
        WatchOutcome::Cancelled
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
