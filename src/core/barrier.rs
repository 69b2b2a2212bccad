//! Counting latch for stage completions.

use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

/// Result of a `signal` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Counted; carries the new count
    Counted(usize),

    /// Target already reached; ignored
    Clamped,
}

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWait {
    Satisfied,
    DeadlineElapsed,
}

/// Latch that opens once `target` signals have arrived.
///
/// The count never exceeds the target. Waiters are woken through a watch
/// channel, so nothing polls.
#[derive(Debug)]
pub struct CompletionBarrier {
    target: usize,
    count: watch::Sender<usize>,
}

impl CompletionBarrier {
    pub fn new(target: usize) -> Self {
        let (count, _) = watch::channel(0);
        Self { target, count }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_satisfied(&self) -> bool {
        self.count() >= self.target
    }

    /// Record one completion
    pub fn signal(&self) -> SignalOutcome {
        let target = self.target;
        let mut counted = None;
        self.count.send_if_modified(|count| {
            if *count >= target {
                return false;
            }
            *count += 1;
            counted = Some(*count);
            true
        });

        counted.map_or(SignalOutcome::Clamped, SignalOutcome::Counted)
    }

    /// Block until the target is reached or `deadline` passes
    pub async fn wait(&self, deadline: Instant) -> BarrierWait {
        let target = self.target;
        let mut rx = self.count.subscribe();
        let satisfied = matches!(
            timeout_at(deadline, rx.wait_for(|count| *count >= target)).await,
            Ok(Ok(_))
        );

        if satisfied {
            BarrierWait::Satisfied
        } else {
            BarrierWait::DeadlineElapsed
        }
    }
}
