//! Reaction of one stage to one message delivery.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::adapters::{Message, MessageBus, Subject};
use crate::domain::{PipelineRun, RecordOutcome, Stage};

use super::barrier::CompletionBarrier;

/// What a handler did with a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Result recorded and barrier signalled
    Handled {
        /// Whether the downstream publish succeeded (always true for the
        /// terminal stage)
        forwarded: bool,
    },

    /// Redelivery for a stage that already reported; nothing done
    Duplicate,

    /// The run was already finalized; delivery dropped
    Discarded,
}

/// Transforms a stage's payload and forwards it to the next stage
pub struct StageHandler {
    stage: Stage,
    bus: Arc<dyn MessageBus>,
    forward_to: Option<Subject>,
}

impl StageHandler {
    pub fn new(stage: Stage, bus: Arc<dyn MessageBus>, forward_to: Option<Subject>) -> Self {
        Self {
            stage,
            bus,
            forward_to,
        }
    }

    /// Handle one delivery for `run`.
    ///
    /// A forward failure is logged and does not fail the run; the barrier is
    /// still signalled exactly once for the first delivery of this stage.
    pub async fn handle(
        &self,
        message: Message,
        run: &PipelineRun,
        barrier: &CompletionBarrier,
    ) -> HandleOutcome {
        let received = message.text();
        let transformed = self.stage.transform(&received);
        info!(
            run_id = %run.id(),
            listener = %self.stage,
            received = %received,
            transformed = %transformed,
            "listener received payload"
        );

        match run.record(self.stage, transformed.clone()) {
            RecordOutcome::Recorded => {}
            RecordOutcome::Duplicate => {
                debug!(run_id = %run.id(), listener = %self.stage, "redelivery ignored");
                return HandleOutcome::Duplicate;
            }
            RecordOutcome::Discarded => {
                debug!(run_id = %run.id(), listener = %self.stage, "run finalized, delivery discarded");
                return HandleOutcome::Discarded;
            }
        }

        let forwarded = match &self.forward_to {
            Some(subject) => match self.bus.publish(subject, transformed.into_bytes()).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        run_id = %run.id(),
                        listener = %self.stage,
                        %subject,
                        error = %e,
                        "{}: error publishing message", self.stage
                    );
                    false
                }
            },
            None => true,
        };

        barrier.signal();
        HandleOutcome::Handled { forwarded }
    }
}
