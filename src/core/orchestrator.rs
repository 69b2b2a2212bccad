//! Main orchestrator for event chain execution.
//!
//! Coordinates handler registration, the seed publish, the completion
//! barrier and its deadline, persistence, and the interrupt marker around
//! each run.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{MessageBus, ResultStore, StageSubjects, Subscription};
use crate::domain::{Event, PipelineResult, PipelineRun, RunState, Stage, STAGE_COUNT};

use super::barrier::CompletionBarrier;
use super::error::PipelineError;
use super::marker::{InterruptMarker, MarkerEntry};
use super::recovery::{RecoveryReport, RecoveryScanner};
use super::stage_handler::StageHandler;
use super::watcher::{CancellationWatcher, WatchOutcome};

/// Fixed deadline for every run
pub const RUN_DEADLINE: Duration = Duration::from_secs(10);

/// How long stage listeners get to wind down after a run resolves
const LISTENER_GRACE: Duration = Duration::from_secs(1);

/// Event chain orchestrator.
///
/// Only obtainable through [`Orchestrator::boot`], which reconciles the
/// interrupt marker first; no run can start before recovery has finished.
pub struct Orchestrator {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn ResultStore>,
    marker: Arc<InterruptMarker>,
}

impl Orchestrator {
    /// Reconcile the interrupt marker, then return a ready orchestrator
    pub async fn boot(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn ResultStore>,
        marker: Arc<InterruptMarker>,
    ) -> Result<(Self, RecoveryReport), PipelineError> {
        let report = RecoveryScanner::new(Arc::clone(&marker), Arc::clone(&store))
            .scan()
            .await?;

        info!(bus = bus.name(), "orchestrator ready");
        Ok((Self { bus, store, marker }, report))
    }

    /// Result store backing this orchestrator
    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Execute the three-stage chain for one event
    #[instrument(skip(self, event), fields(event = %event.name))]
    pub async fn run(&self, event: Event) -> Result<PipelineResult, PipelineError> {
        if !event.is_valid() {
            warn!("eventName is a required request body parameter");
            return Err(PipelineError::InvalidInput);
        }

        let started = Instant::now();
        let run = Arc::new(PipelineRun::new(event, RUN_DEADLINE));
        let run_id = run.id();
        let subjects = StageSubjects::for_run(run_id);
        info!(%run_id, deadline = %run.deadline_at(), "starting pipeline run");

        let barrier = Arc::new(CompletionBarrier::new(STAGE_COUNT));
        let cancel = CancellationToken::new();
        // Stops the watcher and listeners if this future is dropped mid-run
        let _stop_on_drop = cancel.clone().drop_guard();

        let subscriptions = match self.subscribe_stages(&subjects).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                run.finalize(RunState::Failed);
                return Err(e);
            }
        };

        let mut listeners = JoinSet::new();
        for (stage, subscription) in subscriptions {
            let forward_to = stage.next().map(|next| subjects.subject(next).clone());
            let handler = StageHandler::new(stage, Arc::clone(&self.bus), forward_to);
            let span = info_span!("stage", %run_id, listener = %stage);
            listeners.spawn(
                listen(
                    subscription,
                    handler,
                    Arc::clone(&run),
                    Arc::clone(&barrier),
                    cancel.clone(),
                )
                .instrument(span),
            );
        }

        if let Err(e) = self
            .marker
            .arm(MarkerEntry::new(run_id, run.event().name.clone()))
            .await
        {
            run.finalize(RunState::Failed);
            cancel.cancel();
            drain(&mut listeners).await;
            error!(%run_id, error = %e, "could not arm interrupt marker");
            return Err(PipelineError::Marker(e));
        }

        let seed = subjects.subject(Stage::One);
        if let Err(source) = self
            .bus
            .publish(seed, run.event().name.clone().into_bytes())
            .await
        {
            run.finalize(RunState::Failed);
            cancel.cancel();
            drain(&mut listeners).await;
            self.disarm(run_id).await;
            error!(%run_id, subject = %seed, error = %source, "seed publish failed");
            return Err(PipelineError::Publish {
                subject: seed.to_string(),
                source,
            });
        }

        let mut watch = CancellationWatcher::new(
            run_id,
            Arc::clone(&barrier),
            run.deadline(),
            cancel.clone(),
        )
        .spawn();
        let outcome = watch.outcome().await;

        let result = self.conclude(&run, outcome, started).await;

        cancel.cancel();
        drain(&mut listeners).await;
        self.disarm(run_id).await;
        result
    }

    /// Register handlers downstream-first so every hop's receiver exists
    /// before anything can publish to it.
    async fn subscribe_stages(
        &self,
        subjects: &StageSubjects,
    ) -> Result<Vec<(Stage, Subscription)>, PipelineError> {
        let mut subscriptions = Vec::with_capacity(STAGE_COUNT);
        for stage in Stage::ALL.into_iter().rev() {
            let subject = subjects.subject(stage);
            match self.bus.subscribe(subject).await {
                Ok(subscription) => subscriptions.push((stage, subscription)),
                Err(source) => {
                    error!(listener = %stage, %subject, error = %source, "subscription error");
                    return Err(PipelineError::Subscription { stage, source });
                }
            }
        }
        Ok(subscriptions)
    }

    /// Turn the watcher's outcome into the run's single terminal result
    async fn conclude(
        &self,
        run: &PipelineRun,
        outcome: WatchOutcome,
        started: Instant,
    ) -> Result<PipelineResult, PipelineError> {
        let run_id = run.id();
        match outcome {
            WatchOutcome::Completed => {
                let results = run
                    .finalize(RunState::Completed)
                    .ok_or(PipelineError::Incomplete { run_id })?;
                let result = PipelineResult::assemble(run_id, results)
                    .ok_or(PipelineError::Incomplete { run_id })?;

                if let Err(e) = self.store.save(&result).await {
                    error!(%run_id, error = %e, "could not persist event record");
                    return Err(PipelineError::Storage(e));
                }

                info!(
                    %run_id,
                    listener1 = %result.listener1,
                    listener2 = %result.listener2,
                    listener3 = %result.listener3,
                    "pipeline run completed"
                );
                Ok(result)
            }
            WatchOutcome::TimedOut => {
                let completed = run.recorded_count();
                run.finalize(RunState::TimedOut);
                Err(PipelineError::Timeout {
                    run_id,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    completed,
                })
            }
            WatchOutcome::Cancelled => {
                run.finalize(RunState::Failed);
                Err(PipelineError::Cancelled { run_id })
            }
        }
    }

    async fn disarm(&self, run_id: Uuid) {
        if let Err(e) = self.marker.disarm(run_id).await {
            // A stale entry is reconciled against the store on next boot
            warn!(%run_id, error = %e, "could not disarm interrupt marker");
        }
    }
}

/// Feed deliveries from one subscription to its stage handler until the run
/// is cancelled or the subscription ends.
async fn listen(
    mut subscription: Subscription,
    handler: StageHandler,
    run: Arc<PipelineRun>,
    barrier: Arc<CompletionBarrier>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = subscription.next() => match message {
                Some(message) => message,
                None => break,
            },
        };
        handler.handle(message, &run, &barrier).await;
    }
}

/// Wait for listeners to stop, aborting any that outlast the grace period
async fn drain(listeners: &mut JoinSet<()>) {
    let graceful = tokio::time::timeout(LISTENER_GRACE, async {
        while listeners.join_next().await.is_some() {}
    })
    .await;

    if graceful.is_err() {
        warn!(remaining = listeners.len(), "stage listeners did not stop in time, aborting");
        listeners.shutdown().await;
    }
}
