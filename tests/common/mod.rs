//! Shared test doubles for the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use uuid::Uuid;

use eventchain::adapters::{
    BusError, InMemoryBus, MessageBus, ResultStore, StoreError, Subject, Subscription,
};
use eventchain::core::{InterruptMarker, Orchestrator};
use eventchain::domain::{PipelineResult, Stage};

/// Misbehaviour injected by [`FaultyBus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Subscribing to a subject ending with this suffix fails
    FailSubscribe(&'static str),
    /// Publishes to a subject ending with this suffix vanish
    DropPublish(&'static str),
    /// Publishes to this stage's subject fail
    FailPublish(Stage),
    /// Every publish is delivered twice
    Duplicate,
    /// Every publish is held back this long
    Delay(Duration),
}

/// In-memory bus with call counters and an optional fault
pub struct FaultyBus {
    inner: InMemoryBus,
    fault: Fault,
    subscribes: AtomicUsize,
    publishes: AtomicUsize,
}

impl FaultyBus {
    pub fn new(fault: Fault) -> Self {
        Self {
            inner: InMemoryBus::new(),
            fault,
            subscribes: AtomicUsize::new(0),
            publishes: AtomicUsize::new(0),
        }
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }
}

#[async_trait]
impl MessageBus for FaultyBus {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn subscribe(&self, subject: &Subject) -> Result<Subscription, BusError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if let Fault::FailSubscribe(suffix) = self.fault {
            if subject.as_str().ends_with(suffix) {
                return Err(BusError::Closed);
            }
        }
        self.inner.subscribe(subject).await
    }

    async fn publish(&self, subject: &Subject, payload: Vec<u8>) -> Result<(), BusError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::DropPublish(suffix) if subject.as_str().ends_with(suffix) => Ok(()),
            Fault::FailPublish(stage) if is_stage_subject(subject, stage) => {
                Err(BusError::SlowConsumer {
                    subject: subject.to_string(),
                })
            }
            Fault::Duplicate => {
                self.inner.publish(subject, payload.clone()).await?;
                self.inner.publish(subject, payload).await
            }
            Fault::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.inner.publish(subject, payload).await
            }
            _ => self.inner.publish(subject, payload).await,
        }
    }
}

/// Stage one listens on the bare run subject; later stages add a suffix
fn is_stage_subject(subject: &Subject, stage: Stage) -> bool {
    let name = subject.as_str();
    match stage {
        Stage::One => !Stage::ALL[1..]
            .iter()
            .any(|s| name.ends_with(s.listener_name())),
        _ => name.ends_with(stage.listener_name()),
    }
}

/// Vec-backed store; never touches the blocking pool
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<PipelineResult>>,
    fail_saves: AtomicBool,
    fail_reads: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<PipelineResult>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn fail_saves(&self) {
        self.fail_saves.store(true, Ordering::SeqCst);
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn rows(&self) -> Vec<PipelineResult> {
        self.rows.lock().clone()
    }

    pub fn save_calls(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::TaskFailed("store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn save(&self, result: &PipelineResult) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.rows.lock().push(result.clone());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<PipelineResult>, StoreError> {
        self.check_reads()?;
        Ok(self.rows.lock().last().cloned())
    }

    async fn find(&self, run_id: Uuid) -> Result<Option<PipelineResult>, StoreError> {
        self.check_reads()?;
        Ok(self.rows.lock().iter().find(|r| r.run_id == run_id).cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<PipelineResult>, StoreError> {
        self.check_reads()?;
        Ok(self.rows.lock().iter().rev().take(limit).cloned().collect())
    }
}

/// Everything a test needs to drive and inspect one orchestrator
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub bus: Arc<FaultyBus>,
    pub store: Arc<MemoryStore>,
    pub marker: Arc<InterruptMarker>,
    _temp: TempDir,
}

impl Harness {
    pub async fn new(fault: Fault) -> Self {
        Self::with_store(fault, MemoryStore::new()).await
    }

    pub async fn with_store(fault: Fault, store: MemoryStore) -> Self {
        let temp = TempDir::new().unwrap();
        let bus = Arc::new(FaultyBus::new(fault));
        let store = Arc::new(store);
        let marker = Arc::new(InterruptMarker::open(temp.path().join("interrupts.marker")).unwrap());

        let (orchestrator, report) =
            Orchestrator::boot(bus.clone(), store.clone(), Arc::clone(&marker))
                .await
                .unwrap();
        assert!(report.is_clean());

        Self {
            orchestrator,
            bus,
            store,
            marker,
            _temp: temp,
        }
    }
}
