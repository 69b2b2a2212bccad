//! Recovery and Failure Integration Tests
//!
//! Boot-time marker reconciliation plus the fail-fast paths of a run.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use common::{Fault, FaultyBus, Harness, MemoryStore};
use eventchain::core::{
    lost_run_ids, ErrorKind, InterruptMarker, MarkerContents, MarkerEntry, Orchestrator,
    PipelineError, RecoveryError,
};
use eventchain::domain::{Event, PipelineResult, Stage};

fn row(run_id: Uuid) -> PipelineResult {
    PipelineResult {
        run_id,
        listener1: "GO".into(),
        listener2: "OG".into(),
        listener3: "og".into(),
        event_time: Utc::now(),
    }
}

fn marker_in(temp: &TempDir) -> Arc<InterruptMarker> {
    Arc::new(InterruptMarker::open(temp.path().join("interrupts.marker")).unwrap())
}

#[tokio::test]
async fn test_committed_run_is_reconciled_and_marker_cleared() {
    let temp = TempDir::new().unwrap();
    let marker = marker_in(&temp);
    let run_id = Uuid::new_v4();
    marker.arm(MarkerEntry::new(run_id, "go")).await.unwrap();

    let store = Arc::new(MemoryStore::with_rows(vec![row(run_id)]));
    let bus = Arc::new(FaultyBus::new(Fault::None));
    let (_, report) = Orchestrator::boot(bus, store.clone(), Arc::clone(&marker))
        .await
        .unwrap();

    assert!(!report.is_clean());
    assert_eq!(report.reconciled.len(), 1);
    assert!(report.lost.is_empty());
    assert!(marker.read().await.unwrap().is_empty());
    assert_eq!(store.rows().len(), 1);
}

#[tokio::test]
async fn test_uncommitted_run_is_reported_lost_without_data() {
    let temp = TempDir::new().unwrap();
    let marker = marker_in(&temp);
    let lost = Uuid::new_v4();
    marker.arm(MarkerEntry::new(lost, "go")).await.unwrap();

    // The latest row belongs to some other run
    let store = Arc::new(MemoryStore::with_rows(vec![row(Uuid::new_v4())]));
    let bus = Arc::new(FaultyBus::new(Fault::None));
    let (orchestrator, report) =
        Orchestrator::boot(bus.clone(), store.clone(), Arc::clone(&marker))
            .await
            .unwrap();

    assert_eq!(lost_run_ids(&report), vec![lost]);
    assert!(matches!(
        &report.lost[0],
        RecoveryError::RunLost { event_name, .. } if event_name == "go"
    ));
    assert!(marker.read().await.unwrap().is_empty());
    assert_eq!(store.rows().len(), 1);
    assert_eq!(bus.publish_calls(), 0);

    // Boot completed; the orchestrator accepts work again
    let result = orchestrator.run(Event::new("next")).await.unwrap();
    assert_eq!(result.listener3, "next");
}

#[tokio::test]
async fn test_free_text_marker_is_unrecoverable() {
    let temp = TempDir::new().unwrap();
    let marker = marker_in(&temp);
    std::fs::write(marker.path(), "interrupted mid-run").unwrap();

    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(FaultyBus::new(Fault::None));
    let (_, report) = Orchestrator::boot(bus, store.clone(), Arc::clone(&marker))
        .await
        .unwrap();

    assert!(matches!(
        &report.lost[..],
        [RecoveryError::UnreadableMarker { content }] if content == "interrupted mid-run"
    ));
    assert!(lost_run_ids(&report).is_empty());
    assert!(marker.read().await.unwrap().is_empty());
    assert!(store.rows().is_empty());
}

#[tokio::test]
async fn test_unreachable_store_keeps_marker() {
    let temp = TempDir::new().unwrap();
    let marker = marker_in(&temp);
    marker.arm(MarkerEntry::new(Uuid::new_v4(), "go")).await.unwrap();

    let store = MemoryStore::new();
    store.fail_reads();
    let bus = Arc::new(FaultyBus::new(Fault::None));
    let err = Orchestrator::boot(bus, Arc::new(store), Arc::clone(&marker))
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(!marker.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_name_touches_nothing() {
    let h = Harness::new(Fault::None).await;

    let err = h.orchestrator.run(Event::new("")).await.unwrap_err();

    assert!(matches!(err, PipelineError::InvalidInput));
    assert_eq!(err.kind().status_code(), 400);
    assert_eq!(h.bus.subscribe_calls(), 0);
    assert_eq!(h.bus.publish_calls(), 0);
    assert_eq!(h.store.save_calls(), 0);
    assert!(h.marker.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stage_two_subscription_failure_fails_fast() {
    let h = Harness::new(Fault::FailSubscribe("listener2")).await;

    let err = tokio::time::timeout(Duration::from_secs(2), h.orchestrator.run(Event::new("go")))
        .await
        .expect("subscription failure must not wait for the deadline")
        .unwrap_err();

    assert!(matches!(err, PipelineError::Subscription { stage: Stage::Two, .. }));
    assert_eq!(err.kind().status_code(), 503);
    assert_eq!(h.bus.publish_calls(), 0);
    assert_eq!(h.bus.subscriber_count(), 0);
    assert_eq!(h.store.save_calls(), 0);
    assert!(h.marker.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_seed_publish_failure_fails_fast() {
    let h = Harness::new(Fault::FailPublish(Stage::One)).await;

    let err = tokio::time::timeout(Duration::from_secs(2), h.orchestrator.run(Event::new("go")))
        .await
        .expect("publish failure must not wait for the deadline")
        .unwrap_err();

    assert!(matches!(err, PipelineError::Publish { .. }));
    assert_eq!(err.kind(), ErrorKind::Publish);
    assert_eq!(err.kind().status_code(), 502);
    assert_eq!(h.bus.publish_calls(), 1);
    assert_eq!(h.bus.subscriber_count(), 0);
    assert_eq!(h.store.save_calls(), 0);
    assert!(h.marker.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_process_cannot_take_a_live_marker() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("interrupts.marker");
    let store = Arc::new(MemoryStore::new());

    let marker = Arc::new(InterruptMarker::open(&path).unwrap());
    let bus = Arc::new(FaultyBus::new(Fault::Delay(Duration::from_millis(300))));
    let (live, _) = Orchestrator::boot(bus, store.clone(), Arc::clone(&marker))
        .await
        .unwrap();

    let run = tokio::spawn(async move { live.run(Event::new("go")).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The live run is armed; a second owner is refused and cannot reconcile it
    let err = InterruptMarker::open(&path).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    match marker.read().await.unwrap() {
        MarkerContents::Entries(entries) => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].event_name, "go");
        }
        other => panic!("expected the live entry, got {:?}", other),
    }

    let result = run.await.unwrap().unwrap();
    assert_eq!(result.listener3, "og");
    assert_eq!(store.rows().len(), 1);
    assert!(marker.read().await.unwrap().is_empty());
}
