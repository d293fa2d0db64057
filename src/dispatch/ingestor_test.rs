use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serial_test::serial;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing_test::traced_test;

use super::ChangeIngestor;
use super::IngestOutcome;
use crate::test_utils::ChangeBuilder;
use crate::ChangeId;
use crate::DispatchConfig;
use crate::MockChangeStore;
use crate::RetryPolicies;
use crate::StorageError;
use crate::STORE_UNAVAILABLE_ALERT;

fn config(
    capacity: usize,
    batch_size: usize,
) -> DispatchConfig {
    DispatchConfig {
        ingest_queue_capacity: capacity,
        ingest_batch_size: batch_size,
        ..Default::default()
    }
}

fn retry(alert_threshold: u32) -> RetryPolicies {
    RetryPolicies {
        store_failure_alert_threshold: alert_threshold,
        ..Default::default()
    }
}

fn ok_ids(n: usize) -> Vec<ChangeId> {
    (1..=n as u64).map(ChangeId).collect()
}

#[tokio::test]
async fn test_record_reports_full_and_closed_queue() {
    let store = Arc::new(MockChangeStore::new());
    let (ingestor, worker) = ChangeIngestor::new(store, &config(2, 10), &retry(3));

    assert_eq!(ingestor.record(ChangeBuilder::new("Q1").build_new()), IngestOutcome::Queued);
    assert_eq!(ingestor.record(ChangeBuilder::new("Q2").build_new()), IngestOutcome::Queued);
    assert_eq!(ingestor.record(ChangeBuilder::new("Q3").build_new()), IngestOutcome::QueueFull);

    drop(worker);
    assert_eq!(ingestor.record(ChangeBuilder::new("Q4").build_new()), IngestOutcome::Closed);
}

#[tokio::test]
#[serial]
async fn test_shutdown_drains_queue_in_batches() {
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let mut store = MockChangeStore::new();
    let seen = sizes.clone();
    store.expect_append_batch().returning(move |batch| {
        seen.lock().push(batch.len());
        Ok(ok_ids(batch.len()))
    });

    let (ingestor, worker) = ChangeIngestor::new(Arc::new(store), &config(16, 2), &retry(3));
    for e in ["Q1", "Q2", "Q3"] {
        assert_eq!(ingestor.record(ChangeBuilder::new(e).build_new()), IngestOutcome::Queued);
    }

    let (tx, rx) = watch::channel(());
    tx.send(()).unwrap();
    worker.run(rx).await.unwrap();

    assert_eq!(*sizes.lock(), vec![2, 1]);
}

#[tokio::test]
#[serial]
async fn test_full_batch_is_appended_while_running() {
    let (appended_tx, mut appended_rx) = mpsc::unbounded_channel();
    let mut store = MockChangeStore::new();
    store.expect_append_batch().returning(move |batch| {
        let entities: Vec<String> = batch.iter().map(|c| c.entity_id.to_string()).collect();
        appended_tx.send(entities).unwrap();
        Ok(ok_ids(batch.len()))
    });

    let (ingestor, worker) = ChangeIngestor::new(Arc::new(store), &config(16, 2), &retry(3));
    let (tx, rx) = watch::channel(());
    let handle = tokio::spawn(worker.run(rx));

    ingestor.record(ChangeBuilder::new("Q1").build_new());
    ingestor.record(ChangeBuilder::new("Q2").build_new());

    assert_eq!(appended_rx.recv().await.unwrap(), vec!["Q1", "Q2"]);

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_partial_batch_is_flushed_after_interval() {
    let (appended_tx, mut appended_rx) = mpsc::unbounded_channel();
    let mut store = MockChangeStore::new();
    store.expect_append_batch().returning(move |batch| {
        appended_tx.send(batch.len()).unwrap();
        Ok(ok_ids(batch.len()))
    });

    let (ingestor, worker) = ChangeIngestor::new(Arc::new(store), &config(16, 100), &retry(3));
    let (_tx, rx) = watch::channel(());
    tokio::spawn(worker.run(rx));

    ingestor.record(ChangeBuilder::new("Q1").build_new());
    tokio::time::advance(Duration::from_millis(200)).await;

    assert_eq!(appended_rx.recv().await, Some(1));
}

#[tokio::test(start_paused = true)]
#[traced_test]
#[serial]
async fn test_store_outage_raises_alert_and_recovers() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let (appended_tx, mut appended_rx) = mpsc::unbounded_channel();
    let mut store = MockChangeStore::new();
    let counter = attempts.clone();
    store.expect_append_batch().returning(move |batch| {
        if counter.fetch_add(1, Ordering::SeqCst) < 3 {
            return Err(StorageError::StoreUnavailable("disk offline".to_string()).into());
        }
        appended_tx.send(batch.len()).unwrap();
        Ok(ok_ids(batch.len()))
    });

    let (ingestor, worker) = ChangeIngestor::new(Arc::new(store), &config(16, 1), &retry(2));
    let (tx, rx) = watch::channel(());
    let handle = tokio::spawn(worker.run(rx));

    ingestor.record(ChangeBuilder::new("Q1").build_new());

    assert_eq!(appended_rx.recv().await, Some(1));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(STORE_UNAVAILABLE_ALERT.get(), 0.0);
    assert!(logs_contain("change store unavailable"));
    assert!(logs_contain("change store reachable again"));

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
#[traced_test]
#[serial]
async fn test_shutdown_during_outage_reports_unpersisted_changes() {
    let mut store = MockChangeStore::new();
    store
        .expect_append_batch()
        .returning(|_| Err(StorageError::StoreUnavailable("disk offline".to_string()).into()));

    let (ingestor, worker) = ChangeIngestor::new(Arc::new(store), &config(16, 1), &retry(1));
    let (tx, rx) = watch::channel(());
    let handle = tokio::spawn(worker.run(rx));

    ingestor.record(ChangeBuilder::new("Q42").revision(7).build_new());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(STORE_UNAVAILABLE_ALERT.get(), 1.0);

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert!(logs_contain("change not persisted before shutdown"));
    assert!(logs_contain("Q42"));
    STORE_UNAVAILABLE_ALERT.set(0.0);
}
