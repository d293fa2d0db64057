use std::collections::BTreeSet;

use entity_dispatch::ChangeId;
use entity_dispatch::ChangeIngestor;
use entity_dispatch::CursorStore;
use entity_dispatch::CycleOutcome;
use entity_dispatch::DispatchConfig;
use entity_dispatch::IngestOutcome;
use entity_dispatch::PageId;
use entity_dispatch::RetryPolicies;
use entity_dispatch::SubscriptionRegistry;
use entity_dispatch::Target;
use entity_dispatch::UsageAspect;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::commons::entity;
use crate::commons::label_change;
use crate::commons::site;
use crate::commons::sitelink_change;
use crate::commons::wait;
use crate::commons::ClientSite;
use crate::commons::Repository;
use crate::commons::CLIENT;

const WORKER: &str = "it-worker";

#[tokio::test]
async fn test_label_change_purges_only_pages_using_labels() {
    let mut client = ClientSite::start(&[
        (10, "Q1", UsageAspect::Label),
        (11, "Q1", UsageAspect::Sitelink),
        (12, "Q2", UsageAspect::All),
    ])
    .await;
    let repo = Repository::new(client.addr);
    repo.subscriptions
        .subscribe(&site(CLIENT), &entity("Q1").into())
        .unwrap();
    repo.append(vec![label_change("Q1", 1), label_change("Q2", 2)]).await;

    let (_tx, shutdown) = watch::channel(());
    let report = repo.dispatcher.run_cycle(&site(CLIENT), WORKER, &shutdown).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::CaughtUp);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped_irrelevant, 1);
    assert_eq!(repo.cursors.cursor(&site(CLIENT)).unwrap(), Some(ChangeId(2)));

    let jobs = client.drain_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].page, PageId(10));
    assert_eq!(jobs[0].entity_ids, BTreeSet::from([entity("Q1")]));
    assert_eq!(client.invalidator.applied_watermark().unwrap(), ChangeId(1));

    client.stop().await;
}

#[tokio::test]
async fn test_batches_split_and_coalesce_per_page() {
    let mut client = ClientSite::start(&[(10, "Q1", UsageAspect::All)]).await;
    let repo = Repository::new(client.addr);
    repo.subscriptions
        .subscribe(&site(CLIENT), &entity("Q1").into())
        .unwrap();
    repo.append(vec![
        label_change("Q1", 1),
        sitelink_change("Q1", 2),
        label_change("Q1", 3),
    ])
    .await;

    let (_tx, shutdown) = watch::channel(());
    let report = repo.dispatcher.run_cycle(&site(CLIENT), WORKER, &shutdown).await.unwrap();

    // batch size 2: [1, 2] then [3]
    assert_eq!(report.batches_sent, 2);
    assert_eq!(report.delivered, 3);
    let pages: Vec<PageId> = client.drain_jobs().into_iter().map(|j| j.page).collect();
    assert_eq!(pages, vec![PageId(10), PageId(10)]);

    client.stop().await;
}

#[tokio::test]
async fn test_unreachable_client_is_retried_without_skipping() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let repo = Repository::new(addr);
    repo.subscriptions
        .subscribe(&site(CLIENT), &entity("Q1").into())
        .unwrap();
    repo.append(vec![label_change("Q1", 1), label_change("Q1", 2)]).await;

    let (_tx, shutdown) = watch::channel(());
    let report = repo.dispatcher.run_cycle(&site(CLIENT), WORKER, &shutdown).await.unwrap();
    assert!(matches!(report.outcome, CycleOutcome::RetryScheduled { failures: 1, .. }));
    assert_eq!(repo.cursors.cursor(&site(CLIENT)).unwrap(), None);

    // The client comes up on the address the repository already knows
    let listener = TcpListener::bind(addr).await.unwrap();
    let mut client = ClientSite::start_on(listener, &[(10, "Q1", UsageAspect::Label)]).await;
    wait(150).await;

    let report = repo.dispatcher.run_cycle(&site(CLIENT), WORKER, &shutdown).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::CaughtUp);
    assert_eq!(repo.cursors.cursor(&site(CLIENT)).unwrap(), Some(ChangeId(2)));
    assert_eq!(client.drain_jobs().len(), 1);
    assert_eq!(repo.dispatcher.failures(&site(CLIENT)), 0);

    client.stop().await;
}

#[tokio::test]
async fn test_namespace_subscriber_receives_new_entities() {
    let mut client = ClientSite::start(&[(20, "Q99", UsageAspect::Label)]).await;
    let repo = Repository::new(client.addr);
    repo.subscriptions
        .subscribe(&site(CLIENT), &Target::Namespace(entity("Q1").kind()))
        .unwrap();
    repo.append(vec![label_change("Q99", 1), label_change("P31", 2)]).await;

    let (_tx, shutdown) = watch::channel(());
    let report = repo.dispatcher.run_cycle(&site(CLIENT), WORKER, &shutdown).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.skipped_irrelevant, 1);
    assert_eq!(client.drain_jobs()[0].page, PageId(20));

    client.stop().await;
}

#[tokio::test]
async fn test_ingested_changes_reach_client() {
    let mut client = ClientSite::start(&[(10, "Q1", UsageAspect::Label)]).await;
    let repo = Repository::new(client.addr);
    repo.subscriptions
        .subscribe(&site(CLIENT), &entity("Q1").into())
        .unwrap();

    let (ingestor, worker) = ChangeIngestor::new(
        repo.changes.clone(),
        &DispatchConfig::default(),
        &RetryPolicies::default(),
    );
    assert_eq!(ingestor.record(label_change("Q1", 1)), IngestOutcome::Queued);
    assert_eq!(ingestor.record(label_change("Q1", 2)), IngestOutcome::Queued);

    let (stop_ingest, ingest_rx) = watch::channel(());
    stop_ingest.send(()).unwrap();
    worker.run(ingest_rx).await.unwrap();

    let (_tx, shutdown) = watch::channel(());
    let report = repo.dispatcher.run_cycle(&site(CLIENT), WORKER, &shutdown).await.unwrap();

    assert_eq!(report.delivered, 2);
    let jobs = client.drain_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].change_ids, vec![ChangeId(1), ChangeId(2)]);

    client.stop().await;
}

#[tokio::test]
async fn test_redelivered_batch_is_applied_once() {
    let mut client = ClientSite::start(&[(10, "Q1", UsageAspect::Label)]).await;
    let first = Repository::new(client.addr);
    first
        .subscriptions
        .subscribe(&site(CLIENT), &entity("Q1").into())
        .unwrap();
    first.append(vec![label_change("Q1", 1)]).await;

    let (_tx, shutdown) = watch::channel(());
    first.dispatcher.run_cycle(&site(CLIENT), WORKER, &shutdown).await.unwrap();
    assert_eq!(client.drain_jobs().len(), 1);

    // A repository that lost its cursor sends change 1 again
    let second = Repository::new(client.addr);
    second
        .subscriptions
        .subscribe(&site(CLIENT), &entity("Q1").into())
        .unwrap();
    second.append(vec![label_change("Q1", 1)]).await;
    let report = second.dispatcher.run_cycle(&site(CLIENT), WORKER, &shutdown).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert!(client.drain_jobs().is_empty());
    assert_eq!(client.tracker.pages_using(&entity("Q1")).unwrap(), BTreeSet::from([PageId(10)]));

    client.stop().await;
}
