use std::sync::Arc;

use tracing_test::traced_test;

use super::*;
use crate::test_utils::entity;
use crate::test_utils::site;
use crate::test_utils::ChangeBuilder;
use crate::test_utils::RepoFixture;
use crate::test_utils::TestDb;
use crate::ChangeId;
use crate::ChangeStore;
use crate::CursorStore;
use crate::DispatchError;
use crate::Error;

fn open_stores(test_db: &TestDb) -> (Arc<SledCursorStore>, SledChangeStore) {
    let cursors = Arc::new(SledCursorStore::open(&test_db.db).unwrap());
    let changes = SledChangeStore::open(&test_db.db, cursors.clone()).unwrap();
    (cursors, changes)
}

#[tokio::test]
#[traced_test]
async fn test_append_assigns_contiguous_ids() {
    let f = RepoFixture::new();

    let first = f.changes.append(ChangeBuilder::new("Q1").build_new()).await.unwrap();
    let batch = f
        .append_all(vec![
            ChangeBuilder::new("Q2").build_new(),
            ChangeBuilder::new("Q3").build_new(),
        ])
        .await;

    assert_eq!(first, ChangeId(1));
    assert_eq!(batch, vec![ChangeId(2), ChangeId(3)]);
    assert_eq!(f.changes.last_change_id().unwrap(), ChangeId(3));
    assert_eq!(f.changes.first_change_id().unwrap(), Some(ChangeId(1)));
}

#[tokio::test]
async fn test_append_empty_batch_is_noop() {
    let f = RepoFixture::new();

    assert!(f.append_all(vec![]).await.is_empty());
    assert_eq!(f.changes.last_change_id().unwrap(), ChangeId::ZERO);
    assert_eq!(f.changes.first_change_id().unwrap(), None);
}

#[tokio::test]
async fn test_read_since_zero_returns_everything_in_order() {
    let f = RepoFixture::new();
    let new_changes: Vec<_> = (1..=25)
        .map(|n| ChangeBuilder::new(&format!("Q{}", n % 4 + 1)).revision(n).build_new())
        .collect();
    f.append_all(new_changes).await;

    let all = f.changes.read_since(ChangeId::ZERO, 100).unwrap();

    assert_eq!(all.len(), 25);
    for (i, change) in all.iter().enumerate() {
        assert_eq!(change.change_id(), ChangeId(i as u64 + 1));
        assert_eq!(change.revision_id(), i as u64 + 1);
    }
}

#[tokio::test]
async fn test_read_since_respects_limit_and_resumes() {
    let f = RepoFixture::new();
    f.append_all((0..10).map(|_| ChangeBuilder::new("Q1").build_new()).collect())
        .await;

    let first_page = f.changes.read_since(ChangeId::ZERO, 4).unwrap();
    let last_seen = first_page.last().unwrap().change_id();
    let second_page = f.changes.read_since(last_seen, 4).unwrap();
    let tail = f.changes.read_since(ChangeId(8), 100).unwrap();

    assert_eq!(
        first_page.iter().map(|c| c.change_id().get()).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(
        second_page.iter().map(|c| c.change_id().get()).collect::<Vec<_>>(),
        vec![5, 6, 7, 8]
    );
    assert_eq!(tail.len(), 2);
    assert!(f.changes.read_since(ChangeId(10), 100).unwrap().is_empty());
}

#[tokio::test]
async fn test_iter_since_is_lazy_over_later_appends() {
    let f = RepoFixture::new();
    f.append_all(vec![ChangeBuilder::new("Q1").build_new()]).await;

    let mut iter = f.changes.iter_since(ChangeId::ZERO);
    let first = iter.next().unwrap().unwrap();
    assert_eq!(first.change_id(), ChangeId(1));

    f.append_all(vec![ChangeBuilder::new("Q2").build_new()]).await;
    let resumed: Vec<_> = f
        .changes
        .iter_since(first.change_id())
        .collect::<crate::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].entity_id(), &entity("Q2"));
}

#[tokio::test]
#[traced_test]
async fn test_ids_survive_restart() {
    let test_db = TestDb::new();
    {
        let (_, changes) = open_stores(&test_db);
        changes
            .append_batch(vec![
                ChangeBuilder::new("Q1").build_new(),
                ChangeBuilder::new("Q2").build_new(),
            ])
            .await
            .unwrap();
        changes.flush().await.unwrap();
    }

    let test_db = test_db.reopen();
    let (_, changes) = open_stores(&test_db);
    let id = changes.append(ChangeBuilder::new("Q3").build_new()).await.unwrap();

    assert_eq!(id, ChangeId(3));
    assert_eq!(changes.read_since(ChangeId::ZERO, 10).unwrap().len(), 3);
}

#[tokio::test]
async fn test_ids_are_not_reused_after_full_prune() {
    let f = RepoFixture::new();
    f.append_all((0..5).map(|_| ChangeBuilder::new("Q1").build_new()).collect())
        .await;

    let removed = f.changes.prune(ChangeId(6)).await.unwrap();
    assert_eq!(removed, 5);
    assert!(f.changes.is_empty());
    assert_eq!(f.changes.first_change_id().unwrap(), None);

    let id = f.changes.append(ChangeBuilder::new("Q1").build_new()).await.unwrap();
    assert_eq!(id, ChangeId(6));
}

#[tokio::test]
#[traced_test]
async fn test_prune_refused_while_cursor_lags() {
    let f = RepoFixture::new();
    f.append_all((0..60).map(|_| ChangeBuilder::new("Q1").build_new()).collect())
        .await;
    let s = site("enwiki");
    assert!(f.cursors.compare_and_advance(&s, None, ChangeId(10)).unwrap());

    let err = f.changes.prune(ChangeId(50)).await.unwrap_err();
    match err {
        Error::Dispatch(DispatchError::PruneConflict { before, site, cursor }) => {
            assert_eq!(before, ChangeId(50));
            assert_eq!(site, s);
            assert_eq!(cursor, ChangeId(10));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(f.changes.len(), 60);

    assert!(f
        .cursors
        .compare_and_advance(&s, Some(ChangeId(10)), ChangeId(55))
        .unwrap());
    let removed = f.changes.prune(ChangeId(50)).await.unwrap();

    assert_eq!(removed, 49);
    assert_eq!(f.changes.first_change_id().unwrap(), Some(ChangeId(50)));
}

#[tokio::test]
async fn test_prune_up_to_cursor_plus_one_is_allowed() {
    let f = RepoFixture::new();
    f.append_all((0..10).map(|_| ChangeBuilder::new("Q1").build_new()).collect())
        .await;
    f.cursors
        .compare_and_advance(&site("enwiki"), None, ChangeId(4))
        .unwrap();

    assert_eq!(f.changes.prune(ChangeId(5)).await.unwrap(), 4);
    assert!(f.changes.prune(ChangeId(6)).await.is_err());
}

#[tokio::test]
async fn test_prune_considers_slowest_site() {
    let f = RepoFixture::new();
    f.append_all((0..10).map(|_| ChangeBuilder::new("Q1").build_new()).collect())
        .await;
    f.cursors
        .compare_and_advance(&site("enwiki"), None, ChangeId(9))
        .unwrap();
    f.cursors
        .compare_and_advance(&site("dewiki"), None, ChangeId(2))
        .unwrap();

    let err = f.changes.prune(ChangeId(8)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Dispatch(DispatchError::PruneConflict { ref site, .. }) if site.as_str() == "dewiki"
    ));
}

#[tokio::test]
async fn test_rejected_log_list_and_clear() {
    let f = RepoFixture::new();
    let en = site("enwiki");
    let de = site("dewiki");

    f.rejected.record(&en, ChangeId(7), &entity("Q1"), "bad payload").unwrap();
    f.rejected.record(&en, ChangeId(3), &entity("Q2"), "bad payload").unwrap();
    f.rejected.record(&de, ChangeId(4), &entity("Q2"), "bad payload").unwrap();

    let listed = f.rejected.list(&en).unwrap();
    assert_eq!(
        listed.iter().map(|e| e.change_id).collect::<Vec<_>>(),
        vec![ChangeId(3), ChangeId(7)]
    );
    assert_eq!(listed[1].entity_id, entity("Q1"));

    assert_eq!(f.rejected.clear(&en).unwrap(), 2);
    assert!(f.rejected.list(&en).unwrap().is_empty());
    assert_eq!(f.rejected.list(&de).unwrap().len(), 1);
}
