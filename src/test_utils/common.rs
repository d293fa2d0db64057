use std::sync::Arc;

use tempfile::TempDir;

use crate::init_sled_db_at;
use crate::ChangeId;
use crate::ChangeStore;
use crate::EntityId;
use crate::NewChange;
use crate::RejectedLog;
use crate::SiteId;
use crate::SledChangeStore;
use crate::SledCursorStore;
use crate::SledSubscriptionRegistry;

pub const TEST_CACHE_CAPACITY: u64 = 1024 * 1024;

/// A sled database living in its own temporary directory.
///
/// The directory is removed when the value is dropped.
pub struct TestDb {
    pub db: sled::Db,
    pub dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db = init_sled_db_at(dir.path(), TEST_CACHE_CAPACITY, None).expect("open sled");
        Self { db, dir }
    }

    /// Closes the database and opens it again from the same directory.
    pub fn reopen(self) -> Self {
        let TestDb { db, dir } = self;
        db.flush().expect("flush before reopen");
        drop(db);
        let db = init_sled_db_at(dir.path(), TEST_CACHE_CAPACITY, None).expect("reopen sled");
        Self { db, dir }
    }
}

pub fn site(id: &str) -> SiteId {
    SiteId::new(id).expect("valid site id")
}

pub fn entity(id: &str) -> EntityId {
    id.parse().expect("valid entity id")
}

/// Every repository-side store, opened over one temporary database.
pub struct RepoFixture {
    pub cursors: Arc<SledCursorStore>,
    pub changes: Arc<SledChangeStore>,
    pub subscriptions: Arc<SledSubscriptionRegistry>,
    pub rejected: Arc<RejectedLog>,
    pub test_db: TestDb,
}

impl RepoFixture {
    pub fn new() -> Self {
        let test_db = TestDb::new();
        let cursors = Arc::new(SledCursorStore::open(&test_db.db).expect("open cursors"));
        let changes = Arc::new(SledChangeStore::open(&test_db.db, cursors.clone()).expect("open changes"));
        let subscriptions = Arc::new(SledSubscriptionRegistry::open(&test_db.db).expect("open subscriptions"));
        let rejected = Arc::new(RejectedLog::open(&test_db.db).expect("open rejected log"));
        Self {
            cursors,
            changes,
            subscriptions,
            rejected,
            test_db,
        }
    }

    pub async fn append_all(
        &self,
        changes: Vec<NewChange>,
    ) -> Vec<ChangeId> {
        self.changes.append_batch(changes).await.expect("append changes")
    }
}
