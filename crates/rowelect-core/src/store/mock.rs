//! In-memory implementation of [`ElectionStore`] for testing.
//!
//! `MockElectionStore` keeps the election table in a map behind an async
//! mutex. A claim transaction holds that mutex from `lock_progress` until it
//! commits or is dropped, which gives the same serialization a row lock gives
//! a SQL backend. Clones share state, so several coordinators built on clones
//! of one store behave like processes sharing one database.

use super::{
    ElectionRecord, ElectionStore, ElectionTransaction, LeaderUpdate, Progress, StoreError,
    ELECTION_TABLE,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub(crate) struct MockTable {
    schema_ready: bool,
    rows: HashMap<String, ElectionRecord>,
}

impl MockTable {
    fn check_schema(&self) -> Result<(), StoreError> {
        if self.schema_ready {
            Ok(())
        } else {
            Err(StoreError::query(format!("no such table: {}", ELECTION_TABLE)))
        }
    }
}

/// A mock store with fault injection.
#[derive(Debug, Clone, Default)]
pub struct MockElectionStore {
    table: Arc<Mutex<MockTable>>,
    unavailable: Arc<AtomicBool>,
    fail_next_commit: Arc<AtomicBool>,
    schema_calls: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
}

impl MockElectionStore {
    /// Creates an empty store. The table does not exist until
    /// [`ensure_schema`](ElectionStore::ensure_schema) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail with a connection error until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next commit fail as if another writer had won the race.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Number of times `ensure_schema` has been called.
    pub fn schema_ensure_count(&self) -> u64 {
        self.schema_calls.load(Ordering::SeqCst)
    }

    /// Number of claim transactions rolled back explicitly.
    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Writes a row directly, bypassing the claim protocol.
    ///
    /// Creates the table if needed. Useful for seeding a mid-term state.
    pub async fn put_record(&self, record: ElectionRecord) {
        let mut table = self.table.lock().await;
        table.schema_ready = true;
        table.rows.insert(record.name.clone(), record);
    }

    /// Returns a copy of every stored row.
    pub async fn all_records(&self) -> HashMap<String, ElectionRecord> {
        self.table.lock().await.rows.clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::connection("store unavailable: connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ElectionStore for MockElectionStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.check_available()?;
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.table.lock().await.schema_ready = true;
        Ok(())
    }

    async fn read_progress(&self, name: &str) -> Result<Option<Progress>, StoreError> {
        self.check_available()?;
        let table = self.table.lock().await;
        table.check_schema()?;
        Ok(table.rows.get(name).map(ElectionRecord::progress))
    }

    async fn read_leader_id(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let table = self.table.lock().await;
        table.check_schema()?;
        Ok(table.rows.get(name).map(|r| r.leader_id.clone()))
    }

    async fn read_record(&self, name: &str) -> Result<Option<ElectionRecord>, StoreError> {
        self.check_available()?;
        let table = self.table.lock().await;
        table.check_schema()?;
        Ok(table.rows.get(name).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn ElectionTransaction>, StoreError> {
        self.check_available()?;
        Ok(Box::new(MockTransaction {
            table: Arc::clone(&self.table),
            guard: None,
            staged: None,
            fail_commit: Arc::clone(&self.fail_next_commit),
            rollbacks: Arc::clone(&self.rollbacks),
        }))
    }

    async fn update_as_leader(
        &self,
        name: &str,
        leader_id: &str,
        term: i64,
        update: LeaderUpdate,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut table = self.table.lock().await;
        table.check_schema()?;

        match table.rows.get_mut(name) {
            Some(row) if row.leader_id == leader_id && row.term == term => {
                match update {
                    LeaderUpdate::Renew => row.revision += 1,
                    LeaderUpdate::Vacate => row.leader_id.clear(),
                }
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

/// Claim transaction over the mock table.
struct MockTransaction {
    table: Arc<Mutex<MockTable>>,
    guard: Option<OwnedMutexGuard<MockTable>>,
    staged: Option<ElectionRecord>,
    fail_commit: Arc<AtomicBool>,
    rollbacks: Arc<AtomicU64>,
}

impl MockTransaction {
    async fn locked(&mut self) -> Result<&mut MockTable, StoreError> {
        if self.guard.is_none() {
            self.guard = Some(Arc::clone(&self.table).lock_owned().await);
        }
        match self.guard.as_deref_mut() {
            Some(table) => {
                table.check_schema()?;
                Ok(table)
            }
            None => Err(StoreError::query("transaction lost its lock")),
        }
    }
}

#[async_trait]
impl ElectionTransaction for MockTransaction {
    async fn lock_progress(&mut self, name: &str) -> Result<Option<Progress>, StoreError> {
        let table = self.locked().await?;
        Ok(table.rows.get(name).map(ElectionRecord::progress))
    }

    async fn insert(&mut self, record: &ElectionRecord) -> Result<(), StoreError> {
        let table = self.locked().await?;
        if table.rows.contains_key(&record.name) {
            return Err(StoreError::conflict(format!(
                "duplicate key value violates unique constraint on {}.name",
                ELECTION_TABLE
            )));
        }
        self.staged = Some(record.clone());
        Ok(())
    }

    async fn install(
        &mut self,
        name: &str,
        leader_id: &str,
        value: &str,
        term: i64,
    ) -> Result<(), StoreError> {
        let table = self.locked().await?;
        if !table.rows.contains_key(name) {
            return Err(StoreError::conflict(format!(
                "election '{}' disappeared while locked",
                name
            )));
        }
        self.staged = Some(ElectionRecord {
            name: name.to_string(),
            leader_id: leader_id.to_string(),
            value: value.to_string(),
            term,
            revision: 0,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        if this.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::conflict("simulated commit conflict"));
        }
        let staged = this.staged.take();
        let table = this.locked().await?;
        if let Some(record) = staged {
            table.rows.insert(record.name.clone(), record);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
