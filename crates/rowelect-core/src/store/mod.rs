//! Store gateway for election rows.
//!
//! The election protocol never touches a database directly. Everything it
//! needs from the shared store is expressed by the [`ElectionStore`] and
//! [`ElectionTransaction`] traits:
//!
//! - an idempotent schema-ensure
//! - non-locking point reads of a row
//! - a transaction that locks one row (or observes its absence), writes it and
//!   commits
//! - a conditional update guarded by `(name, leader_id, term)` that reports the
//!   number of rows it touched
//!
//! # Implementations
//!
//! - [`SqliteElectionStore`]: SQLite through SQLx (feature `database`)
//! - [`PgElectionStore`]: PostgreSQL through SQLx (feature `database`)
//! - [`MockElectionStore`]: in-memory implementation for tests

mod error;
mod mock;
mod pool;
pub mod retry;
mod types;

#[cfg(feature = "database")]
mod postgres;
#[cfg(feature = "database")]
mod sqlite;

pub use error::StoreError;
pub use mock::MockElectionStore;
pub use pool::{connect_store, connect_store_with_options, PoolOptions};
pub use retry::{with_retry, RetryConfig};
pub use types::{ElectionRecord, LeaderUpdate, Progress, ELECTION_TABLE};

#[cfg(feature = "database")]
pub use postgres::PgElectionStore;
#[cfg(feature = "database")]
pub use sqlite::SqliteElectionStore;

use async_trait::async_trait;

/// Access to the shared election table.
///
/// Implementations must be safe to share between the campaigning context and
/// the lease renewal task, hence `Send + Sync + 'static`.
#[async_trait]
pub trait ElectionStore: Send + Sync + 'static {
    /// Creates the election table and its lookup indexes if they are missing.
    ///
    /// Calling this repeatedly never fails because of existing objects and
    /// never alters stored rows.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Reads `(term, revision)` for an election without locking.
    ///
    /// Returns `Ok(None)` when the row does not exist.
    async fn read_progress(&self, name: &str) -> Result<Option<Progress>, StoreError>;

    /// Reads the installed leader id without locking.
    ///
    /// Returns `Ok(None)` when the row does not exist; an existing row with a
    /// vacant seat yields `Ok(Some(""))`.
    async fn read_leader_id(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Reads the whole row without locking.
    async fn read_record(&self, name: &str) -> Result<Option<ElectionRecord>, StoreError>;

    /// Opens a transaction for a claim attempt.
    async fn begin(&self) -> Result<Box<dyn ElectionTransaction>, StoreError>;

    /// Applies `update` to the row matching `(name, leader_id, term)`.
    ///
    /// Returns the number of rows affected; `0` means the caller no longer
    /// holds that term.
    async fn update_as_leader(
        &self,
        name: &str,
        leader_id: &str,
        term: i64,
        update: LeaderUpdate,
    ) -> Result<u64, StoreError>;
}

/// One open claim transaction.
///
/// Dropping the transaction without calling [`commit`](Self::commit) rolls it
/// back.
#[async_trait]
pub trait ElectionTransaction: Send {
    /// Reads `(term, revision)` while holding a write lock on the row, so that
    /// no other claim can interleave until this transaction ends.
    async fn lock_progress(&mut self, name: &str) -> Result<Option<Progress>, StoreError>;

    /// Inserts a fresh row.
    async fn insert(&mut self, record: &ElectionRecord) -> Result<(), StoreError>;

    /// Installs a new leader on an existing row with `revision = 0`.
    async fn install(
        &mut self,
        name: &str,
        leader_id: &str,
        value: &str,
        term: i64,
    ) -> Result<(), StoreError>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Rolls the transaction back explicitly.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
