//! SQLite implementation of [`ElectionStore`].
//!
//! SQLite has no `SELECT ... FOR UPDATE`. A claim transaction instead opens
//! with a no-op `UPDATE` on the election row, which takes the database write
//! lock before anything is read. Every other claimant then waits on the busy
//! handler (or fails with `SQLITE_BUSY`, reported as a conflict) until this
//! transaction ends, so the `(term, revision)` it reads cannot go stale.

use super::types::ElectionRow;
use super::{
    ElectionRecord, ElectionStore, ElectionTransaction, LeaderUpdate, Progress, StoreError,
};
use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS leader_elections (
        name TEXT NOT NULL PRIMARY KEY,
        leader_id TEXT NOT NULL,
        value TEXT NOT NULL,
        term INTEGER NOT NULL,
        revision INTEGER NOT NULL
    )
"#;

const CREATE_LEADER_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_leader_elections_leader
        ON leader_elections(name, leader_id)
"#;

const CREATE_TERM_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_leader_elections_term
        ON leader_elections(name, term, revision)
"#;

/// SQLite-backed election store.
#[derive(Debug, Clone)]
pub struct SqliteElectionStore {
    pool: SqlitePool,
}

impl SqliteElectionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ElectionStore for SqliteElectionStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for stmt in [CREATE_TABLE, CREATE_LEADER_INDEX, CREATE_TERM_INDEX] {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::from(e).into_schema())?;
        }
        debug!("SQLite election schema ready");
        Ok(())
    }

    async fn read_progress(&self, name: &str) -> Result<Option<Progress>, StoreError> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT term, revision FROM leader_elections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(term, revision)| Progress::new(term, revision)))
    }

    async fn read_leader_id(&self, name: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT leader_id FROM leader_elections WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(leader_id,)| leader_id))
    }

    async fn read_record(&self, name: &str) -> Result<Option<ElectionRecord>, StoreError> {
        let row: Option<ElectionRow> = sqlx::query_as(
            "SELECT name, leader_id, value, term, revision FROM leader_elections WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ElectionRecord::from))
    }

    async fn begin(&self) -> Result<Box<dyn ElectionTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteClaim { tx }))
    }

    async fn update_as_leader(
        &self,
        name: &str,
        leader_id: &str,
        term: i64,
        update: LeaderUpdate,
    ) -> Result<u64, StoreError> {
        let stmt = match update {
            LeaderUpdate::Renew => {
                "UPDATE leader_elections SET revision = revision + 1 \
                 WHERE name = ? AND leader_id = ? AND term = ?"
            }
            LeaderUpdate::Vacate => {
                "UPDATE leader_elections SET leader_id = '' \
                 WHERE name = ? AND leader_id = ? AND term = ?"
            }
        };

        let result = sqlx::query(stmt)
            .bind(name)
            .bind(leader_id)
            .bind(term)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Claim transaction on SQLite.
struct SqliteClaim {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ElectionTransaction for SqliteClaim {
    async fn lock_progress(&mut self, name: &str) -> Result<Option<Progress>, StoreError> {
        // Writing first takes the RESERVED lock even when no row matches.
        sqlx::query("UPDATE leader_elections SET term = term WHERE name = ?")
            .bind(name)
            .execute(&mut *self.tx)
            .await?;

        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT term, revision FROM leader_elections WHERE name = ?")
                .bind(name)
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(row.map(|(term, revision)| Progress::new(term, revision)))
    }

    async fn insert(&mut self, record: &ElectionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO leader_elections (name, leader_id, value, term, revision)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.name)
        .bind(&record.leader_id)
        .bind(&record.value)
        .bind(record.term)
        .bind(record.revision)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn install(
        &mut self,
        name: &str,
        leader_id: &str,
        value: &str,
        term: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE leader_elections
            SET term = ?, revision = 0, leader_id = ?, value = ?
            WHERE name = ?
            "#,
        )
        .bind(term)
        .bind(leader_id)
        .bind(value)
        .bind(name)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::conflict(format!(
                "election '{}' disappeared while locked",
                name
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteElectionStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory SQLite");
        let store = SqliteElectionStore::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    fn record(leader: &str, term: i64) -> ElectionRecord {
        ElectionRecord {
            name: "jobs".to_string(),
            leader_id: leader.to_string(),
            value: format!("{}-profile", leader),
            term,
            revision: 0,
        }
    }

    #[tokio::test]
    async fn test_ensure_schema_twice_keeps_rows() {
        let store = memory_store().await;

        let mut tx = store.begin().await.unwrap();
        tx.insert(&record("node-a", 0)).await.unwrap();
        tx.commit().await.unwrap();

        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();

        assert_eq!(
            store.read_record("jobs").await.unwrap(),
            Some(record("node-a", 0))
        );
    }

    #[tokio::test]
    async fn test_read_missing_row() {
        let store = memory_store().await;
        assert!(store.read_progress("jobs").await.unwrap().is_none());
        assert!(store.read_leader_id("jobs").await.unwrap().is_none());
        assert!(store.read_record("jobs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_without_schema_fails() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteElectionStore::new(pool);

        let err = store.read_progress("jobs").await.unwrap_err();
        assert!(matches!(err, StoreError::Query(_)));
    }

    #[tokio::test]
    async fn test_claim_transaction_install() {
        let store = memory_store().await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_progress("jobs").await.unwrap().is_none());
        tx.insert(&record("node-a", 0)).await.unwrap();
        tx.commit().await.unwrap();

        store
            .update_as_leader("jobs", "node-a", 0, LeaderUpdate::Renew)
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let progress = tx.lock_progress("jobs").await.unwrap().unwrap();
        assert_eq!(progress, Progress::new(0, 1));
        tx.install("jobs", "node-b", "node-b-profile", progress.term + 1)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            store.read_record("jobs").await.unwrap(),
            Some(record("node-b", 1))
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_install() {
        let store = memory_store().await;

        let mut tx = store.begin().await.unwrap();
        tx.insert(&record("node-a", 0)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_progress("jobs").await.unwrap();
        tx.install("jobs", "node-b", "", 1).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(
            store.read_leader_id("jobs").await.unwrap().as_deref(),
            Some("node-a")
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let store = memory_store().await;

        let mut tx = store.begin().await.unwrap();
        tx.insert(&record("node-a", 0)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert(&record("node-b", 0)).await.unwrap_err();
        assert!(err.is_conflict(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_conditional_updates_report_rows_affected() {
        let store = memory_store().await;

        let mut tx = store.begin().await.unwrap();
        tx.insert(&record("node-a", 0)).await.unwrap();
        tx.commit().await.unwrap();

        for _ in 0..2 {
            let n = store
                .update_as_leader("jobs", "node-a", 0, LeaderUpdate::Renew)
                .await
                .unwrap();
            assert_eq!(n, 1);
        }
        assert_eq!(
            store.read_progress("jobs").await.unwrap(),
            Some(Progress::new(0, 2))
        );

        let stale = store
            .update_as_leader("jobs", "node-a", 1, LeaderUpdate::Renew)
            .await
            .unwrap();
        assert_eq!(stale, 0);

        let vacated = store
            .update_as_leader("jobs", "node-a", 0, LeaderUpdate::Vacate)
            .await
            .unwrap();
        assert_eq!(vacated, 1);
        assert_eq!(
            store
                .update_as_leader("jobs", "node-a", 0, LeaderUpdate::Renew)
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.read_leader_id("jobs").await.unwrap().as_deref(), Some(""));
    }
}
