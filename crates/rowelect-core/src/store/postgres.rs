//! PostgreSQL implementation of [`ElectionStore`].
//!
//! Claims lock the election row with `SELECT ... FOR UPDATE`. When the row
//! does not exist yet there is nothing to lock, so two first-time claimants
//! may both try to insert; the loser hits the primary key and its error is
//! reported as a conflict.

use super::types::ElectionRow;
use super::{
    ElectionRecord, ElectionStore, ElectionTransaction, LeaderUpdate, Progress, StoreError,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS leader_elections (
        name TEXT NOT NULL PRIMARY KEY,
        leader_id TEXT NOT NULL,
        value TEXT NOT NULL,
        term BIGINT NOT NULL,
        revision BIGINT NOT NULL
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

/// PostgreSQL-backed election store.
#[derive(Debug, Clone)]
pub struct PgElectionStore {
    pool: PgPool,
}

impl PgElectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ElectionStore for PgElectionStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for stmt in [CREATE_TABLE, CREATE_LEADER_INDEX, CREATE_TERM_INDEX] {
            match sqlx::query(stmt).execute(&self.pool).await {
                Ok(_) => {}
                // Concurrent `IF NOT EXISTS` creations can still collide in the
                // catalog; the other session created the object.
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    debug!(error = %db_err, "Schema object created concurrently");
                }
                Err(e) => return Err(StoreError::from(e).into_schema()),
            }
        }
        debug!("PostgreSQL election schema ready");
        Ok(())
    }

    async fn read_progress(&self, name: &str) -> Result<Option<Progress>, StoreError> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT term, revision FROM leader_elections WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(term, revision)| Progress::new(term, revision)))
    }

    async fn read_leader_id(&self, name: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT leader_id FROM leader_elections WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(leader_id,)| leader_id))
    }

    async fn read_record(&self, name: &str) -> Result<Option<ElectionRecord>, StoreError> {
        let row: Option<ElectionRow> = sqlx::query_as(
            "SELECT name, leader_id, value, term, revision FROM leader_elections WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ElectionRecord::from))
    }

    async fn begin(&self) -> Result<Box<dyn ElectionTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgClaim { tx }))
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
                 WHERE name = $1 AND leader_id = $2 AND term = $3"
            }
            LeaderUpdate::Vacate => {
                "UPDATE leader_elections SET leader_id = '' \
                 WHERE name = $1 AND leader_id = $2 AND term = $3"
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

/// Claim transaction on PostgreSQL.
struct PgClaim {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ElectionTransaction for PgClaim {
    async fn lock_progress(&mut self, name: &str) -> Result<Option<Progress>, StoreError> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT term, revision FROM leader_elections WHERE name = $1 FOR UPDATE",
        )
        .bind(name)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(term, revision)| Progress::new(term, revision)))
    }

    async fn insert(&mut self, record: &ElectionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO leader_elections (name, leader_id, value, term, revision)
            VALUES ($1, $2, $3, $4, $5)
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
            SET term = $1, revision = 0, leader_id = $2, value = $3
            WHERE name = $4
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

    // Integration tests that require a real PostgreSQL database.
    // Run with:
    // DATABASE_URL=postgres://... cargo test -p rowelect-core store::postgres -- --ignored

    async fn connect() -> PgElectionStore {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to database");
        let store = PgElectionStore::new(pool);
        store.ensure_schema().await.expect("Failed to ensure schema");
        store
    }

    fn unique_name(prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_ensure_schema_idempotent_integration() {
        let store = connect().await;
        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_claim_and_renew_integration() {
        let store = connect().await;
        let name = unique_name("claim");

        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_progress(&name).await.unwrap().is_none());
        tx.insert(&ElectionRecord {
            name: name.clone(),
            leader_id: "node-a".to_string(),
            value: "a".to_string(),
            term: 0,
            revision: 0,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let renewed = store
            .update_as_leader(&name, "node-a", 0, LeaderUpdate::Renew)
            .await
            .unwrap();
        assert_eq!(renewed, 1);

        let mut tx = store.begin().await.unwrap();
        let progress = tx.lock_progress(&name).await.unwrap().unwrap();
        assert_eq!(progress, Progress::new(0, 1));
        tx.install(&name, "node-b", "b", progress.term + 1).await.unwrap();
        tx.commit().await.unwrap();

        let stale = store
            .update_as_leader(&name, "node-a", 0, LeaderUpdate::Renew)
            .await
            .unwrap();
        assert_eq!(stale, 0);

        let row = store.read_record(&name).await.unwrap().unwrap();
        assert_eq!(row.leader_id, "node-b");
        assert_eq!(row.progress(), Progress::new(1, 0));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_concurrent_first_insert_conflicts_integration() {
        let store = connect().await;
        let name = unique_name("first-insert");
        let record = |leader: &str| ElectionRecord {
            name: name.clone(),
            leader_id: leader.to_string(),
            value: String::new(),
            term: 0,
            revision: 0,
        };
        let record_a = record("node-a");
        let record_b = record("node-b");

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(first.lock_progress(&name).await.unwrap().is_none());
        assert!(second.lock_progress(&name).await.unwrap().is_none());

        first.insert(&record_a).await.unwrap();
        // Blocks on the first transaction's uncommitted key.
        let second_insert = tokio::spawn(async move {
            let result = second.insert(&record_b).await;
            drop(second);
            result
        });
        first.commit().await.unwrap();

        let result = second_insert.await.unwrap();
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(
            store.read_leader_id(&name).await.unwrap().as_deref(),
            Some("node-a")
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL database"]
    async fn test_long_candidate_id_integration() {
        let store = connect().await;
        let name = unique_name("long-id");
        // A maximal hostname plus the pid and uuid suffix.
        let leader_id = format!("{}-4242-{}", "h".repeat(253), uuid::Uuid::new_v4().simple());

        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_progress(&name).await.unwrap().is_none());
        tx.insert(&ElectionRecord {
            name: name.clone(),
            leader_id: leader_id.clone(),
            value: String::new(),
            term: 0,
            revision: 0,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let row = store.read_record(&name).await.unwrap().unwrap();
        assert_eq!(row.leader_id, leader_id);
        assert_eq!(
            store
                .update_as_leader(&name, &leader_id, 0, LeaderUpdate::Renew)
                .await
                .unwrap(),
            1
        );
    }
}
