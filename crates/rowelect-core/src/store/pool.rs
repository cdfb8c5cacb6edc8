//! Connection pool setup and backend selection.

use super::{ElectionStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

const ENV_MAX_CONNECTIONS: &str = "ROWELECT_DATABASE_MAX_CONNECTIONS";
const ENV_MIN_CONNECTIONS: &str = "ROWELECT_DATABASE_MIN_CONNECTIONS";
const ENV_ACQUIRE_TIMEOUT_SECS: &str = "ROWELECT_DATABASE_ACQUIRE_TIMEOUT_SECS";

/// Options for the connection pool behind a SQL-backed store.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Maximum time to wait for a connection.
    pub acquire_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Idle timeout for connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl PoolOptions {
    /// Builds options from `ROWELECT_DATABASE_*` values. Missing or
    /// unparsable values keep their defaults.
    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str| lookup(key).and_then(|raw| raw.trim().parse::<u32>().ok());

        // A candidate needs one connection for the campaign loop and one for
        // the renewal task; a little headroom covers leader() queries.
        let max_connections = parse(ENV_MAX_CONNECTIONS).unwrap_or(4);
        let min_connections = parse(ENV_MIN_CONNECTIONS).unwrap_or(1);
        let acquire_timeout_secs = parse(ENV_ACQUIRE_TIMEOUT_SECS).unwrap_or(30);

        Self {
            max_connections,
            min_connections,
            acquire_timeout: Duration::from_secs(u64::from(acquire_timeout_secs)),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }

    /// Pins the pool to a single connection that is never recycled.
    ///
    /// Required for in-memory SQLite, where every connection would otherwise
    /// open its own private database.
    pub fn single_connection(mut self) -> Self {
        self.max_connections = 1;
        self.min_connections = 1;
        self.max_lifetime = None;
        self.idle_timeout = None;
        self
    }
}

#[cfg_attr(not(feature = "database"), allow(dead_code))]
fn is_in_memory_sqlite(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Connects to the store named by `database_url`.
///
/// The URL scheme selects the backend:
/// - `sqlite:` for SQLite (the database file is created if missing)
/// - `postgres://` or `postgresql://` for PostgreSQL
pub async fn connect_store(database_url: &str) -> Result<Arc<dyn ElectionStore>, StoreError> {
    connect_store_with_options(database_url, PoolOptions::default()).await
}

/// Connects to the store named by `database_url` with explicit pool options.
#[cfg(feature = "database")]
pub async fn connect_store_with_options(
    database_url: &str,
    options: PoolOptions,
) -> Result<Arc<dyn ElectionStore>, StoreError> {
    use super::{PgElectionStore, SqliteElectionStore};
    use sqlx::sqlite::SqliteConnectOptions;
    use std::str::FromStr;
    use tracing::info;

    if database_url.starts_with("sqlite:") {
        let options = if is_in_memory_sqlite(database_url) {
            options.single_connection()
        } else {
            options
        };
        info!(
            max_connections = options.max_connections,
            "Creating SQLite election store"
        );
        let connect = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .acquire_timeout(options.acquire_timeout)
            .max_lifetime(options.max_lifetime)
            .idle_timeout(options.idle_timeout)
            .connect_with(connect)
            .await?;
        Ok(Arc::new(SqliteElectionStore::new(pool)))
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        info!(
            max_connections = options.max_connections,
            "Creating PostgreSQL election store"
        );
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .acquire_timeout(options.acquire_timeout)
            .max_lifetime(options.max_lifetime)
            .idle_timeout(options.idle_timeout)
            .connect(database_url)
            .await?;
        Ok(Arc::new(PgElectionStore::new(pool)))
    } else {
        Err(StoreError::Configuration(format!(
            "Unsupported database URL scheme. Expected sqlite: or postgres://, got: {}",
            database_url.split(':').next().unwrap_or("unknown")
        )))
    }
}

#[cfg(not(feature = "database"))]
pub async fn connect_store_with_options(
    _database_url: &str,
    _options: PoolOptions,
) -> Result<Arc<dyn ElectionStore>, StoreError> {
    Err(StoreError::Configuration(
        "Database support not enabled. Compile with --features database".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_connection() {
        let opts = PoolOptions {
            max_connections: 8,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            max_lifetime: Some(Duration::from_secs(60)),
            idle_timeout: Some(Duration::from_secs(60)),
        }
        .single_connection();

        assert_eq!(opts.max_connections, 1);
        assert_eq!(opts.min_connections, 1);
        assert!(opts.max_lifetime.is_none());
        assert!(opts.idle_timeout.is_none());
    }

    #[test]
    fn test_options_from_lookup() {
        let opts = PoolOptions::from_lookup(|key| match key {
            ENV_MAX_CONNECTIONS => Some("12".to_string()),
            ENV_ACQUIRE_TIMEOUT_SECS => Some(" 7 ".to_string()),
            _ => None,
        });
        assert_eq!(opts.max_connections, 12);
        assert_eq!(opts.min_connections, 1);
        assert_eq!(opts.acquire_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_out_of_range_values_keep_defaults() {
        let opts = PoolOptions::from_lookup(|key| match key {
            // 2^32 + 1 would wrap to 1 if truncated.
            ENV_MAX_CONNECTIONS => Some("4294967297".to_string()),
            ENV_MIN_CONNECTIONS => Some("-3".to_string()),
            _ => None,
        });
        assert_eq!(opts.max_connections, 4);
        assert_eq!(opts.min_connections, 1);
    }

    #[test]
    fn test_in_memory_detection() {
        assert!(is_in_memory_sqlite("sqlite::memory:"));
        assert!(is_in_memory_sqlite("sqlite:file:elect?mode=memory&cache=shared"));
        assert!(!is_in_memory_sqlite("sqlite:///var/lib/rowelect/elect.db"));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = connect_store("mysql://root@localhost/test")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[cfg(feature = "database")]
    #[tokio::test]
    async fn test_connect_in_memory_sqlite() {
        let store = connect_store("sqlite::memory:").await.unwrap();
        store.ensure_schema().await.unwrap();
        assert!(store.read_progress("jobs").await.unwrap().is_none());
    }

    #[cfg(feature = "database")]
    #[tokio::test]
    async fn test_connect_creates_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elect.db");
        let url = format!("sqlite://{}", path.display());

        let store = connect_store(&url).await.unwrap();
        store.ensure_schema().await.unwrap();
        assert!(path.exists());
    }
}
