//! Store error types.

use thiserror::Error;

/// Errors raised by an [`ElectionStore`](super::ElectionStore) backend.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A statement failed.
    #[error("Query error: {0}")]
    Query(String),

    /// The transaction lost a race with another writer (lock conflict,
    /// serialization failure, duplicate first insert).
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// The election table could not be created.
    #[error("Schema error: {0}")]
    Schema(String),

    /// No connection became available in time.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Invalid store configuration.
    #[error("Invalid store configuration: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Creates a `Connection` error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a `Query` error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Creates a `Conflict` error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a `Schema` error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Reclassifies a failed DDL statement as a schema error. Connectivity
    /// and lock errors keep their kind so they stay retryable.
    pub(crate) fn into_schema(self) -> Self {
        match self {
            Self::Query(message) => Self::Schema(message),
            other => other,
        }
    }

    /// Returns `true` if this error means another writer won the race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PoolExhausted | Self::Conflict(_) => true,
            Self::Connection(msg) | Self::Query(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("connection refused")
                    || msg.contains("connection reset")
                    || msg.contains("broken pipe")
                    || msg.contains("temporarily unavailable")
                    || msg.contains("database is locked")
            }
            Self::Schema(_) | Self::Configuration(_) => false,
        }
    }
}

/// SQLSTATE codes Postgres reports for serialization failures and deadlocks.
#[cfg(feature = "database")]
const PG_RACE_CODES: [&str; 2] = ["40001", "40P01"];

/// SQLite result codes for `SQLITE_BUSY`, `SQLITE_LOCKED` and their extended forms.
#[cfg(feature = "database")]
const SQLITE_RACE_CODES: [&str; 6] = ["5", "6", "261", "262", "517", "773"];

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                let message = db_err.message().to_string();
                let lowered = message.to_lowercase();
                let busy = lowered.contains("is locked") || lowered.contains("busy");

                if db_err.is_unique_violation()
                    || PG_RACE_CODES.contains(&code.as_str())
                    || SQLITE_RACE_CODES.contains(&code.as_str())
                    || busy
                {
                    StoreError::Conflict(message)
                } else {
                    StoreError::Query(message)
                }
            }
            sqlx::Error::PoolTimedOut => StoreError::PoolExhausted,
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(err.to_string()),
            sqlx::Error::Configuration(msg) => StoreError::Configuration(msg.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_race() {
        let err = StoreError::conflict("could not serialize access");
        assert!(err.is_conflict());
        assert!(err.is_transient());
        assert!(err.to_string().contains("could not serialize access"));
    }

    #[test]
    fn test_connection_transient_by_message() {
        assert!(StoreError::connection("connection refused").is_transient());
        assert!(StoreError::connection("operation timed out").is_transient());
        assert!(!StoreError::connection("authentication failed").is_transient());
    }

    #[test]
    fn test_schema_and_configuration_are_fatal() {
        assert!(!StoreError::schema("permission denied").is_transient());
        assert!(!StoreError::Configuration("bad url".to_string()).is_transient());
        assert!(!StoreError::schema("x").is_conflict());
    }

    #[test]
    fn test_into_schema_keeps_transient_kinds() {
        assert!(matches!(
            StoreError::query("syntax error").into_schema(),
            StoreError::Schema(_)
        ));
        assert!(matches!(
            StoreError::connection("connection reset").into_schema(),
            StoreError::Connection(_)
        ));
        assert!(StoreError::conflict("database is locked")
            .into_schema()
            .is_conflict());
    }

    #[test]
    fn test_pool_exhausted_is_transient() {
        assert!(StoreError::PoolExhausted.is_transient());
        assert!(!StoreError::PoolExhausted.is_conflict());
    }

    #[cfg(feature = "database")]
    #[test]
    fn test_from_sqlx_pool_errors() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::PoolExhausted
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::Connection(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }
}
