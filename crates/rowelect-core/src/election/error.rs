//! Error types for the election coordinator.

use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by [`Election`](super::Election) operations.
///
/// Losing a claim race is not represented here: the campaign loop treats it as
/// an ordinary "not this round" outcome.
#[derive(Error, Debug, Clone)]
pub enum ElectionError {
    /// The conditional write matched no row: another candidate owns the
    /// election, or this candidate resigned.
    #[error("Not the leader of election '{election}'")]
    NotLeader {
        /// The election that was written to.
        election: String,
        /// The term this candidate believed it held, if it ever held one.
        term: Option<i64>,
    },

    /// The coordinator was built with unusable settings.
    #[error("Invalid election configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        message: String,
    },

    /// The store failed in a way the protocol cannot absorb.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ElectionError {
    /// Creates a `NotLeader` error.
    pub fn not_leader(election: impl Into<String>, term: impl Into<Option<i64>>) -> Self {
        Self::NotLeader {
            election: election.into(),
            term: term.into(),
        }
    }

    /// Creates an `InvalidConfig` error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` if this is the not-leader signal.
    pub fn is_not_leader(&self) -> bool {
        matches!(self, Self::NotLeader { .. })
    }

    /// Returns `true` if the error came from the store.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_leader_error() {
        let err = ElectionError::not_leader("scheduler", 5);
        assert!(err.is_not_leader());
        assert!(!err.is_store());
        assert!(err.to_string().contains("scheduler"));
        assert!(matches!(err, ElectionError::NotLeader { term: Some(5), .. }));

        let never_claimed = ElectionError::not_leader("scheduler", None);
        assert!(matches!(never_claimed, ElectionError::NotLeader { term: None, .. }));
    }

    #[test]
    fn test_invalid_config_error() {
        let err = ElectionError::invalid_config("lease_duration must be greater than zero");
        assert!(!err.is_not_leader());
        assert!(err.to_string().contains("lease_duration"));
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: ElectionError = StoreError::schema("permission denied").into();
        assert!(err.is_store());
        assert_eq!(err.to_string(), "Schema error: permission denied");
    }
}
