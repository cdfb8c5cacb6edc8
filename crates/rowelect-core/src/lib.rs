//! # rowelect-core
//!
//! Leader election for processes that share nothing but a SQL database.
//!
//! Every named election lives in one row of the `leader_elections` table.
//! Candidates claim the row in a transaction, keep it alive with conditional
//! writes and detect a dead leader when its row stops changing for a whole
//! lease. See [`election`] for the protocol and [`store`] for the backends.

pub mod election;
pub mod store;

pub use election::{
    default_candidate_id, Candidate, Election, ElectionConfig, ElectionError, LeaderInfo,
    RenewalOutcome, StaticCandidate,
};
pub use store::{
    connect_store, connect_store_with_options, ElectionRecord, ElectionStore,
    ElectionTransaction, MockElectionStore, PoolOptions, Progress, RetryConfig, StoreError,
};

#[cfg(feature = "database")]
pub use store::{PgElectionStore, SqliteElectionStore};
