//! Row types shared by every store backend.

use serde::{Deserialize, Serialize};

/// Table holding one row per election.
pub const ELECTION_TABLE: &str = "leader_elections";

/// Durable state of one named election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionRecord {
    /// Election identifier (primary key).
    pub name: String,
    /// Candidate currently installed as leader. Empty when vacant.
    pub leader_id: String,
    /// Opaque payload supplied by the leader.
    pub value: String,
    /// Leadership epoch, advanced by every successful claim.
    pub term: i64,
    /// Renewal counter within the term, reset to 0 on each claim.
    pub revision: i64,
}

impl ElectionRecord {
    /// Returns `true` if no candidate is installed.
    pub fn is_vacant(&self) -> bool {
        self.leader_id.is_empty()
    }

    /// The `(term, revision)` pair observers use for liveness checks.
    pub fn progress(&self) -> Progress {
        Progress {
            term: self.term,
            revision: self.revision,
        }
    }
}

/// An election row as decoded by SQLx, shared by the SQL backends.
#[cfg(feature = "database")]
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ElectionRow {
    name: String,
    leader_id: String,
    value: String,
    term: i64,
    revision: i64,
}

#[cfg(feature = "database")]
impl From<ElectionRow> for ElectionRecord {
    fn from(row: ElectionRow) -> Self {
        Self {
            name: row.name,
            leader_id: row.leader_id,
            value: row.value,
            term: row.term,
            revision: row.revision,
        }
    }
}

/// The liveness counters of an election row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Progress {
    pub term: i64,
    pub revision: i64,
}

impl Progress {
    pub fn new(term: i64, revision: i64) -> Self {
        Self { term, revision }
    }
}

/// Conditional writes a sitting leader may apply to its own row.
///
/// Both are guarded by `(name, leader_id, term)`; a stale leader matches
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderUpdate {
    /// `revision = revision + 1`.
    Renew,
    /// `leader_id = ''`.
    Vacate,
}
