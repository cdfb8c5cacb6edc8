//! Types for the election coordinator.
//!
//! - `Candidate`: the identity a process campaigns under
//! - `ElectionConfig`: timing configuration for one coordinator
//! - `LeaderInfo`: read-only view of the installed leader

use crate::store::{ElectionRecord, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ElectionError;

/// Identity of a process taking part in an election.
///
/// `id` must be unique among all live candidates and stable for the lifetime
/// of the process. `value` is an opaque payload stored with the leader row,
/// typically an address or profile other processes use to reach the leader.
pub trait Candidate: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn value(&self) -> &str;
}

/// A candidate with fixed id and payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCandidate {
    id: String,
    value: String,
}

impl StaticCandidate {
    pub fn new(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }

    /// Creates a candidate with a freshly generated id.
    pub fn generate(value: impl Into<String>) -> Self {
        Self::new(default_candidate_id(), value)
    }
}

impl Candidate for StaticCandidate {
    fn id(&self) -> &str {
        &self.id
    }

    fn value(&self) -> &str {
        &self.value
    }
}

/// Generates a candidate id from hostname, process ID and a random suffix.
///
/// The suffix keeps ids unique when one process runs several candidates or
/// when a PID is reused after a restart.
pub fn default_candidate_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id();
    format!("{}-{}-{}", hostname, pid, uuid::Uuid::new_v4().simple())
}

/// The installed leader of an election as last read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderInfo {
    /// Candidate id of the leader.
    pub leader_id: String,
    /// Payload the leader published with its claim.
    pub value: String,
    /// Term the leader was installed for.
    pub term: i64,
    /// Number of renewals the leader has made in this term.
    pub revision: i64,
}

impl LeaderInfo {
    /// Builds a view from a row, or `None` if the seat is vacant.
    pub fn from_record(record: ElectionRecord) -> Option<Self> {
        if record.is_vacant() {
            return None;
        }
        Some(Self {
            leader_id: record.leader_id,
            value: record.value,
            term: record.term,
            revision: record.revision,
        })
    }
}

pub const ENV_POLL_INTERVAL: &str = "ROWELECT_POLL_INTERVAL";
pub const ENV_LEASE_DURATION: &str = "ROWELECT_LEASE_DURATION";
pub const ENV_RENEW_INTERVAL: &str = "ROWELECT_RENEW_INTERVAL";

/// Timing configuration for an election coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// How often a campaigning candidate re-checks the election row.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How long a leader may go without a renewal before observers presume it
    /// dead.
    #[serde(with = "humantime_serde")]
    pub lease_duration: Duration,

    /// How often the leader renews its lease.
    ///
    /// Must be shorter than `lease_duration`.
    #[serde(with = "humantime_serde")]
    pub renew_interval: Duration,

    /// Retry policy for creating the schema at start-up.
    pub init_retry: RetryConfig,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lease_duration: Duration::from_secs(5),
            renew_interval: Duration::from_secs(1),
            init_retry: RetryConfig::default(),
        }
    }
}

impl ElectionConfig {
    /// Sets the campaign poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the lease duration.
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    /// Sets the renewal interval.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Sets the schema-ensure retry policy.
    pub fn with_init_retry(mut self, retry: RetryConfig) -> Self {
        self.init_retry = retry;
        self
    }

    /// Builds a configuration from the `ROWELECT_*` environment variables.
    ///
    /// Durations use humantime syntax (`"750ms"`, `"5s"`). Unset variables
    /// keep their defaults; unparsable ones are rejected.
    pub fn from_env() -> Result<Self, ElectionError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ElectionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, fallback: Duration| -> Result<Duration, ElectionError> {
            match lookup(key) {
                Some(raw) => humantime::parse_duration(raw.trim()).map_err(|e| {
                    ElectionError::invalid_config(format!("{} = {:?}: {}", key, raw, e))
                }),
                None => Ok(fallback),
            }
        };

        let defaults = Self::default();
        let config = Self {
            poll_interval: parse(ENV_POLL_INTERVAL, defaults.poll_interval)?,
            lease_duration: parse(ENV_LEASE_DURATION, defaults.lease_duration)?,
            renew_interval: parse(ENV_RENEW_INTERVAL, defaults.renew_interval)?,
            init_retry: defaults.init_retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.poll_interval.is_zero() {
            return Err(ElectionError::invalid_config(
                "poll_interval must be greater than zero",
            ));
        }

        if self.lease_duration.is_zero() {
            return Err(ElectionError::invalid_config(
                "lease_duration must be greater than zero",
            ));
        }

        if self.renew_interval.is_zero() {
            return Err(ElectionError::invalid_config(
                "renew_interval must be greater than zero",
            ));
        }

        if self.renew_interval >= self.lease_duration {
            return Err(ElectionError::invalid_config(format!(
                "renew_interval ({:?}) must be shorter than lease_duration ({:?})",
                self.renew_interval, self.lease_duration
            )));
        }

        Ok(())
    }
}
