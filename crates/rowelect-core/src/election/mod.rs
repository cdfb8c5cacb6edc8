//! Leader election over a single row of a shared SQL table.
//!
//! Each named election is one row `(name, leader_id, value, term, revision)`.
//! Candidates never talk to each other; everything they know about one
//! another comes from that row.
//!
//! - A claim is a transaction that locks the row, bumps `term`, resets
//!   `revision` and installs the claimant. Only one of several concurrent
//!   claims can commit for a given term.
//! - The leader proves liveness by incrementing `revision` for its term
//!   (a proclaim). The write is guarded by `(name, leader_id, term)`, so a
//!   deposed leader finds out the first time it writes.
//! - Observers cache the last `(term, revision)` they saw and when. If neither
//!   moves for a whole lease, the leader is presumed dead and anyone may
//!   claim.
//!
//! # Example
//!
//! ```ignore
//! let store = connect_store("sqlite://elections.db").await?;
//! let mut election = Election::new(store, "scheduler", StaticCandidate::generate("10.0.0.7:9000"))?;
//! election.init().await?;
//! election.campaign().await?;
//! // ... lead, while the renewal task keeps the lease fresh ...
//! election.resign().await?;
//! ```

mod error;
mod renewal;
mod types;

pub use error::ElectionError;
pub use renewal::RenewalOutcome;
pub use types::{
    default_candidate_id, Candidate, ElectionConfig, LeaderInfo, StaticCandidate,
    ENV_LEASE_DURATION, ENV_POLL_INTERVAL, ENV_RENEW_INTERVAL,
};

use crate::store::{
    with_retry, ElectionRecord, ElectionStore, ElectionTransaction, Progress, StoreError,
};
use renewal::{spawn_renewal, Tenure};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// The last `(term, revision)` this candidate read and when it first saw it.
#[derive(Debug, Clone, Copy)]
struct Observation {
    progress: Progress,
    since: Instant,
}

/// A term this candidate claimed, with its renewal task.
struct Leadership {
    tenure: Tenure,
    resigned: Arc<AtomicBool>,
    renewal: Option<JoinHandle<RenewalOutcome>>,
    outcome: Option<RenewalOutcome>,
}

impl Leadership {
    fn is_active(&self) -> bool {
        !self.resigned.load(Ordering::SeqCst)
            && self.outcome.is_none()
            && self.renewal.as_ref().map_or(true, |h| !h.is_finished())
    }
}

/// One candidate's view of one named election.
///
/// Not shared between tasks: campaign from a single task and hand out the
/// leader payload through your own channels. The renewal task runs on its own
/// and is stopped by [`resign`](Self::resign) or by dropping the coordinator.
pub struct Election {
    store: Arc<dyn ElectionStore>,
    name: String,
    candidate: Arc<dyn Candidate>,
    config: ElectionConfig,
    observed: Option<Observation>,
    leadership: Option<Leadership>,
}

impl fmt::Debug for Election {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Election")
            .field("name", &self.name)
            .field("candidate_id", &self.candidate.id())
            .field("config", &self.config)
            .field("observed", &self.observed)
            .field("term", &self.term())
            .field("is_leader", &self.is_leader())
            .finish()
    }
}

impl Election {
    /// Creates a coordinator with the default [`ElectionConfig`].
    ///
    /// Fails if the election name or the candidate id is empty. An empty id
    /// is how the store marks a vacant seat, so it cannot identify a leader.
    pub fn new(
        store: Arc<dyn ElectionStore>,
        name: impl Into<String>,
        candidate: impl Candidate,
    ) -> Result<Self, ElectionError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ElectionError::invalid_config(
                "election name must not be empty",
            ));
        }
        if candidate.id().is_empty() {
            return Err(ElectionError::invalid_config(
                "candidate id must not be empty",
            ));
        }

        Ok(Self {
            store,
            name,
            candidate: Arc::new(candidate),
            config: ElectionConfig::default(),
            observed: None,
            leadership: None,
        })
    }

    /// Replaces the timing configuration.
    pub fn with_config(mut self, config: ElectionConfig) -> Result<Self, ElectionError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Returns the election name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns this candidate's id.
    pub fn candidate_id(&self) -> &str {
        self.candidate.id()
    }

    /// Returns the timing configuration.
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Ensures the election table exists.
    ///
    /// Idempotent. Transient store failures are retried according to
    /// `config.init_retry`.
    pub async fn init(&self) -> Result<(), ElectionError> {
        let store = self.store.as_ref();
        with_retry(&self.config.init_retry, "ensure_schema", move || {
            store.ensure_schema()
        })
        .await?;

        info!(election = %self.name, "Election schema ready");
        Ok(())
    }

    /// Blocks until this candidate holds the election, then starts lease
    /// renewal and returns `Ok(true)`.
    ///
    /// Every `poll_interval` the row is checked; a claim is attempted when the
    /// current leader has timed out or the seat is vacant. Lost claim races
    /// are retried on the next poll. Any other store failure during a claim is
    /// returned.
    #[instrument(skip(self), fields(election = %self.name, candidate = %self.candidate.id()))]
    pub async fn campaign(&mut self) -> Result<bool, ElectionError> {
        if self.is_leader() {
            self.start_renewal();
            return Ok(true);
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.is_leader_timeout().await || self.is_leader_vacant().await {
                if self.try_to_be_leader().await? {
                    break;
                }
            } else {
                debug!("Election has a live leader, waiting");
            }
        }

        self.start_renewal();
        Ok(true)
    }

    /// Reports whether the installed leader has gone a whole lease without
    /// progress.
    ///
    /// Reads `(term, revision)` and compares it with the cached observation.
    /// Any change is adopted with the current time and reported as not timed
    /// out. Read failures and a missing row also report `false`; vacancy is
    /// detected separately.
    pub async fn is_leader_timeout(&mut self) -> bool {
        let progress = match self.store.read_progress(&self.name).await {
            Ok(Some(progress)) => progress,
            Ok(None) => {
                debug!(election = %self.name, "Election row does not exist yet");
                return false;
            }
            Err(e) => {
                warn!(
                    election = %self.name,
                    error = %e,
                    "Failed to read election progress"
                );
                return false;
            }
        };

        let now = Instant::now();
        match self.observed {
            Some(seen) if seen.progress == progress => {
                let timed_out = now >= seen.since + self.config.lease_duration;
                if timed_out {
                    debug!(
                        election = %self.name,
                        term = progress.term,
                        revision = progress.revision,
                        "Leader made no progress within the lease"
                    );
                }
                timed_out
            }
            previous => {
                if let Some(seen) = previous {
                    if seen.progress.term != progress.term {
                        debug!(
                            election = %self.name,
                            from = seen.progress.term,
                            to = progress.term,
                            "Observed new term"
                        );
                    }
                }
                self.observed = Some(Observation {
                    progress,
                    since: now,
                });
                false
            }
        }
    }

    /// Attempts a single claim.
    ///
    /// Returns `Ok(true)` if this candidate now holds a fresh term, `Ok(false)`
    /// if another writer won the race. Does not start lease renewal; use
    /// [`campaign`](Self::campaign) for that.
    #[instrument(skip(self), fields(election = %self.name, candidate = %self.candidate.id()))]
    pub async fn try_to_be_leader(&mut self) -> Result<bool, ElectionError> {
        match self.claim().await {
            Ok(term) => {
                self.install(term);
                info!(term, "Claimed leadership");
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                debug!(error = %e, "Lost claim race");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Increments the revision of the held term.
    ///
    /// Fails with [`ElectionError::NotLeader`] if the write matched no row:
    /// another candidate claimed a newer term, this candidate resigned, or it
    /// never held the election.
    pub async fn proclaim(&self) -> Result<(), ElectionError> {
        match &self.leadership {
            Some(leadership) => leadership.tenure.proclaim(self.store.as_ref()).await,
            None => Err(ElectionError::not_leader(&self.name, None)),
        }
    }

    /// Gives up the held term.
    ///
    /// Clears `leader_id` if this candidate still owns the row, then stops the
    /// renewal task. The term number stays in place, so the next claimant
    /// gets `term + 1`. The renewal task is stopped even when the store write
    /// fails; that error is still returned.
    #[instrument(skip(self), fields(election = %self.name, candidate = %self.candidate.id()))]
    pub async fn resign(&mut self) -> Result<(), ElectionError> {
        let Some(leadership) = self.leadership.as_ref() else {
            debug!("Nothing to resign, no term was claimed");
            return Ok(());
        };

        let vacated = leadership.tenure.vacate(self.store.as_ref()).await;
        leadership.resigned.store(true, Ordering::SeqCst);

        match vacated {
            Ok(true) => info!(term = leadership.tenure.term, "Resigned leadership"),
            Ok(false) => debug!(
                term = leadership.tenure.term,
                "Resigned, but the term was already lost"
            ),
            Err(e) => {
                warn!(error = %e, "Failed to vacate election row while resigning");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Reads the installed leader, or `None` if the seat is vacant or the
    /// election has never been claimed.
    pub async fn leader(&self) -> Result<Option<LeaderInfo>, ElectionError> {
        let record = self.store.read_record(&self.name).await?;
        Ok(record.and_then(LeaderInfo::from_record))
    }

    /// Returns `true` while this candidate holds a term it has not resigned
    /// and whose renewal task is still running.
    ///
    /// This is local knowledge only. Use [`leader`](Self::leader) to see what
    /// the store says.
    pub fn is_leader(&self) -> bool {
        self.leadership.as_ref().is_some_and(Leadership::is_active)
    }

    /// Returns the term this candidate last claimed.
    pub fn term(&self) -> Option<i64> {
        self.leadership.as_ref().map(|l| l.tenure.term)
    }

    /// Waits for the renewal task of the held term to stop and reports why.
    ///
    /// Returns `None` if no renewal task was started. Calling it again after
    /// the task ended returns the same outcome.
    pub async fn wait_for_renewal_end(&mut self) -> Option<RenewalOutcome> {
        let leadership = self.leadership.as_mut()?;
        if let Some(outcome) = leadership.outcome {
            return Some(outcome);
        }

        let handle = leadership.renewal.take()?;
        match handle.await {
            Ok(outcome) => {
                leadership.outcome = Some(outcome);
                Some(outcome)
            }
            Err(e) => {
                warn!(
                    election = %self.name,
                    error = %e,
                    "Lease renewal task did not finish cleanly"
                );
                let outcome = RenewalOutcome::Expired {
                    term: leadership.tenure.term,
                };
                leadership.outcome = Some(outcome);
                Some(outcome)
            }
        }
    }

    async fn is_leader_vacant(&self) -> bool {
        match self.store.read_leader_id(&self.name).await {
            Ok(Some(leader_id)) => leader_id.is_empty(),
            Ok(None) => true,
            Err(e) => {
                warn!(
                    election = %self.name,
                    error = %e,
                    "Failed to read election leader"
                );
                true
            }
        }
    }

    /// Runs the claim transaction and returns the claimed term.
    ///
    /// A failed step rolls the transaction back before the error is returned.
    async fn claim(&self) -> Result<i64, StoreError> {
        let mut tx = self.store.begin().await?;

        match self.stage_claim(tx.as_mut()).await {
            Ok(term) => {
                tx.commit().await?;
                Ok(term)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    debug!(
                        election = %self.name,
                        error = %rollback_err,
                        "Failed to roll back claim transaction"
                    );
                }
                Err(e)
            }
        }
    }

    /// Writes this candidate into the locked row and returns the new term.
    async fn stage_claim(&self, tx: &mut dyn ElectionTransaction) -> Result<i64, StoreError> {
        match tx.lock_progress(&self.name).await? {
            None => {
                tx.insert(&ElectionRecord {
                    name: self.name.clone(),
                    leader_id: self.candidate.id().to_string(),
                    value: self.candidate.value().to_string(),
                    term: 0,
                    revision: 0,
                })
                .await?;
                Ok(0)
            }
            Some(progress) => {
                let term = progress.term + 1;
                tx.install(
                    &self.name,
                    self.candidate.id(),
                    self.candidate.value(),
                    term,
                )
                .await?;
                Ok(term)
            }
        }
    }

    fn install(&mut self, term: i64) {
        if let Some(previous) = self.leadership.take() {
            previous.resigned.store(true, Ordering::SeqCst);
        }

        self.leadership = Some(Leadership {
            tenure: Tenure {
                election: self.name.clone(),
                candidate_id: self.candidate.id().to_string(),
                term,
            },
            resigned: Arc::new(AtomicBool::new(false)),
            renewal: None,
            outcome: None,
        });
        self.observed = Some(Observation {
            progress: Progress::new(term, 0),
            since: Instant::now(),
        });
    }

    fn start_renewal(&mut self) {
        let Some(leadership) = self.leadership.as_mut() else {
            return;
        };
        if leadership.renewal.is_some() || leadership.outcome.is_some() {
            return;
        }

        leadership.renewal = Some(spawn_renewal(
            Arc::clone(&self.store),
            leadership.tenure.clone(),
            Arc::clone(&leadership.resigned),
            self.config.renew_interval,
            self.config.lease_duration,
        ));
    }
}

impl Drop for Election {
    fn drop(&mut self) {
        if let Some(leadership) = &self.leadership {
            leadership.resigned.store(true, Ordering::SeqCst);
        }
    }
}
