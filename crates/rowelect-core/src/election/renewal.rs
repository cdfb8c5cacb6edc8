//! Background lease renewal.
//!
//! Once a candidate has claimed a term, a renewal task proclaims on its behalf
//! every `renew_interval` so observers see the revision move and never presume
//! the leader dead. The task ends on its own when the leader resigns, when a
//! proclaim finds that another candidate owns the row, or when the store has
//! refused every renewal for a whole lease.

use super::ElectionError;
use crate::store::{ElectionStore, LeaderUpdate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Why a renewal task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// The leader resigned or its coordinator was dropped.
    Resigned,
    /// A proclaim matched no row: the seat now belongs to someone else, or
    /// was vacated out from under this leader.
    NotLeader {
        /// The term that was lost.
        term: i64,
    },
    /// No renewal succeeded for a whole lease. Other candidates may already
    /// have taken over.
    Expired {
        /// The term that lapsed.
        term: i64,
    },
}

impl RenewalOutcome {
    /// Returns `true` if leadership ended without the leader asking for it.
    pub fn is_lost(&self) -> bool {
        !matches!(self, Self::Resigned)
    }
}

/// The `(election, candidate, term)` triple every leader write is guarded by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Tenure {
    pub(crate) election: String,
    pub(crate) candidate_id: String,
    pub(crate) term: i64,
}

impl Tenure {
    /// Bumps the revision of the held term.
    pub(crate) async fn proclaim(&self, store: &dyn ElectionStore) -> Result<(), ElectionError> {
        let affected = store
            .update_as_leader(
                &self.election,
                &self.candidate_id,
                self.term,
                LeaderUpdate::Renew,
            )
            .await?;

        if affected == 0 {
            return Err(ElectionError::not_leader(&self.election, self.term));
        }
        Ok(())
    }

    /// Clears the leader id of the held term.
    ///
    /// Returns `false` if the row no longer belonged to this tenure.
    pub(crate) async fn vacate(&self, store: &dyn ElectionStore) -> Result<bool, ElectionError> {
        let affected = store
            .update_as_leader(
                &self.election,
                &self.candidate_id,
                self.term,
                LeaderUpdate::Vacate,
            )
            .await?;
        Ok(affected > 0)
    }
}

/// Spawns the renewal task for `tenure`.
///
/// The first proclaim happens immediately. Raising `resigned` stops the task
/// before its next proclaim.
pub(crate) fn spawn_renewal(
    store: Arc<dyn ElectionStore>,
    tenure: Tenure,
    resigned: Arc<AtomicBool>,
    renew_interval: Duration,
    lease_duration: Duration,
) -> JoinHandle<RenewalOutcome> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(renew_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_renewed = Instant::now();

        info!(
            election = %tenure.election,
            candidate = %tenure.candidate_id,
            term = tenure.term,
            interval_ms = renew_interval.as_millis() as u64,
            "Starting lease renewal task"
        );

        loop {
            interval.tick().await;

            if resigned.load(Ordering::SeqCst) {
                info!(
                    election = %tenure.election,
                    term = tenure.term,
                    "Lease renewal task stopping after resignation"
                );
                return RenewalOutcome::Resigned;
            }

            match tenure.proclaim(store.as_ref()).await {
                Ok(()) => {
                    last_renewed = Instant::now();
                    debug!(election = %tenure.election, term = tenure.term, "Lease renewed");
                }
                Err(e) if e.is_not_leader() => {
                    // A resign that landed while this proclaim was in flight
                    // vacates the row under it.
                    if resigned.load(Ordering::SeqCst) {
                        info!(
                            election = %tenure.election,
                            term = tenure.term,
                            "Lease renewal task stopping after resignation"
                        );
                        return RenewalOutcome::Resigned;
                    }
                    warn!(
                        election = %tenure.election,
                        candidate = %tenure.candidate_id,
                        term = tenure.term,
                        "Lost leadership, stopping lease renewal"
                    );
                    return RenewalOutcome::NotLeader { term: tenure.term };
                }
                Err(e) => {
                    warn!(
                        election = %tenure.election,
                        term = tenure.term,
                        error = %e,
                        "Failed to renew lease"
                    );
                    if last_renewed.elapsed() >= lease_duration {
                        error!(
                            election = %tenure.election,
                            term = tenure.term,
                            lease_ms = lease_duration.as_millis() as u64,
                            "No renewal succeeded within the lease, giving up leadership"
                        );
                        return RenewalOutcome::Expired { term: tenure.term };
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ElectionRecord, MockElectionStore, Progress};

    fn tenure(term: i64) -> Tenure {
        Tenure {
            election: "jobs".to_string(),
            candidate_id: "node-a".to_string(),
            term,
        }
    }

    async fn seeded_store(term: i64) -> MockElectionStore {
        let store = MockElectionStore::new();
        store
            .put_record(ElectionRecord {
                name: "jobs".to_string(),
                leader_id: "node-a".to_string(),
                value: String::new(),
                term,
                revision: 0,
            })
            .await;
        store
    }

    #[tokio::test]
    async fn test_proclaim_and_vacate() {
        let store = seeded_store(3).await;

        tenure(3).proclaim(&store).await.unwrap();
        tenure(3).proclaim(&store).await.unwrap();
        assert_eq!(
            store.read_progress("jobs").await.unwrap(),
            Some(Progress::new(3, 2))
        );

        let err = tenure(2).proclaim(&store).await.unwrap_err();
        assert!(matches!(err, ElectionError::NotLeader { term: Some(2), .. }));

        assert!(tenure(3).vacate(&store).await.unwrap());
        assert!(!tenure(3).vacate(&store).await.unwrap());
        assert!(tenure(3).proclaim(&store).await.unwrap_err().is_not_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_advances_revision_until_resigned() {
        let store = seeded_store(0).await;
        let resigned = Arc::new(AtomicBool::new(false));
        let handle = spawn_renewal(
            Arc::new(store.clone()),
            tenure(0),
            Arc::clone(&resigned),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );

        // Ticks at 0s, 1s and 2s.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let progress = store.read_progress("jobs").await.unwrap().unwrap();
        assert_eq!(progress, Progress::new(0, 3));

        resigned.store(true, Ordering::SeqCst);
        assert_eq!(handle.await.unwrap(), RenewalOutcome::Resigned);

        let after = store.read_progress("jobs").await.unwrap().unwrap();
        assert_eq!(after, progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_stops_when_term_is_taken() {
        let store = seeded_store(5).await;
        let handle = spawn_renewal(
            Arc::new(store.clone()),
            tenure(5),
            Arc::new(AtomicBool::new(false)),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;

        store
            .put_record(ElectionRecord {
                name: "jobs".to_string(),
                leader_id: "node-b".to_string(),
                value: String::new(),
                term: 6,
                revision: 0,
            })
            .await;

        let outcome = handle.await.unwrap();
        assert_eq!(outcome, RenewalOutcome::NotLeader { term: 5 });
        assert!(outcome.is_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_expires_after_a_lease_of_failures() {
        let store = seeded_store(1).await;
        let started = Instant::now();
        store.set_unavailable(true);

        let outcome = spawn_renewal(
            Arc::new(store.clone()),
            tenure(1),
            Arc::new(AtomicBool::new(false)),
            Duration::from_secs(1),
            Duration::from_secs(3),
        )
        .await
        .unwrap();

        assert_eq!(outcome, RenewalOutcome::Expired { term: 1 });
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_survives_a_short_outage() {
        let store = seeded_store(1).await;
        let resigned = Arc::new(AtomicBool::new(false));
        let handle = spawn_renewal(
            Arc::new(store.clone()),
            tenure(1),
            Arc::clone(&resigned),
            Duration::from_secs(1),
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        store.set_unavailable(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        store.set_unavailable(false);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!handle.is_finished());
        let progress = store.read_progress("jobs").await.unwrap().unwrap();
        assert!(progress.revision >= 2);

        resigned.store(true, Ordering::SeqCst);
        assert_eq!(handle.await.unwrap(), RenewalOutcome::Resigned);
    }
}
