//! Single-writer election over a conditional-create TTL key.

use crate::store::{Store, StoreError};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const LEADER_KEY: &str = "/hm/locks/syslog_drain_binder/leader";

/// One participant in the election.
///
/// The holder of [LEADER_KEY] is leader for as long as it keeps refreshing
/// the key conditionally on still owning it. Drives no task of its own: the
/// owner calls it from its tick loop.
pub struct Elector {
    instance: String,
    store: Arc<dyn Store>,
    interval: Duration,
    leader: bool,
}

impl Elector {
    pub fn new(instance: impl Into<String>, store: Arc<dyn Store>, interval: Duration) -> Self {
        Self {
            instance: instance.into(),
            store,
            interval,
            leader: false,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader
    }

    fn ttl(&self) -> Duration {
        self.interval * 2
    }

    /// Attempts to take the leader key. Losing to an existing holder is a
    /// normal outcome, not an error.
    pub async fn run_for_election(&mut self) -> Result<(), StoreError> {
        match self
            .store
            .create(
                LEADER_KEY,
                Bytes::from(self.instance.clone()),
                self.ttl(),
            )
            .await
        {
            Ok(()) => {
                info!(instance = %self.instance, "won election");
                self.leader = true;
                Ok(())
            }
            Err(StoreError::KeyExists) => {
                self.leader = false;
                Ok(())
            }
            Err(err) => {
                self.leader = false;
                Err(err)
            }
        }
    }

    /// Refreshes the key conditionally on still owning it. Any failure means
    /// leadership is gone; the caller must vacate.
    pub async fn stay_as_leader(&mut self) -> Result<(), StoreError> {
        self.store
            .compare_and_swap(
                LEADER_KEY,
                self.instance.as_bytes(),
                Bytes::from(self.instance.clone()),
                self.ttl(),
            )
            .await
    }

    /// Best-effort release: deletes the key only while it is still ours, and
    /// unconditionally steps down locally.
    pub async fn vacate(&mut self) {
        self.leader = false;
        match self
            .store
            .compare_and_delete(LEADER_KEY, self.instance.as_bytes())
            .await
        {
            Ok(()) => info!(instance = %self.instance, "vacated leadership"),
            Err(StoreError::NotFound | StoreError::CompareFailed) => {}
            Err(err) => warn!(error = %err, "failed to vacate leader key"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn elector(name: &str, store: &Arc<MemoryStore>) -> Elector {
        Elector::new(name, store.clone() as Arc<dyn Store>, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn only_one_candidate_wins_an_epoch() {
        let store = Arc::new(MemoryStore::new());
        let mut a = elector("a", &store);
        let mut b = elector("b", &store);

        a.run_for_election().await.unwrap();
        b.run_for_election().await.unwrap();

        assert!(a.is_leader());
        assert!(!b.is_leader());
    }

    #[tokio::test]
    async fn the_leader_can_refresh_while_it_owns_the_key() {
        let store = Arc::new(MemoryStore::new());
        let mut a = elector("a", &store);
        a.run_for_election().await.unwrap();
        a.stay_as_leader().await.unwrap();
        assert!(a.is_leader());
    }

    #[tokio::test]
    async fn refresh_fails_once_the_key_changed_hands() {
        let store = Arc::new(MemoryStore::new());
        let mut a = elector("a", &store);
        a.run_for_election().await.unwrap();

        store.delete(LEADER_KEY).await.unwrap();
        store
            .create(LEADER_KEY, Bytes::from_static(b"b"), Duration::from_secs(10))
            .await
            .unwrap();

        assert!(a.stay_as_leader().await.is_err());
        a.vacate().await;
        assert!(!a.is_leader());

        // The usurper's key must survive the vacate.
        let node = store.get(LEADER_KEY).await.unwrap().unwrap();
        assert_eq!(node.value.as_ref(), b"b");
    }

    #[tokio::test(start_paused = true)]
    async fn a_follower_takes_over_after_the_ttl_lapses() {
        let store = Arc::new(MemoryStore::new());
        let mut a = elector("a", &store);
        let mut b = elector("b", &store);
        a.run_for_election().await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        b.run_for_election().await.unwrap();
        assert!(b.is_leader());
    }
}
