//! In-flight dedupe of vote fetches, keyed by `(height, attempt)`.
//!
//! The first caller for a key becomes the leader and holds an
//! [`InflightGuard`]; dropping the guard releases the key and wakes every
//! follower waiting on it.

use crate::domain::ingest::IngestTask;
use crate::domain::types::BlockHeight;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of claiming a key.
pub enum Claim {
    /// Caller owns the fetch for this key
    Leader(InflightGuard),
    /// Another caller is already fetching; resolves when it finishes
    Follower(watch::Receiver<bool>),
}

/// Registry of fetches currently in flight.
#[derive(Clone, Default)]
pub struct InflightRegistry {
    entries: Arc<DashMap<IngestTask, watch::Receiver<bool>>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, key: IngestTask) -> Claim {
        match self.entries.entry(key) {
            Entry::Occupied(entry) => Claim::Follower(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (done_tx, done_rx) = watch::channel(false);
                entry.insert(done_rx);
                Claim::Leader(InflightGuard {
                    entries: Arc::clone(&self.entries),
                    key,
                    done: done_tx,
                })
            }
        }
    }

    pub fn is_in_flight(&self, key: &IngestTask) -> bool {
        self.entries.contains_key(key)
    }

    /// Any attempt for `height` in flight.
    pub fn is_height_in_flight(&self, height: BlockHeight) -> bool {
        self.entries.iter().any(|entry| entry.key().height == height)
    }

    /// Wait until `key` is released. Returns immediately if it is not held.
    pub async fn wait_for(&self, key: &IngestTask) {
        let receiver = self.entries.get(key).map(|entry| entry.value().clone());
        if let Some(receiver) = receiver {
            wait_done(receiver).await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Wait for a leader to finish.
pub async fn wait_done(mut receiver: watch::Receiver<bool>) {
    // A closed channel also means the leader is gone
    let _ = receiver.wait_for(|done| *done).await;
}

/// Ownership of an in-flight key. Released on drop.
pub struct InflightGuard {
    entries: Arc<DashMap<IngestTask, watch::Receiver<bool>>>,
    key: IngestTask,
    done: watch::Sender<bool>,
}

impl InflightGuard {
    pub fn key(&self) -> IngestTask {
        self.key
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.entries.remove(&self.key);
        let _ = self.done.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_second_claim_is_follower() {
        let registry = InflightRegistry::new();
        let key = IngestTask::first(10);

        let leader = registry.claim(key);
        assert!(matches!(leader, Claim::Leader(_)));
        assert!(matches!(registry.claim(key), Claim::Follower(_)));
        assert!(matches!(registry.claim(IngestTask::new(10, 1)), Claim::Leader(_)));
        assert!(registry.is_height_in_flight(10));

        drop(leader);
        assert!(!registry.is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_follower_wakes_when_leader_drops() {
        let registry = InflightRegistry::new();
        let key = IngestTask::first(7);
        let guard = match registry.claim(key) {
            Claim::Leader(guard) => guard,
            Claim::Follower(_) => panic!("expected leader"),
        };

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_for(&key).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("follower should wake")
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_unknown_key_returns() {
        let registry = InflightRegistry::new();
        registry.wait_for(&IngestTask::first(1)).await;
    }
}
