//! Driving Ports (API - Inbound)
//!
//! What the HTTP layer (or any other front end) can ask of the tracker.

use crate::application::broadcast::SubscriptionStream;
use crate::domain::stats::{EpochAggregate, ProviderSignatureSummary, SignatureStats, StatsQuery};
use crate::domain::types::ProviderKey;
use crate::error::TrackerResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Connection identifier of a live subscriber.
pub type ConnectionId = Uuid;

/// Pull queries over signature data.
#[async_trait]
pub trait SignatureStatsApi: Send + Sync {
    /// Stats of one provider over a window.
    ///
    /// Validation errors are returned before any chain access.
    async fn get_stats(&self, query: StatsQuery) -> TrackerResult<SignatureStats>;

    /// Window summary of every registered finality provider.
    async fn get_all_provider_stats(&self, last_n: u64) -> TrackerResult<Vec<ProviderSignatureSummary>>;

    /// Rolling participation of an epoch, if still retained.
    fn epoch_aggregate(&self, epoch: u64) -> Option<EpochAggregate>;
}

/// Live per-provider signature feed.
#[async_trait]
pub trait LiveSignatureFeed: Send + Sync {
    /// Register a subscriber. The returned stream yields the initial
    /// snapshot first, then one event per finalized height, and unsubscribes
    /// when dropped.
    async fn subscribe(
        &self,
        connection_id: ConnectionId,
        provider_key: ProviderKey,
    ) -> TrackerResult<SubscriptionStream>;

    fn unsubscribe(&self, connection_id: ConnectionId) -> bool;

    fn subscriber_count(&self) -> usize;
}
