//! Cross-component scenarios. Every test builds a full [`SignatureTracker`]
//! on a scripted chain client.
//!
//! [`SignatureTracker`]: fp_signature_tracker::SignatureTracker

mod live_feed;
mod scenarios;

pub mod fixtures {
    use fp_signature_tracker::adapters::InMemoryResultStore;
    use fp_signature_tracker::ports::MockChainClient;
    use fp_signature_tracker::{BlockHeight, SignatureTracker, TrackerConfig};
    use std::sync::Arc;

    /// Testing config starting ingestion at `start_height`.
    pub fn config(start_height: BlockHeight) -> TrackerConfig {
        let mut config = TrackerConfig::for_testing();
        config.ingestion.start_height = Some(start_height);
        config
    }

    /// Tracker on a mock chain at `current` with epoch width 100.
    pub fn tracker(current: BlockHeight, config: TrackerConfig) -> (Arc<MockChainClient>, SignatureTracker) {
        let client = MockChainClient::shared(current);
        client.set_epoch(current.div_ceil(100).max(1), current.div_ceil(100).max(1) * 100);
        let store = Arc::new(InMemoryResultStore::new(config.stats.result_cache_entries));
        let tracker = SignatureTracker::with_ports(config, client.clone(), store);
        (client, tracker)
    }
}
