//! Signature Tracker Service
//!
//! Builds every component once and owns their lifecycle. The engine, stats
//! computer and broadcast hub share one signature cache and one epoch
//! tracker; the dispatcher links the engine's finalized heights to the hub.

use crate::adapters::{BabylonClient, InMemoryResultStore};
use crate::application::broadcast::LiveBroadcastHub;
use crate::application::dispatch::FinalizationDispatcher;
use crate::application::epoch_tracker::EpochTracker;
use crate::application::ingestion::BlockIngestionEngine;
use crate::application::stats::StatsComputer;
use crate::config::TrackerConfig;
use crate::domain::signature_cache::SignatureCache;
use crate::error::{TrackerError, TrackerResult};
use crate::ports::outbound::{BlockchainQueryClient, ResultCacheStore};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct SignatureTracker {
    config: TrackerConfig,
    engine: Arc<BlockIngestionEngine>,
    stats: Arc<StatsComputer>,
    hub: Arc<LiveBroadcastHub>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SignatureTracker {
    /// Build a tracker against the configured chain endpoints.
    pub fn from_config(config: TrackerConfig) -> TrackerResult<Self> {
        config
            .validate()
            .map_err(|e| TrackerError::Configuration(e.to_string()))?;
        let client: Arc<dyn BlockchainQueryClient> = Arc::new(BabylonClient::from_config(&config.chain)?);
        let store: Arc<dyn ResultCacheStore> =
            Arc::new(InMemoryResultStore::new(config.stats.result_cache_entries));
        Ok(Self::with_ports(config, client, store))
    }

    /// Build a tracker on explicit ports.
    pub fn with_ports(
        config: TrackerConfig,
        client: Arc<dyn BlockchainQueryClient>,
        store: Arc<dyn ResultCacheStore>,
    ) -> Self {
        let cache = SignatureCache::shared(config.cache.capacity);
        let epochs = Arc::new(EpochTracker::new(
            Arc::clone(&client),
            config.cache.epoch_retention,
            config.cache.epoch_interval,
        ));
        let engine = Arc::new(BlockIngestionEngine::new(
            Arc::clone(&client),
            cache,
            epochs,
            config.ingestion.clone(),
            config.broadcast.finalized_channel_capacity,
        ));
        let stats = Arc::new(StatsComputer::new(
            Arc::clone(&engine),
            client,
            store,
            config.stats.clone(),
            config.chain.network,
            config.ingestion.gap_fill_concurrency,
            config.cache.epoch_retention,
        ));
        let hub = Arc::new(LiveBroadcastHub::new(Arc::clone(&engine), config.broadcast.clone()));

        Self {
            config,
            engine,
            stats,
            hub,
            dispatcher: Mutex::new(None),
        }
    }

    /// Start ingestion and the finalization dispatcher.
    pub fn start(&self) -> TrackerResult<()> {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return Ok(());
        }
        self.engine.start()?;

        let task = FinalizationDispatcher::new(
            Arc::clone(&self.hub),
            Arc::clone(&self.stats),
            self.config.stats.aggregate_refresh_interval,
        );
        *dispatcher = Some(tokio::spawn(
            task.run(self.engine.subscribe_finalized(), self.engine.shutdown_signal()),
        ));

        info!(network = %self.config.chain.network, "Signature tracker started");
        Ok(())
    }

    /// Stop ingestion. Terminal.
    pub fn stop(&self) {
        self.engine.stop();
        if let Some(task) = self.dispatcher.lock().take() {
            task.abort();
        }
        info!("Signature tracker stopped");
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<BlockIngestionEngine> {
        &self.engine
    }

    pub fn stats(&self) -> &Arc<StatsComputer> {
        &self.stats
    }

    pub fn hub(&self) -> &Arc<LiveBroadcastHub> {
        &self.hub
    }
}
