//! # Stats Computer
//!
//! Answers signature-rate queries over height windows.
//!
//! Results are memoized in the [`ResultCacheStore`] under
//! `signature_stats:{provider}:{start}:{end}` for `result_ttl`. On a miss the
//! window's finalizable gaps are backfilled through the engine's on-demand
//! path before classification; whatever still has no data counts as unknown.

use crate::application::ingestion::BlockIngestionEngine;
use crate::config::{Network, StatsConfig};
use crate::domain::stats::{
    resolve_window, EpochAggregate, ProviderSignatureSummary, ResolvedWindow, SignatureStats,
    StatsAccumulator, StatsQuery,
};
use crate::domain::types::{BlockHeight, BlockStatus, ProviderKey};
use crate::error::TrackerResult;
use crate::metrics;
use crate::ports::inbound::SignatureStatsApi;
use crate::ports::outbound::{BlockchainQueryClient, ResultCacheStore};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result cache key of a resolved stats query.
pub fn stats_cache_key(provider: &ProviderKey, window: &ResolvedWindow) -> String {
    format!("signature_stats:{provider}:{}:{}", window.start, window.end)
}

pub struct StatsComputer {
    engine: Arc<BlockIngestionEngine>,
    client: Arc<dyn BlockchainQueryClient>,
    store: Arc<dyn ResultCacheStore>,
    config: StatsConfig,
    network: Network,
    backfill_concurrency: usize,
    epoch_retention: u64,
    aggregates: RwLock<BTreeMap<u64, EpochAggregate>>,
}

impl StatsComputer {
    pub fn new(
        engine: Arc<BlockIngestionEngine>,
        client: Arc<dyn BlockchainQueryClient>,
        store: Arc<dyn ResultCacheStore>,
        config: StatsConfig,
        network: Network,
        backfill_concurrency: usize,
        epoch_retention: u64,
    ) -> Self {
        Self {
            engine,
            client,
            store,
            config,
            network,
            backfill_concurrency: backfill_concurrency.max(1),
            epoch_retention,
            aggregates: RwLock::new(BTreeMap::new()),
        }
    }

    /// Signature stats of one provider over one window.
    pub async fn get_stats(&self, query: StatsQuery) -> TrackerResult<SignatureStats> {
        query.validate(self.config.max_window_blocks)?;
        let current = self.engine.chain_height().await?;
        let window = resolve_window(&query, current, self.config.max_window_blocks)?;
        let key = stats_cache_key(&query.provider_key, &window);

        if let Some(cached) = self.store.get(&key).await {
            match serde_json::from_str::<SignatureStats>(&cached) {
                Ok(stats) => {
                    metrics::record_stats_cache(true);
                    return Ok(stats);
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding unreadable cached stats"),
            }
        }
        metrics::record_stats_cache(false);

        if let Err(e) = self.engine.epochs().current_epoch().await {
            warn!(error = %e, "Epoch unavailable, breakdown falls back to epoch 0");
        }
        self.backfill(window).await;

        let stats = self.classify(&query.provider_key, window);
        let encoded = serde_json::to_string(&stats)?;
        self.store.set(&key, encoded, self.config.result_ttl()).await;

        debug!(
            provider = %stats.provider_key,
            start = window.start,
            end = window.end,
            signed = stats.signed_blocks,
            missed = stats.missed_blocks,
            unknown = stats.unknown_blocks,
            "Computed signature stats"
        );
        Ok(stats)
    }

    /// Fetch finalizable heights in the window that have no data yet.
    async fn backfill(&self, window: ResolvedWindow) {
        let missing: Vec<BlockHeight> = {
            let cache = self.engine.cache().read();
            cache.missing_heights(window.start, window.end)
        };
        let missing: Vec<BlockHeight> = missing
            .into_iter()
            .filter(|h| self.engine.is_finalizable(*h) && !self.engine.is_unresolved(*h))
            .collect();
        if missing.is_empty() {
            return;
        }

        debug!(start = window.start, end = window.end, missing = missing.len(), "Backfilling stats window");
        for batch in missing.chunks(self.backfill_concurrency) {
            join_all(batch.iter().map(|h| self.engine.ensure_height(*h))).await;
        }
    }

    fn classify(&self, provider: &ProviderKey, window: ResolvedWindow) -> SignatureStats {
        let statuses: Vec<(BlockHeight, BlockStatus)> = {
            let cache = self.engine.cache().read();
            window
                .heights()
                .map(|h| (h, cache.status_of(h, provider)))
                .collect()
        };

        let epochs = self.engine.epochs();
        let mut acc = StatsAccumulator::new(provider.clone(), window);
        for (height, status) in statuses {
            acc.add(height, epochs.epoch_for_height(height).unwrap_or(0), status);
        }
        acc.finish()
    }

    /// Window summary for every provider registered on the chain.
    pub async fn get_all_provider_stats(&self, last_n: u64) -> TrackerResult<Vec<ProviderSignatureSummary>> {
        let providers = self.client.get_all_finality_providers(self.network).await?;

        let mut summaries = Vec::with_capacity(providers.len());
        for provider in providers {
            if provider.btc_pk.is_empty() {
                continue;
            }
            let stats = self
                .get_stats(StatsQuery::last_n(provider.btc_pk.clone(), last_n))
                .await?;
            summaries.push(ProviderSignatureSummary {
                provider_key: provider.btc_pk,
                moniker: provider.moniker,
                jailed: provider.jailed,
                signed_blocks: stats.signed_blocks,
                missed_blocks: stats.missed_blocks,
                unknown_blocks: stats.unknown_blocks,
                signature_rate: stats.signature_rate,
            });
        }

        summaries.sort_by(|a, b| {
            b.signature_rate
                .total_cmp(&a.signature_rate)
                .then_with(|| a.provider_key.cmp(&b.provider_key))
        });
        Ok(summaries)
    }

    /// Recompute the aggregate of the epoch holding the last processed height.
    ///
    /// Reads only the signature cache. Aggregates older than the retention
    /// window are dropped.
    pub fn refresh_epoch_aggregates(&self) -> Option<EpochAggregate> {
        let last = self.engine.last_processed_height();
        if last == 0 {
            return None;
        }
        let epochs = self.engine.epochs();
        let epoch = epochs.epoch_for_height(last)?;
        let (start, end) = epochs.epoch_bounds(epoch)?;
        let end = end.min(last);

        let mut aggregate = EpochAggregate::new(epoch, start);
        aggregate.end_height = end;
        let mut total_signers = 0u64;
        {
            let cache = self.engine.cache().read();
            for record in cache.records_in(start, end) {
                aggregate.blocks_with_data += 1;
                total_signers += record.signer_count() as u64;
                for signer in &record.signers {
                    *aggregate.signed_by_provider.entry(signer.clone()).or_insert(0) += 1;
                }
            }
        }
        aggregate.unknown_blocks = (end - start + 1).saturating_sub(aggregate.blocks_with_data);
        if aggregate.blocks_with_data > 0 {
            aggregate.average_signers = total_signers as f64 / aggregate.blocks_with_data as f64;
        }

        let mut aggregates = self.aggregates.write();
        aggregates.insert(epoch, aggregate.clone());
        let oldest_kept = epoch.saturating_sub(self.epoch_retention);
        aggregates.retain(|e, _| *e >= oldest_kept);

        debug!(
            epoch,
            blocks = aggregate.blocks_with_data,
            average_signers = aggregate.average_signers,
            "Epoch aggregate refreshed"
        );
        Some(aggregate)
    }

    pub fn epoch_aggregate(&self, epoch: u64) -> Option<EpochAggregate> {
        self.aggregates.read().get(&epoch).cloned()
    }
}

#[async_trait]
impl SignatureStatsApi for StatsComputer {
    async fn get_stats(&self, query: StatsQuery) -> TrackerResult<SignatureStats> {
        StatsComputer::get_stats(self, query).await
    }

    async fn get_all_provider_stats(&self, last_n: u64) -> TrackerResult<Vec<ProviderSignatureSummary>> {
        StatsComputer::get_all_provider_stats(self, last_n).await
    }

    fn epoch_aggregate(&self, epoch: u64) -> Option<EpochAggregate> {
        StatsComputer::epoch_aggregate(self, epoch)
    }
}
