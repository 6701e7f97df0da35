//! # Block Ingestion Engine
//!
//! Drives the signature cache forward.
//!
//! ## Loop
//!
//! Every `poll_interval` the engine refreshes the chain height, advances
//! `last_processed_height` over heights that have settled, then ingests the
//! next unsettled height. Fired retry timers arrive on a separate worker.
//!
//! ## Settled heights
//!
//! A finalizable height is settled once a fetch produced data for it, or once
//! its retry budget ran out on errors (it then stays unknown). Settlement is
//! recorded from the fetch outcome, so a height the cache already evicted
//! again still counts. Each advance runs the epoch check and publishes one
//! [`HeightFinalized`].
//!
//! ## Dedupe
//!
//! Every fetch claims its `(height, attempt)` key in the [`InflightRegistry`],
//! including on-demand fetches made through [`BlockIngestionEngine::ensure_height`].

use crate::application::epoch_tracker::EpochTracker;
use crate::application::inflight::{wait_done, Claim, InflightGuard, InflightRegistry};
use crate::application::scheduler::RetryScheduler;
use crate::config::IngestionConfig;
use crate::domain::ingest::{
    finalized_tip, is_finalizable, next_step, FetchOutcome, IngestTask, NextStep, RetryPolicy,
};
use crate::domain::signature_cache::SharedSignatureCache;
use crate::domain::types::BlockHeight;
use crate::error::{TrackerError, TrackerResult};
use crate::events::HeightFinalized;
use crate::metrics;
use crate::ports::outbound::{BlockchainQueryClient, ChainQueryError};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a single ingestion call achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestStatus {
    /// Height has data in the cache
    Resolved,
    /// No data yet; a retry timer owns the height
    Pending,
    /// Not finalizable yet; re-submitted after the finalization delay
    Deferred,
    /// Retry budget exhausted on errors; the height stays unknown
    Unknown,
    /// Height is beyond the chain tip; dropped until a later tick
    Abandoned,
    /// Nothing to do (already processed, already in flight, or engine stopped)
    Skipped,
}

/// Summary of a gap fill run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GapFillReport {
    pub requested: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

#[derive(Debug, Default)]
struct EngineState {
    /// `None` until the first successful tick picks a start height
    last_processed_height: Option<BlockHeight>,
    current_chain_height: BlockHeight,
}

pub struct BlockIngestionEngine {
    client: Arc<dyn BlockchainQueryClient>,
    cache: SharedSignatureCache,
    epochs: Arc<EpochTracker>,
    config: IngestionConfig,
    policy: RetryPolicy,
    inflight: InflightRegistry,
    scheduler: RetryScheduler,
    retry_rx: Mutex<Option<mpsc::UnboundedReceiver<IngestTask>>>,
    state: RwLock<EngineState>,
    /// Heights that exhausted their budget on errors. Pruned to the cache's
    /// reach behind `last_processed_height`.
    unresolved: Mutex<BTreeSet<BlockHeight>>,
    /// Heights above `last_processed_height` that settled, with their signer
    /// count (`None` when left unknown)
    settled: Mutex<BTreeMap<BlockHeight, Option<usize>>>,
    finalized_tx: broadcast::Sender<HeightFinalized>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl BlockIngestionEngine {
    pub fn new(
        client: Arc<dyn BlockchainQueryClient>,
        cache: SharedSignatureCache,
        epochs: Arc<EpochTracker>,
        config: IngestionConfig,
        finalized_channel_capacity: usize,
    ) -> Self {
        let policy = RetryPolicy {
            max_retries: config.max_retries,
            initial_delay: config.initial_retry_delay(),
            max_delay: config.max_retry_delay(),
        };
        let (scheduler, retry_rx) = RetryScheduler::new();
        let (finalized_tx, _) = broadcast::channel(finalized_channel_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            client,
            cache,
            epochs,
            config,
            policy,
            inflight: InflightRegistry::new(),
            scheduler,
            retry_rx: Mutex::new(Some(retry_rx)),
            state: RwLock::new(EngineState::default()),
            unresolved: Mutex::new(BTreeSet::new()),
            settled: Mutex::new(BTreeMap::new()),
            finalized_tx,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the tick loop and the retry worker.
    ///
    /// The first tick picks the start height and launches the startup gap
    /// fill. A stopped engine cannot be restarted.
    pub fn start(self: &Arc<Self>) -> TrackerResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TrackerError::EngineStopped);
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let retry_rx = self
            .retry_rx
            .lock()
            .take()
            .ok_or(TrackerError::EngineStopped)?;

        let tick_loop = tokio::spawn(Arc::clone(self).run_tick_loop(self.shutdown_tx.subscribe()));
        let retry_worker =
            tokio::spawn(Arc::clone(self).run_retry_worker(retry_rx, self.shutdown_tx.subscribe()));
        self.tasks.lock().extend([tick_loop, retry_worker]);

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            finalization_lag = self.config.finalization_lag,
            max_retries = self.config.max_retries,
            "Block ingestion engine started"
        );
        Ok(())
    }

    /// Stop the loops and clear every pending retry timer.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        let cleared = self.scheduler.clear();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!(cleared_timers = cleared, "Block ingestion engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    async fn run_tick_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Ingestion tick failed");
                    }
                }
            }
        }
        debug!("Tick loop exited");
    }

    async fn run_retry_worker(
        self: Arc<Self>,
        mut retries: mpsc::UnboundedReceiver<IngestTask>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                task = retries.recv() => {
                    let Some(task) = task else { break };
                    let engine = Arc::clone(&self);
                    tokio::spawn(async move {
                        engine.ingest(task).await;
                    });
                }
            }
        }
        debug!("Retry worker exited");
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// One polling step. Errors only mean this tick could not read the chain
    /// height; nothing else aborts a tick.
    pub async fn tick(self: &Arc<Self>) -> TrackerResult<()> {
        if self.is_stopped() {
            return Err(TrackerError::EngineStopped);
        }

        let current = self.refresh_chain_height().await?;

        if self.state.read().last_processed_height.is_none() {
            self.initialize_start(current);
        }

        self.advance_settled(current).await;

        let next = self.last_processed_height() + 1;
        if next < current && !self.is_busy(next) {
            self.ingest(IngestTask::first(next)).await;
            self.advance_settled(current).await;
        }
        Ok(())
    }

    /// Query the chain tip and record it. The stored height never decreases.
    pub async fn refresh_chain_height(&self) -> TrackerResult<BlockHeight> {
        let reported = self.client.get_current_height().await?;
        let mut state = self.state.write();
        state.current_chain_height = state.current_chain_height.max(reported);
        metrics::set_chain_height(state.current_chain_height);
        Ok(state.current_chain_height)
    }

    /// Last known chain height, fetching it if none is known yet.
    pub async fn chain_height(&self) -> TrackerResult<BlockHeight> {
        match self.current_chain_height() {
            0 => self.refresh_chain_height().await,
            height => Ok(height),
        }
    }

    fn initialize_start(self: &Arc<Self>, current: BlockHeight) {
        let tip = finalized_tip(current, self.config.finalization_lag);
        let start = self
            .config
            .start_height
            .unwrap_or_else(|| tip.saturating_sub(self.config.startup_backfill_blocks))
            .max(1);
        let last_processed = (start - 1).min(tip);

        {
            let mut state = self.state.write();
            if state.last_processed_height.is_some() {
                return;
            }
            state.last_processed_height = Some(last_processed);
        }
        metrics::set_last_processed_height(last_processed);
        info!(start, tip, current, "Ingestion start height selected");

        if start <= tip {
            let engine = Arc::clone(self);
            let handle = tokio::spawn(async move {
                let report = engine.gap_fill(start, tip).await;
                info!(
                    requested = report.requested,
                    resolved = report.resolved,
                    unresolved = report.unresolved,
                    "Startup gap fill finished"
                );
            });
            self.tasks.lock().push(handle);
        }
    }

    fn is_settled(&self, height: BlockHeight) -> bool {
        self.settled_status(height).is_some()
    }

    /// Remember that `height` settled, unless advancement already passed it.
    fn mark_settled(&self, height: BlockHeight, signer_count: Option<usize>) {
        if height > self.last_processed_height() {
            self.settled.lock().entry(height).or_insert(signer_count);
        }
    }

    /// Outcome of a height that no longer needs fetching, if any.
    fn settled_status(&self, height: BlockHeight) -> Option<IngestStatus> {
        if self.cache.read().has_data(height) {
            return Some(IngestStatus::Resolved);
        }
        if self.unresolved.lock().contains(&height) {
            return Some(IngestStatus::Unknown);
        }
        match self.settled.lock().get(&height) {
            Some(Some(_)) => Some(IngestStatus::Resolved),
            Some(None) => Some(IngestStatus::Unknown),
            None => None,
        }
    }

    /// A timer or fetch already owns the height.
    fn is_busy(&self, height: BlockHeight) -> bool {
        self.scheduler.has_pending(height) || self.inflight.is_height_in_flight(height)
    }

    async fn advance_settled(&self, current: BlockHeight) {
        loop {
            let next = self.last_processed_height() + 1;
            if !is_finalizable(next, current, self.config.finalization_lag) || !self.is_settled(next) {
                return;
            }

            {
                let mut state = self.state.write();
                match state.last_processed_height {
                    Some(last) if last + 1 == next => state.last_processed_height = Some(next),
                    Some(_) => continue,
                    None => return,
                }
            }
            metrics::set_last_processed_height(next);
            let settled_signers = self.prune_behind(next);
            self.on_advanced(next, settled_signers).await;
        }
    }

    /// Drop settlement bookkeeping at or below `height` and unresolved
    /// heights the cache could no longer hold. Returns what was recorded for
    /// `height` itself.
    fn prune_behind(&self, height: BlockHeight) -> Option<usize> {
        let recorded = {
            let mut settled = self.settled.lock();
            let above = settled.split_off(&(height + 1));
            let recorded = settled.get(&height).copied().flatten();
            *settled = above;
            recorded
        };

        let capacity = self.cache.read().capacity() as u64;
        let floor = height.saturating_sub(capacity);
        if floor > 0 {
            let mut unresolved = self.unresolved.lock();
            *unresolved = unresolved.split_off(&floor);
        }
        recorded
    }

    async fn on_advanced(&self, height: BlockHeight, settled_signers: Option<usize>) {
        if let Err(e) = self.epochs.check_and_update(height).await {
            warn!(height, error = %e, "Epoch check failed");
        }

        let (signer_count, timestamp) = {
            let cache = self.cache.read();
            (
                cache.get_signers(height).map(|s| s.len()).or(settled_signers),
                cache.get_timestamp(height).unwrap_or_else(Utc::now),
            )
        };
        let event = HeightFinalized {
            height,
            epoch: self.epochs.epoch_for_height(height),
            signer_count,
            timestamp,
        };
        debug!(height, signers = ?signer_count, "Height finalized");
        // No receivers is fine: nobody is listening yet
        let _ = self.finalized_tx.send(event);
    }

    // =========================================================================
    // Per-height ingestion
    // =========================================================================

    /// Run one ingestion attempt for `task`.
    pub async fn ingest(self: &Arc<Self>, task: IngestTask) -> IngestStatus {
        if self.is_stopped() {
            return IngestStatus::Skipped;
        }
        let height = task.height;

        if self.cache.read().is_processed(height) {
            return IngestStatus::Skipped;
        }
        if height < self.config.activation_height {
            return self.record_inactive(height);
        }
        if !self.is_finalizable(height) {
            return self.defer(task);
        }

        match self.inflight.claim(task) {
            Claim::Leader(guard) => self.fetch_and_apply(task, guard).await,
            Claim::Follower(_) => {
                debug!(height, attempt = task.attempt, "Identical fetch in flight, skipping");
                IngestStatus::Skipped
            }
        }
    }

    /// Fetch `height` on demand and follow its retry chain to the end.
    ///
    /// Used for stats backfill. Each attempt shares its `(height, attempt)`
    /// dedupe key with the engine, so concurrent callers and background
    /// retries for the same attempt wait on one request. Backoff between
    /// attempts happens inline; only verification passes on a height that
    /// already has data are left to the background scheduler.
    pub async fn ensure_height(self: &Arc<Self>, height: BlockHeight) -> IngestStatus {
        // Callers read the cache afterwards, so a settled but evicted height
        // is fetched again
        if self.cache.read().has_data(height) {
            return IngestStatus::Resolved;
        }
        if self.unresolved.lock().contains(&height) {
            return IngestStatus::Unknown;
        }
        if height < self.config.activation_height {
            return self.record_inactive(height);
        }
        if !self.is_finalizable(height) {
            return IngestStatus::Deferred;
        }

        let mut task = IngestTask::first(height);
        loop {
            if self.is_stopped() {
                return IngestStatus::Skipped;
            }
            let delay = match self.inflight.claim(task) {
                Claim::Leader(guard) => match self.fetch(task).await {
                    NextStep::Retry { task: next, delay } => {
                        drop(guard);
                        debug!(
                            height,
                            attempt = next.attempt,
                            delay_ms = delay.as_millis() as u64,
                            "On-demand retry"
                        );
                        task = next;
                        delay
                    }
                    step => {
                        let status = self.apply_step(task, step);
                        drop(guard);
                        return status;
                    }
                },
                Claim::Follower(done) => {
                    wait_done(done).await;
                    if let Some(status) = self.settled_status(height) {
                        return status;
                    }
                    if !self.policy.has_budget(task.attempt) {
                        return IngestStatus::Pending;
                    }
                    let delay = self.policy.backoff(task.attempt);
                    task = task.next_attempt();
                    delay
                }
            };
            tokio::time::sleep(delay).await;
            if let Some(status) = self.settled_status(height) {
                return status;
            }
        }
    }

    /// Ingest every unsettled height in `[start, end]` above
    /// `last_processed_height`, in bounded concurrent batches.
    pub async fn gap_fill(self: &Arc<Self>, start: BlockHeight, end: BlockHeight) -> GapFillReport {
        let last_processed = self.last_processed_height();
        let missing: Vec<BlockHeight> = {
            let cache = self.cache.read();
            let unresolved = self.unresolved.lock();
            let settled = self.settled.lock();
            cache
                .missing_heights(start, end)
                .into_iter()
                .filter(|h| *h > last_processed)
                .filter(|h| !unresolved.contains(h) && !settled.contains_key(h))
                .collect()
        };

        let mut report = GapFillReport {
            requested: missing.len(),
            ..GapFillReport::default()
        };
        if missing.is_empty() {
            return report;
        }
        debug!(start, end, missing = missing.len(), "Gap fill starting");

        for batch in missing.chunks(self.config.gap_fill_concurrency.max(1)) {
            if self.is_stopped() {
                break;
            }
            let results = join_all(batch.iter().map(|h| self.ingest(IngestTask::first(*h)))).await;
            for status in results {
                match status {
                    IngestStatus::Resolved => report.resolved += 1,
                    IngestStatus::Unknown => report.unresolved += 1,
                    _ => {}
                }
            }
        }
        report
    }

    async fn fetch_and_apply(self: &Arc<Self>, task: IngestTask, guard: InflightGuard) -> IngestStatus {
        let step = self.fetch(task).await;
        let status = self.apply_step(task, step);
        // Release the key only after the cache reflects this attempt
        drop(guard);
        status
    }

    /// One vote fetch and cache merge. The caller holds the in-flight key.
    async fn fetch(&self, task: IngestTask) -> NextStep {
        let height = task.height;
        let had_data = self.cache.read().has_data(height);

        let outcome = match self.client.get_votes_at_height(height).await {
            Ok(votes) if votes.is_empty() => FetchOutcome::Empty,
            Ok(votes) => {
                let (merge, signer_count) = {
                    let mut cache = self.cache.write();
                    let merge = cache.record_votes(height, votes.iter().map(|v| v.provider_key()));
                    let signer_count = cache.get_signers(height).map_or(merge.added, |s| s.len());
                    (merge, signer_count)
                };
                if merge.created {
                    metrics::record_height_ingested();
                }
                if merge.evicted > 0 {
                    metrics::record_cache_evictions(merge.evicted);
                }
                self.unresolved.lock().remove(&height);
                self.mark_settled(height, Some(signer_count));
                debug!(
                    height,
                    attempt = task.attempt,
                    votes = votes.len(),
                    added = merge.added,
                    "Votes recorded"
                );
                FetchOutcome::Votes { added: merge.added }
            }
            Err(ChainQueryError::FutureHeight { requested, current }) => {
                metrics::record_fetch_failure("future_height");
                debug!(requested, current, "Height not produced yet, abandoning");
                FetchOutcome::FutureHeight
            }
            Err(e) => {
                metrics::record_fetch_failure(e.kind());
                warn!(height, attempt = task.attempt, error = %e, "Vote fetch failed");
                FetchOutcome::TransientError
            }
        };

        next_step(&self.policy, task, outcome, had_data)
    }

    fn apply_step(&self, task: IngestTask, step: NextStep) -> IngestStatus {
        let height = task.height;
        match step {
            NextStep::Retry { task: next, delay } | NextStep::Verify { task: next, delay } => {
                if self.scheduler.schedule(next, delay) {
                    metrics::record_retry_scheduled();
                    debug!(height, attempt = next.attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
                }
                if self.cache.read().has_data(height) {
                    IngestStatus::Resolved
                } else {
                    IngestStatus::Pending
                }
            }
            NextStep::MarkProcessed => {
                self.cache.write().mark_processed(height);
                IngestStatus::Resolved
            }
            NextStep::RecordEmpty => {
                let merge = self.cache.write().record_empty_processed(height);
                if merge.evicted > 0 {
                    metrics::record_cache_evictions(merge.evicted);
                }
                self.unresolved.lock().remove(&height);
                self.mark_settled(height, Some(0));
                info!(height, attempts = task.attempt + 1, "No votes after retries, recorded empty");
                IngestStatus::Resolved
            }
            NextStep::GiveUp => {
                self.unresolved.lock().insert(height);
                self.mark_settled(height, None);
                metrics::record_height_unknown();
                warn!(height, attempts = task.attempt + 1, "Retry budget exhausted, height left unknown");
                IngestStatus::Unknown
            }
            NextStep::Abandon => IngestStatus::Abandoned,
        }
    }

    fn record_inactive(&self, height: BlockHeight) -> IngestStatus {
        let merge = self.cache.write().record_empty_processed(height);
        if merge.evicted > 0 {
            metrics::record_cache_evictions(merge.evicted);
        }
        self.mark_settled(height, Some(0));
        IngestStatus::Resolved
    }

    fn defer(&self, task: IngestTask) -> IngestStatus {
        if self.scheduler.schedule(task, self.config.finalization_delay()) {
            debug!(height = task.height, "Height not finalizable yet, deferred");
        }
        IngestStatus::Deferred
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn is_finalizable(&self, height: BlockHeight) -> bool {
        is_finalizable(height, self.current_chain_height(), self.config.finalization_lag)
    }

    pub fn last_processed_height(&self) -> BlockHeight {
        self.state.read().last_processed_height.unwrap_or(0)
    }

    pub fn current_chain_height(&self) -> BlockHeight {
        self.state.read().current_chain_height
    }

    /// Receiver of one event per advance of `last_processed_height`.
    pub fn subscribe_finalized(&self) -> broadcast::Receiver<HeightFinalized> {
        self.finalized_tx.subscribe()
    }

    /// Shutdown signal shared with loops spawned alongside the engine.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn pending_retries(&self) -> usize {
        self.scheduler.pending_count()
    }

    pub fn has_pending_retry(&self, height: BlockHeight) -> bool {
        self.scheduler.has_pending(height)
    }

    pub fn is_unresolved(&self, height: BlockHeight) -> bool {
        self.unresolved.lock().contains(&height)
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.lock().len()
    }

    pub fn cache(&self) -> &SharedSignatureCache {
        &self.cache
    }

    pub fn epochs(&self) -> &Arc<EpochTracker> {
        &self.epochs
    }

    pub fn finalization_lag(&self) -> u64 {
        self.config.finalization_lag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signature_cache::SignatureCache;
    use crate::domain::types::{BlockStatus, ProviderKey};
    use crate::ports::outbound::{MockChainClient, ScriptedVotes, VoteRecord};
    use std::time::Duration;

    fn config() -> IngestionConfig {
        IngestionConfig {
            poll_interval_ms: 100,
            finalization_lag: 3,
            finalization_delay_ms: 200,
            max_retries: 2,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 1_000,
            gap_fill_concurrency: 4,
            activation_height: 0,
            start_height: None,
            startup_backfill_blocks: 0,
        }
    }

    fn engine_with(client: Arc<MockChainClient>, config: IngestionConfig) -> Arc<BlockIngestionEngine> {
        client.set_epoch(1, 1_000);
        let epochs = Arc::new(EpochTracker::new(client.clone(), 3, None));
        Arc::new(BlockIngestionEngine::new(
            client,
            SignatureCache::shared(1_000),
            epochs,
            config,
            64,
        ))
    }

    fn engine(client: Arc<MockChainClient>) -> Arc<BlockIngestionEngine> {
        engine_with(client, config())
    }

    #[tokio::test]
    async fn test_tick_ingests_first_finalizable_height() {
        let client = MockChainClient::shared(105);
        client.set_votes(102, &["abc"]);
        let engine = engine(client.clone());

        engine.tick().await.unwrap();

        // Tip 105 with lag 3: 102 is the newest height worth fetching
        assert_eq!(engine.last_processed_height(), 102);
        assert_eq!(client.vote_calls_for(102), 1);
        assert_eq!(client.vote_calls_for(103), 0);
        assert_eq!(client.vote_calls_for(104), 0);
        assert_eq!(client.vote_calls_for(105), 0);
    }

    #[tokio::test]
    async fn test_last_processed_is_monotonic_and_lagged() {
        let client = MockChainClient::shared(20);
        for h in 1..=40 {
            client.set_votes(h, &["abc"]);
        }
        let engine = engine_with(client.clone(), IngestionConfig {
            start_height: Some(15),
            ..config()
        });

        let mut previous = 0;
        for tip in [20u64, 22, 22, 25, 30] {
            client.set_height(tip);
            engine.tick().await.unwrap();
            let last = engine.last_processed_height();
            assert!(last >= previous);
            assert!(last <= tip - 3);
            previous = last;
        }
    }

    #[tokio::test]
    async fn test_advance_publishes_finalized_events() {
        let client = MockChainClient::shared(10);
        client.set_votes(7, &["a", "b"]);
        let engine = engine_with(client, IngestionConfig {
            start_height: Some(7),
            ..config()
        });
        let mut finalized = engine.subscribe_finalized();

        engine.tick().await.unwrap();

        let event = finalized.recv().await.unwrap();
        assert_eq!(event.height, 7);
        assert_eq!(event.signer_count, Some(2));
        assert_eq!(event.epoch, Some(1));
    }

    #[tokio::test]
    async fn test_not_finalizable_is_deferred() {
        let client = MockChainClient::shared(100);
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();

        assert_eq!(engine.ingest(IngestTask::first(98)).await, IngestStatus::Deferred);
        assert!(engine.has_pending_retry(98));
        assert_eq!(client.vote_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_votes_retry_then_record_empty() {
        let client = MockChainClient::shared(100);
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();

        assert_eq!(engine.ingest(IngestTask::first(50)).await, IngestStatus::Pending);
        assert!(engine.has_pending_retry(50));

        // Drive the retries by hand: attempts 1 and 2
        assert_eq!(engine.ingest(IngestTask::new(50, 1)).await, IngestStatus::Pending);
        assert_eq!(engine.ingest(IngestTask::new(50, 2)).await, IngestStatus::Resolved);

        let cache = engine.cache().read();
        assert!(cache.is_processed(50));
        assert_eq!(cache.status_of(50, &ProviderKey::new("abc")), BlockStatus::Missed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_leave_height_unknown() {
        let client = MockChainClient::shared(100);
        for _ in 0..3 {
            client.push_response(
                40,
                ScriptedVotes::Error(ChainQueryError::Transport("connection reset".into())),
            );
        }
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();

        assert_eq!(engine.ingest(IngestTask::first(40)).await, IngestStatus::Pending);
        assert_eq!(engine.ingest(IngestTask::new(40, 1)).await, IngestStatus::Pending);
        assert_eq!(engine.ingest(IngestTask::new(40, 2)).await, IngestStatus::Unknown);

        assert!(engine.is_unresolved(40));
        assert_eq!(
            engine.cache().read().status_of(40, &ProviderKey::new("abc")),
            BlockStatus::Unknown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timers_fire_through_worker() {
        let client = MockChainClient::shared(100);
        client.push_response(60, ScriptedVotes::Error(ChainQueryError::Transport("timeout".into())));
        client.set_votes(60, &["abc"]);
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();
        engine.start().unwrap();

        assert_eq!(engine.ingest(IngestTask::first(60)).await, IngestStatus::Pending);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(engine.cache().read().has_data(60));
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_height_abandons_without_retry() {
        let client = MockChainClient::shared(100);
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();
        // The node serving votes lags behind the one serving status
        client.set_height(80);

        assert_eq!(engine.ingest(IngestTask::first(90)).await, IngestStatus::Abandoned);
        assert!(!engine.has_pending_retry(90));
        assert!(!engine.is_unresolved(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_signers_on_last_pass_get_one_more() {
        let client = MockChainClient::shared(100);
        client.push_response(30, ScriptedVotes::Votes(vec![VoteRecord::new("a")]));
        client.push_response(30, ScriptedVotes::Votes(vec![VoteRecord::new("a")]));
        client.push_response(30, ScriptedVotes::Votes(vec![VoteRecord::new("b")]));
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();

        engine.ingest(IngestTask::first(30)).await;
        engine.ingest(IngestTask::new(30, 1)).await;
        // Attempt 2 exhausts the budget but finds "b"
        engine.ingest(IngestTask::new(30, 2)).await;
        assert!(!engine.cache().read().is_processed(30));
        assert!(engine.has_pending_retry(30));

        engine.ingest(IngestTask::new(30, 3)).await;
        let cache = engine.cache().read();
        assert!(cache.is_processed(30));
        assert_eq!(cache.get_signers(30).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reingest_processed_height_is_idempotent() {
        let client = MockChainClient::shared(100);
        client.set_votes(10, &["abc"]);
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();

        for attempt in 0..=2 {
            engine.ingest(IngestTask::new(10, attempt)).await;
        }
        assert!(engine.cache().read().is_processed(10));

        assert_eq!(engine.ingest(IngestTask::first(10)).await, IngestStatus::Skipped);
        assert_eq!(client.vote_calls_for(10), 3);
        assert_eq!(engine.cache().read().get_signers(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_activation_gating_skips_rpc() {
        let client = MockChainClient::shared(100);
        let engine = engine_with(client.clone(), IngestionConfig {
            activation_height: 50,
            ..config()
        });
        engine.refresh_chain_height().await.unwrap();

        assert_eq!(engine.ingest(IngestTask::first(20)).await, IngestStatus::Resolved);
        assert!(engine.cache().read().is_processed(20));
        assert_eq!(client.vote_calls(), 0);
    }

    #[tokio::test]
    async fn test_gap_fill_only_fetches_missing() {
        let client = MockChainClient::shared(100);
        for h in 1..=20 {
            client.set_votes(h, &["abc"]);
        }
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();
        engine.cache().write().record_votes(5, [ProviderKey::new("abc")]);

        let report = engine.gap_fill(1, 20).await;
        assert_eq!(report.requested, 19);
        assert_eq!(report.resolved, 19);
        assert_eq!(client.vote_calls_for(5), 0);
        assert_eq!(client.vote_calls(), 19);
    }

    #[tokio::test]
    async fn test_evicted_heights_still_advance() {
        let client = MockChainClient::shared(20);
        for h in 1..=20 {
            client.set_votes(h, &["abc", "def"]);
        }
        client.set_epoch(1, 1_000);
        let epochs = Arc::new(EpochTracker::new(client.clone(), 3, None));
        let engine = Arc::new(BlockIngestionEngine::new(
            client.clone(),
            SignatureCache::shared(3),
            epochs,
            IngestionConfig {
                start_height: Some(1),
                ..config()
            },
            64,
        ));
        let mut finalized = engine.subscribe_finalized();
        engine.refresh_chain_height().await.unwrap();

        let report = engine.gap_fill(1, 17).await;
        assert_eq!(report.resolved, 17);
        assert_eq!(engine.cache().read().size(), 3);

        engine.tick().await.unwrap();
        assert_eq!(engine.last_processed_height(), 17);
        // Evicted heights report the signer count seen when they were fetched
        let first = finalized.recv().await.unwrap();
        assert_eq!((first.height, first.signer_count), (1, Some(2)));
        assert_eq!(client.vote_calls_for(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_height_follows_retries_inline() {
        let client = MockChainClient::shared(100);
        client.push_response(70, ScriptedVotes::Error(ChainQueryError::Transport("reset".into())));
        client.set_votes(70, &["abc"]);
        // Not started: no retry worker runs
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();

        assert_eq!(engine.ensure_height(70).await, IngestStatus::Resolved);
        assert_eq!(client.vote_calls_for(70), 2);
        assert!(!engine.is_unresolved(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_height_gives_up_after_budget() {
        let client = MockChainClient::shared(100);
        for _ in 0..3 {
            client.push_response(70, ScriptedVotes::Error(ChainQueryError::Transport("reset".into())));
        }
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();

        assert_eq!(engine.ensure_height(70).await, IngestStatus::Unknown);
        assert!(engine.is_unresolved(70));
        assert_eq!(engine.ensure_height(70).await, IngestStatus::Unknown);
        assert_eq!(client.vote_calls_for(70), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_ensure_height_is_one_rpc() {
        let client = MockChainClient::shared(100);
        client.set_votes(42, &["abc"]);
        client.set_vote_delay(Duration::from_millis(50));
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();

        let (a, b) = tokio::join!(engine.ensure_height(42), engine.ensure_height(42));
        assert_eq!(a, IngestStatus::Resolved);
        assert_eq!(b, IngestStatus::Resolved);
        assert_eq!(client.vote_calls_for(42), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_pending_timers() {
        let client = MockChainClient::shared(100);
        let engine = engine(client.clone());
        engine.refresh_chain_height().await.unwrap();
        engine.start().unwrap();

        engine.ingest(IngestTask::first(50)).await;
        assert_eq!(engine.pending_retries(), 1);

        engine.stop();
        assert_eq!(engine.pending_retries(), 0);
        assert!(!engine.is_running());
        assert!(matches!(engine.start(), Err(TrackerError::EngineStopped)));

        let calls = client.vote_calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.vote_calls(), calls);
    }
}
