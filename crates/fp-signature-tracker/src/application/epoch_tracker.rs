//! # Epoch Tracker
//!
//! Caches the chain's current epoch and maps heights to epochs.
//!
//! Epoch width is constant: either configured, or derived from the current
//! epoch's boundary. Height-to-epoch lookups are memoized only for heights in
//! the retained epochs up to the current one, so the memo holds at most
//! `(retention + 1) * width` entries. It is trimmed again whenever the epoch
//! number advances.

use crate::domain::types::{epoch_bounds, epoch_of, BlockHeight, EpochInfo};
use crate::error::{TrackerError, TrackerResult};
use crate::ports::outbound::BlockchainQueryClient;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A change of the cached epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpochTransition {
    pub previous: Option<EpochInfo>,
    pub current: EpochInfo,
    /// Memo entries dropped for falling out of retention
    pub evicted: usize,
}

pub struct EpochTracker {
    client: Arc<dyn BlockchainQueryClient>,
    retention: u64,
    fixed_width: Option<u64>,
    current: RwLock<Option<EpochInfo>>,
    memo: RwLock<HashMap<BlockHeight, u64>>,
    /// Serializes chain refreshes so one crossing issues one query
    refresh_lock: tokio::sync::Mutex<()>,
}

impl EpochTracker {
    pub fn new(client: Arc<dyn BlockchainQueryClient>, retention: u64, fixed_width: Option<u64>) -> Self {
        Self {
            client,
            retention,
            fixed_width: fixed_width.filter(|w| *w > 0),
            current: RwLock::new(None),
            memo: RwLock::new(HashMap::new()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Cached epoch, without touching the chain.
    pub fn cached(&self) -> Option<EpochInfo> {
        *self.current.read()
    }

    /// Current epoch, querying the chain once if nothing is cached.
    pub async fn current_epoch(&self) -> TrackerResult<EpochInfo> {
        if let Some(epoch) = self.cached() {
            return Ok(epoch);
        }
        self.refresh(None).await.map(|(epoch, _)| epoch)
    }

    /// Re-query the epoch when `height` lies past the cached boundary.
    ///
    /// Returns the transition when the epoch number increased.
    pub async fn check_and_update(&self, height: BlockHeight) -> TrackerResult<Option<EpochTransition>> {
        if let Some(epoch) = self.cached() {
            if height <= epoch.boundary_height {
                return Ok(None);
            }
        }

        let (_, transition) = self.refresh(Some(height)).await?;
        Ok(transition)
    }

    async fn refresh(
        &self,
        past_height: Option<BlockHeight>,
    ) -> TrackerResult<(EpochInfo, Option<EpochTransition>)> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while this one waited
        let previous = self.cached();
        if let Some(epoch) = previous {
            let still_current = past_height.map_or(true, |h| h <= epoch.boundary_height);
            if still_current {
                return Ok((epoch, None));
            }
        }

        let fetched = self.client.get_current_epoch().await?;
        if fetched.boundary_height == 0 {
            return Err(TrackerError::EpochUnavailable(format!(
                "epoch {} reported a zero boundary",
                fetched.epoch_number
            )));
        }

        if let Some(prev) = previous {
            if fetched.boundary_height <= prev.boundary_height {
                debug!(
                    epoch = prev.epoch_number,
                    boundary = prev.boundary_height,
                    "Chain has not crossed the cached epoch boundary yet"
                );
                return Ok((prev, None));
            }
        }

        *self.current.write() = Some(fetched);

        let advanced = previous.map_or(true, |p| fetched.epoch_number > p.epoch_number);
        if !advanced {
            warn!(
                epoch = fetched.epoch_number,
                boundary = fetched.boundary_height,
                "Epoch boundary moved without an epoch increase"
            );
            return Ok((fetched, None));
        }

        let evicted = self.evict_before(fetched.epoch_number.saturating_sub(self.retention));
        info!(
            epoch = fetched.epoch_number,
            boundary = fetched.boundary_height,
            evicted,
            "Epoch updated"
        );
        Ok((
            fetched,
            Some(EpochTransition {
                previous,
                current: fetched,
                evicted,
            }),
        ))
    }

    fn evict_before(&self, oldest_kept: u64) -> usize {
        let mut memo = self.memo.write();
        let before = memo.len();
        memo.retain(|_, epoch| *epoch >= oldest_kept);
        before - memo.len()
    }

    /// Constant epoch width in use, if known.
    pub fn width(&self) -> Option<u64> {
        self.fixed_width
            .or_else(|| self.cached().and_then(|e| e.derived_width()))
    }

    /// Epoch containing `height`, or `None` while no width is known.
    pub fn epoch_for_height(&self, height: BlockHeight) -> Option<u64> {
        if let Some(epoch) = self.memo.read().get(&height) {
            return Some(*epoch);
        }
        let epoch = epoch_of(height, self.width()?);
        if self.is_retained(epoch) {
            self.memo.write().insert(height, epoch);
        }
        Some(epoch)
    }

    fn is_retained(&self, epoch: u64) -> bool {
        self.cached().is_some_and(|current| {
            epoch <= current.epoch_number
                && epoch >= current.epoch_number.saturating_sub(self.retention)
        })
    }

    /// First and last height of `epoch`.
    pub fn epoch_bounds(&self, epoch: u64) -> Option<(BlockHeight, BlockHeight)> {
        let width = self.width()?;
        (epoch > 0).then(|| epoch_bounds(epoch, width))
    }

    pub fn memo_len(&self) -> usize {
        self.memo.read().len()
    }
}
