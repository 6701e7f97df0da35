//! # Signature Cache
//!
//! Bounded per-height store of signer sets.
//!
//! ## Rules
//!
//! - A height is created on its first successful fetch and merged afterwards.
//! - Signer sets only grow; adding a new signer clears the processed flag so
//!   the engine re-verifies the height.
//! - Capacity counts distinct heights. Once exceeded, the oldest height goes.
//!
//! The cache has one logical writer (the ingestion engine). Readers share it
//! through [`SharedSignatureCache`] and never mutate.

use crate::domain::types::{BlockHeight, BlockRecord, BlockStatus, ProviderKey, SignerSet};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cache handle shared between the engine and readers.
pub type SharedSignatureCache = Arc<RwLock<SignatureCache>>;

/// Result of merging votes into a height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Height did not exist before this merge
    pub created: bool,
    /// Signers not seen before at this height
    pub added: usize,
    /// Heights evicted to stay within capacity
    pub evicted: usize,
}

impl MergeOutcome {
    pub fn has_new_signers(&self) -> bool {
        self.added > 0
    }
}

/// Bounded per-height signature store.
#[derive(Debug)]
pub struct SignatureCache {
    capacity: usize,
    records: BTreeMap<BlockHeight, BlockRecord>,
}

impl SignatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: BTreeMap::new(),
        }
    }

    /// Wrap a new cache for sharing.
    pub fn shared(capacity: usize) -> SharedSignatureCache {
        Arc::new(RwLock::new(Self::new(capacity)))
    }

    pub fn has_data(&self, height: BlockHeight) -> bool {
        self.records.contains_key(&height)
    }

    pub fn is_processed(&self, height: BlockHeight) -> bool {
        self.records.get(&height).is_some_and(|r| r.processed)
    }

    /// Merge `signers` into `height`, creating the record if needed.
    pub fn record_votes<I>(&mut self, height: BlockHeight, signers: I) -> MergeOutcome
    where
        I: IntoIterator<Item = ProviderKey>,
    {
        self.record_votes_at(height, signers, Utc::now())
    }

    /// Same as [`record_votes`](Self::record_votes) with an explicit observation time.
    pub fn record_votes_at<I>(
        &mut self,
        height: BlockHeight,
        signers: I,
        observed_at: DateTime<Utc>,
    ) -> MergeOutcome
    where
        I: IntoIterator<Item = ProviderKey>,
    {
        let created = !self.records.contains_key(&height);
        let record = self
            .records
            .entry(height)
            .or_insert_with(|| BlockRecord::new(height, observed_at));

        let mut added = 0usize;
        for signer in signers {
            if !signer.is_empty() && record.signers.insert(signer) {
                added += 1;
            }
        }
        if added > 0 {
            record.processed = false;
        }

        let evicted = self.enforce_capacity();
        MergeOutcome {
            created,
            added,
            evicted,
        }
    }

    /// Record a height with no signers and mark it processed.
    ///
    /// Used for heights below the activation height and for heights where
    /// the chain repeatedly confirmed that nobody voted.
    pub fn record_empty_processed(&mut self, height: BlockHeight) -> MergeOutcome {
        let outcome = self.record_votes(height, std::iter::empty());
        self.mark_processed(height);
        outcome
    }

    pub fn get_signers(&self, height: BlockHeight) -> Option<&SignerSet> {
        self.records.get(&height).map(|r| &r.signers)
    }

    pub fn get_record(&self, height: BlockHeight) -> Option<&BlockRecord> {
        self.records.get(&height)
    }

    pub fn get_timestamp(&self, height: BlockHeight) -> Option<DateTime<Utc>> {
        self.records.get(&height).map(|r| r.timestamp)
    }

    pub fn contains_signer(&self, height: BlockHeight, provider: &ProviderKey) -> bool {
        self.get_signers(height).is_some_and(|s| s.contains(provider))
    }

    /// Signature status of `provider` at `height`.
    pub fn status_of(&self, height: BlockHeight, provider: &ProviderKey) -> BlockStatus {
        BlockStatus::classify(self.get_signers(height), provider)
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop the lowest height. Returns it, if any.
    pub fn evict_oldest(&mut self) -> Option<BlockHeight> {
        self.records.pop_first().map(|(height, _)| height)
    }

    /// Mark a height as needing no further verification.
    ///
    /// Returns false when the height has no record.
    pub fn mark_processed(&mut self, height: BlockHeight) -> bool {
        match self.records.get_mut(&height) {
            Some(record) => {
                record.processed = true;
                true
            }
            None => false,
        }
    }

    pub fn oldest_height(&self) -> Option<BlockHeight> {
        self.records.keys().next().copied()
    }

    pub fn latest_height(&self) -> Option<BlockHeight> {
        self.records.keys().next_back().copied()
    }

    /// Heights in `[start, end]` that have no record.
    pub fn missing_heights(&self, start: BlockHeight, end: BlockHeight) -> Vec<BlockHeight> {
        if start > end {
            return Vec::new();
        }
        (start..=end).filter(|h| !self.records.contains_key(h)).collect()
    }

    /// Records in `[start, end]`, ascending.
    pub fn records_in(
        &self,
        start: BlockHeight,
        end: BlockHeight,
    ) -> impl Iterator<Item = &BlockRecord> {
        self.records.range(start..=end.max(start)).map(|(_, r)| r)
    }

    fn enforce_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.size() > self.capacity {
            if self.evict_oldest().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }
}
