//! Stats query model and the signed/missed/unknown accumulator.
//!
//! ## Rate policy
//!
//! `signature_rate = signed / (signed + missed) * 100`. Unknown heights are
//! excluded from both numerator and denominator. A window with nothing
//! signable has rate `0.0`.

use crate::domain::types::{BlockHeight, BlockStatus, ProviderKey};
use crate::error::{TrackerError, TrackerResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Window selector of a stats query. The two forms are mutually exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSelector {
    /// Explicit inclusive range
    Range { start: BlockHeight, end: BlockHeight },
    /// The `n` most recent settled heights, ending at `current_height - 1`
    LastN { n: u64 },
}

/// A signature stats query for one provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatsQuery {
    pub provider_key: ProviderKey,
    pub window: WindowSelector,
}

impl StatsQuery {
    pub fn range(provider_key: impl Into<ProviderKey>, start: BlockHeight, end: BlockHeight) -> Self {
        Self {
            provider_key: provider_key.into(),
            window: WindowSelector::Range { start, end },
        }
    }

    pub fn last_n(provider_key: impl Into<ProviderKey>, n: u64) -> Self {
        Self {
            provider_key: provider_key.into(),
            window: WindowSelector::LastN { n },
        }
    }

    /// Build a query from the raw optional parameters of an API request.
    pub fn from_params(
        provider_key: &str,
        start_height: Option<BlockHeight>,
        end_height: Option<BlockHeight>,
        last_n_blocks: Option<u64>,
    ) -> TrackerResult<Self> {
        let window = match (start_height, end_height, last_n_blocks) {
            (Some(start), Some(end), None) => WindowSelector::Range { start, end },
            (None, None, Some(n)) => WindowSelector::LastN { n },
            (None, None, None) => {
                return Err(TrackerError::Validation(
                    "either start_height/end_height or last_n_blocks is required".into(),
                ))
            }
            (_, _, Some(_)) => {
                return Err(TrackerError::Validation(
                    "last_n_blocks cannot be combined with start_height/end_height".into(),
                ))
            }
            _ => {
                return Err(TrackerError::Validation(
                    "start_height and end_height must be given together".into(),
                ))
            }
        };
        Ok(Self {
            provider_key: ProviderKey::new(provider_key),
            window,
        })
    }
}

/// Absolute `[start, end]` window after resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub start: BlockHeight,
    pub end: BlockHeight,
}

impl ResolvedWindow {
    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn heights(&self) -> std::ops::RangeInclusive<BlockHeight> {
        self.start..=self.end
    }
}

impl StatsQuery {
    /// Checks that need no chain data: key, range order and window size.
    pub fn validate(&self, max_window_blocks: u64) -> TrackerResult<()> {
        if self.provider_key.is_empty() {
            return Err(TrackerError::Validation("provider key is empty".into()));
        }

        let requested = match self.window {
            WindowSelector::Range { start, end } => {
                if start == 0 {
                    return Err(TrackerError::Validation("start_height must be >= 1".into()));
                }
                if start > end {
                    return Err(TrackerError::Validation(format!(
                        "start_height {start} is greater than end_height {end}"
                    )));
                }
                end - start + 1
            }
            WindowSelector::LastN { n } => {
                if n == 0 {
                    return Err(TrackerError::Validation("last_n_blocks must be > 0".into()));
                }
                n
            }
        };

        if requested > max_window_blocks {
            return Err(TrackerError::Validation(format!(
                "window of {requested} blocks exceeds the maximum of {max_window_blocks}"
            )));
        }
        Ok(())
    }
}

/// Validate a query and resolve it to an absolute window.
///
/// `current_height` is only consulted for `LastN`.
pub fn resolve_window(
    query: &StatsQuery,
    current_height: BlockHeight,
    max_window_blocks: u64,
) -> TrackerResult<ResolvedWindow> {
    query.validate(max_window_blocks)?;

    match query.window {
        WindowSelector::Range { start, end } => Ok(ResolvedWindow { start, end }),
        WindowSelector::LastN { n } => {
            if current_height < 2 {
                return Err(TrackerError::Validation(format!(
                    "chain height {current_height} has no settled blocks"
                )));
            }
            let end = current_height - 1;
            let start = end.saturating_sub(n - 1).max(1);
            Ok(ResolvedWindow { start, end })
        }
    }
}

/// `signed / (signed + missed) * 100`, `0.0` when nothing was signable.
pub fn signature_rate(signed: u64, missed: u64) -> f64 {
    let signable = signed + missed;
    if signable == 0 {
        return 0.0;
    }
    signed as f64 / signable as f64 * 100.0
}

/// Per-epoch slice of a stats window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochSignatureBreakdown {
    pub epoch: u64,
    /// First height of the window inside this epoch
    pub start_height: BlockHeight,
    /// Last height of the window inside this epoch
    pub end_height: BlockHeight,
    pub total_blocks: u64,
    pub signed_blocks: u64,
    pub missed_blocks: u64,
    pub unknown_blocks: u64,
    pub signature_rate: f64,
}

/// Signature statistics of one provider over one window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignatureStats {
    pub provider_key: ProviderKey,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
    pub total_blocks: u64,
    pub signed_blocks: u64,
    pub missed_blocks: u64,
    pub unknown_blocks: u64,
    pub signature_rate: f64,
    /// Heights with data where the provider did not sign
    pub missed_heights: Vec<BlockHeight>,
    /// Per-epoch breakdown, ascending by epoch
    pub epochs: Vec<EpochSignatureBreakdown>,
}

#[derive(Default)]
struct Bucket {
    start: BlockHeight,
    end: BlockHeight,
    signed: u64,
    missed: u64,
    unknown: u64,
}

impl Bucket {
    fn total(&self) -> u64 {
        self.signed + self.missed + self.unknown
    }
}

/// Folds classified heights into window totals and epoch buckets.
pub struct StatsAccumulator {
    provider_key: ProviderKey,
    window: ResolvedWindow,
    signed: u64,
    missed: u64,
    unknown: u64,
    missed_heights: Vec<BlockHeight>,
    buckets: BTreeMap<u64, Bucket>,
}

impl StatsAccumulator {
    pub fn new(provider_key: ProviderKey, window: ResolvedWindow) -> Self {
        Self {
            provider_key,
            window,
            signed: 0,
            missed: 0,
            unknown: 0,
            missed_heights: Vec::new(),
            buckets: BTreeMap::new(),
        }
    }

    /// Count one height. Each height must be added exactly once.
    pub fn add(&mut self, height: BlockHeight, epoch: u64, status: BlockStatus) {
        let bucket = self.buckets.entry(epoch).or_insert_with(|| Bucket {
            start: height,
            end: height,
            ..Bucket::default()
        });
        bucket.start = bucket.start.min(height);
        bucket.end = bucket.end.max(height);

        match status {
            BlockStatus::Signed => {
                self.signed += 1;
                bucket.signed += 1;
            }
            BlockStatus::Missed => {
                self.missed += 1;
                bucket.missed += 1;
                self.missed_heights.push(height);
            }
            BlockStatus::Unknown => {
                self.unknown += 1;
                bucket.unknown += 1;
            }
        }
    }

    pub fn finish(mut self) -> SignatureStats {
        self.missed_heights.sort_unstable();
        let epochs = self
            .buckets
            .into_iter()
            .map(|(epoch, b)| EpochSignatureBreakdown {
                epoch,
                start_height: b.start,
                end_height: b.end,
                total_blocks: b.total(),
                signed_blocks: b.signed,
                missed_blocks: b.missed,
                unknown_blocks: b.unknown,
                signature_rate: signature_rate(b.signed, b.missed),
            })
            .collect();

        SignatureStats {
            provider_key: self.provider_key,
            start_height: self.window.start,
            end_height: self.window.end,
            total_blocks: self.signed + self.missed + self.unknown,
            signed_blocks: self.signed,
            missed_blocks: self.missed,
            unknown_blocks: self.unknown,
            signature_rate: signature_rate(self.signed, self.missed),
            missed_heights: self.missed_heights,
            epochs,
        }
    }
}

/// Rolling participation of all providers within one epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochAggregate {
    pub epoch: u64,
    pub start_height: BlockHeight,
    /// Last height folded in so far
    pub end_height: BlockHeight,
    pub blocks_with_data: u64,
    pub unknown_blocks: u64,
    pub average_signers: f64,
    /// Heights signed per provider
    pub signed_by_provider: HashMap<ProviderKey, u64>,
}

impl EpochAggregate {
    pub fn new(epoch: u64, start_height: BlockHeight) -> Self {
        Self {
            epoch,
            start_height,
            end_height: start_height,
            blocks_with_data: 0,
            unknown_blocks: 0,
            average_signers: 0.0,
            signed_by_provider: HashMap::new(),
        }
    }

    /// Participation rate of `provider` over the heights with data.
    pub fn provider_rate(&self, provider: &ProviderKey) -> f64 {
        let signed = self.signed_by_provider.get(provider).copied().unwrap_or(0);
        signature_rate(signed, self.blocks_with_data.saturating_sub(signed))
    }
}

/// Summary row of the all-providers listing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderSignatureSummary {
    pub provider_key: ProviderKey,
    pub moniker: Option<String>,
    pub jailed: bool,
    pub signed_blocks: u64,
    pub missed_blocks: u64,
    pub unknown_blocks: u64,
    pub signature_rate: f64,
}
