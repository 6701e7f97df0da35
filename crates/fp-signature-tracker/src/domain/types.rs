//! Core value types shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Block height. Heights start at 1.
pub type BlockHeight = u64;

/// Normalized finality provider identifier (trimmed, lower-case hex).
///
/// Signer sets and lookups only ever hold normalized keys, so matching is
/// case-insensitive regardless of how the chain or the caller spelled it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderKey(String);

impl ProviderKey {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        let stripped = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        Self(stripped.to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Set of providers observed signing a height.
pub type SignerSet = HashSet<ProviderKey>;

/// Signature status of one provider at one height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    /// Provider key is in the height's signer set
    Signed,
    /// Height has data and the provider is absent from it
    Missed,
    /// No resolvable data for the height
    Unknown,
}

impl BlockStatus {
    /// Classify a provider against an optional signer set.
    pub fn classify(signers: Option<&SignerSet>, provider: &ProviderKey) -> Self {
        match signers {
            Some(set) if set.contains(provider) => BlockStatus::Signed,
            Some(_) => BlockStatus::Missed,
            None => BlockStatus::Unknown,
        }
    }
}

/// Per-height signature record held by the signature cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockRecord {
    pub height: BlockHeight,
    pub signers: SignerSet,
    /// When the height was first recorded
    pub timestamp: DateTime<Utc>,
    /// No further verification passes expected
    pub processed: bool,
}

impl BlockRecord {
    pub fn new(height: BlockHeight, timestamp: DateTime<Utc>) -> Self {
        Self {
            height,
            signers: SignerSet::new(),
            timestamp,
            processed: false,
        }
    }

    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }
}

/// Epoch number and the last height of that epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochInfo {
    pub epoch_number: u64,
    pub boundary_height: BlockHeight,
}

impl EpochInfo {
    pub fn new(epoch_number: u64, boundary_height: BlockHeight) -> Self {
        Self {
            epoch_number,
            boundary_height,
        }
    }

    /// Constant epoch width implied by this boundary.
    ///
    /// Epoch N ends at `N * width`; epoch 0 is treated as spanning the whole
    /// boundary.
    pub fn derived_width(&self) -> Option<u64> {
        let width = if self.epoch_number == 0 {
            self.boundary_height
        } else {
            self.boundary_height / self.epoch_number
        };
        (width > 0).then_some(width)
    }
}

/// Epoch containing `height` for a constant `width`.
///
/// Heights `1..=width` are epoch 1, so a boundary height belongs to the epoch
/// it closes.
pub fn epoch_of(height: BlockHeight, width: u64) -> u64 {
    if width == 0 {
        return 0;
    }
    height.div_ceil(width)
}

/// First and last height of `epoch` for a constant `width`.
pub fn epoch_bounds(epoch: u64, width: u64) -> (BlockHeight, BlockHeight) {
    if epoch == 0 || width == 0 {
        return (0, 0);
    }
    ((epoch - 1) * width + 1, epoch * width)
}
