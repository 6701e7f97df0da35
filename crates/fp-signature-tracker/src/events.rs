//! Events pushed to live subscribers and published by the ingestion engine.

use crate::domain::stats::signature_rate;
use crate::domain::types::{BlockHeight, BlockStatus, ProviderKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A height whose data has settled, published once per advance of the
/// engine's last processed height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeightFinalized {
    pub height: BlockHeight,
    pub epoch: Option<u64>,
    /// `None` when the height settled without data
    pub signer_count: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Status of one provider at one height, as sent to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignatureStatus {
    pub height: BlockHeight,
    pub status: BlockStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One-time snapshot sent right after subscribing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InitialSnapshot {
    pub provider_key: ProviderKey,
    pub current_height: BlockHeight,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
    pub signed_blocks: u64,
    pub missed_blocks: u64,
    pub unknown_blocks: u64,
    pub signature_rate: f64,
    /// Ascending by height
    pub blocks: Vec<BlockSignatureStatus>,
}

impl InitialSnapshot {
    pub fn new(
        provider_key: ProviderKey,
        current_height: BlockHeight,
        blocks: Vec<BlockSignatureStatus>,
    ) -> Self {
        let count = |wanted: BlockStatus| blocks.iter().filter(|b| b.status == wanted).count() as u64;
        let signed_blocks = count(BlockStatus::Signed);
        let missed_blocks = count(BlockStatus::Missed);
        let unknown_blocks = count(BlockStatus::Unknown);

        Self {
            start_height: blocks.first().map_or(0, |b| b.height),
            end_height: blocks.last().map_or(0, |b| b.height),
            provider_key,
            current_height,
            signed_blocks,
            missed_blocks,
            unknown_blocks,
            signature_rate: signature_rate(signed_blocks, missed_blocks),
            blocks,
        }
    }

    pub fn window_size(&self) -> usize {
        self.blocks.len()
    }
}

/// Per-subscriber event for a newly finalized height.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignatureEvent {
    pub provider_key: ProviderKey,
    pub height: BlockHeight,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    pub status: BlockStatus,
    pub signer_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Everything a subscriber can receive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignatureEvent {
    Initial(InitialSnapshot),
    Block(BlockSignatureEvent),
}

impl SignatureEvent {
    /// Stream event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            SignatureEvent::Initial(_) => "initial",
            SignatureEvent::Block(_) => "block",
        }
    }
}
