//! Driven Ports (SPI - Outbound Dependencies)
//!
//! The tracker talks to two external collaborators: the chain (height, votes,
//! epochs, provider listings) and a generic TTL key/value store used to
//! memoize stats results.

use crate::config::Network;
use crate::domain::types::{BlockHeight, EpochInfo, ProviderKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One finality vote as reported by the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Hex public key of the signer, as returned (not yet normalized)
    pub signer_pk_hex: String,
}

impl VoteRecord {
    pub fn new(signer_pk_hex: impl Into<String>) -> Self {
        Self {
            signer_pk_hex: signer_pk_hex.into(),
        }
    }

    pub fn provider_key(&self) -> ProviderKey {
        ProviderKey::new(&self.signer_pk_hex)
    }
}

/// Finality provider as listed by the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityProviderInfo {
    pub btc_pk: ProviderKey,
    pub moniker: Option<String>,
    pub jailed: bool,
    pub slashed: bool,
}

/// Chain query failures.
///
/// Transport and future-height failures must stay distinguishable: the
/// former is retried, the latter is abandoned without using retry budget.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainQueryError {
    /// Network, HTTP or RPC-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The requested height has not been produced yet
    #[error("Height {requested} not yet produced (tip {current})")]
    FutureHeight { requested: u64, current: u64 },

    /// Response body did not have the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// No endpoints configured for the network
    #[error("No endpoints configured for network {0}")]
    UnknownNetwork(Network),
}

impl ChainQueryError {
    pub fn is_future_height(&self) -> bool {
        matches!(self, ChainQueryError::FutureHeight { .. })
    }

    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ChainQueryError::Transport(_) => "transport",
            ChainQueryError::FutureHeight { .. } => "future_height",
            ChainQueryError::Decode(_) => "decode",
            ChainQueryError::UnknownNetwork(_) => "unknown_network",
        }
    }
}

pub type ChainQueryResult<T> = Result<T, ChainQueryError>;

/// Read-only chain query interface.
///
/// Implementations own their request timeout; callers add none.
#[async_trait]
pub trait BlockchainQueryClient: Send + Sync {
    /// Latest produced block height
    async fn get_current_height(&self) -> ChainQueryResult<BlockHeight>;

    /// Finality votes cast for `height`
    async fn get_votes_at_height(&self, height: BlockHeight) -> ChainQueryResult<Vec<VoteRecord>>;

    /// Current epoch number and its boundary height
    async fn get_current_epoch(&self) -> ChainQueryResult<EpochInfo>;

    /// Every finality provider registered on `network`
    async fn get_all_finality_providers(
        &self,
        network: Network,
    ) -> ChainQueryResult<Vec<FinalityProviderInfo>>;
}

/// Generic TTL key/value store.
///
/// Used only for stats result memoization, never by the signature cache.
#[async_trait]
pub trait ResultCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Duration);
}

// =============================================================================
// Mock Implementations (for testing)
// =============================================================================

/// Scripted response for one votes request.
#[derive(Clone, Debug)]
pub enum ScriptedVotes {
    Votes(Vec<VoteRecord>),
    Error(ChainQueryError),
}

/// Scriptable in-memory chain client for tests.
///
/// Votes for a height are served from a per-height script queue first, then
/// from the height's steady-state votes (empty if none were set). An optional
/// per-call delay makes concurrent callers overlap on the same request.
#[derive(Default)]
pub struct MockChainClient {
    height: AtomicU64,
    epoch: Mutex<Option<EpochInfo>>,
    votes: Mutex<HashMap<BlockHeight, Vec<VoteRecord>>>,
    scripts: Mutex<HashMap<BlockHeight, VecDeque<ScriptedVotes>>>,
    providers: Mutex<Vec<FinalityProviderInfo>>,
    vote_delay: Mutex<Option<Duration>>,
    height_calls: AtomicUsize,
    vote_calls: AtomicUsize,
    epoch_calls: AtomicUsize,
    calls_per_height: Mutex<HashMap<BlockHeight, usize>>,
}

impl MockChainClient {
    pub fn new(current_height: BlockHeight) -> Self {
        let client = Self::default();
        client.set_height(current_height);
        client
    }

    pub fn shared(current_height: BlockHeight) -> Arc<Self> {
        Arc::new(Self::new(current_height))
    }

    pub fn set_height(&self, height: BlockHeight) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_epoch(&self, epoch_number: u64, boundary_height: BlockHeight) {
        *self.epoch.lock() = Some(EpochInfo::new(epoch_number, boundary_height));
    }

    /// Steady-state votes for `height`.
    pub fn set_votes(&self, height: BlockHeight, signers: &[&str]) {
        let votes = signers.iter().map(|s| VoteRecord::new(*s)).collect();
        self.votes.lock().insert(height, votes);
    }

    /// Queue a one-shot response for `height`, served before steady state.
    pub fn push_response(&self, height: BlockHeight, response: ScriptedVotes) {
        self.scripts
            .lock()
            .entry(height)
            .or_default()
            .push_back(response);
    }

    pub fn set_providers(&self, providers: Vec<FinalityProviderInfo>) {
        *self.providers.lock() = providers;
    }

    pub fn set_vote_delay(&self, delay: Duration) {
        *self.vote_delay.lock() = Some(delay);
    }

    pub fn height_calls(&self) -> usize {
        self.height_calls.load(Ordering::SeqCst)
    }

    pub fn vote_calls(&self) -> usize {
        self.vote_calls.load(Ordering::SeqCst)
    }

    pub fn vote_calls_for(&self, height: BlockHeight) -> usize {
        self.calls_per_height
            .lock()
            .get(&height)
            .copied()
            .unwrap_or(0)
    }

    pub fn epoch_calls(&self) -> usize {
        self.epoch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockchainQueryClient for MockChainClient {
    async fn get_current_height(&self) -> ChainQueryResult<BlockHeight> {
        self.height_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn get_votes_at_height(&self, height: BlockHeight) -> ChainQueryResult<Vec<VoteRecord>> {
        self.vote_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls_per_height.lock().entry(height).or_insert(0) += 1;

        let delay = *self.vote_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let current = self.height.load(Ordering::SeqCst);
        if height > current {
            return Err(ChainQueryError::FutureHeight {
                requested: height,
                current,
            });
        }

        let scripted = self
            .scripts
            .lock()
            .get_mut(&height)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(ScriptedVotes::Votes(votes)) => Ok(votes),
            Some(ScriptedVotes::Error(err)) => Err(err),
            None => Ok(self.votes.lock().get(&height).cloned().unwrap_or_default()),
        }
    }

    async fn get_current_epoch(&self) -> ChainQueryResult<EpochInfo> {
        self.epoch_calls.fetch_add(1, Ordering::SeqCst);
        (*self.epoch.lock())
            .ok_or_else(|| ChainQueryError::Transport("epoch not scripted".into()))
    }

    async fn get_all_finality_providers(
        &self,
        _network: Network,
    ) -> ChainQueryResult<Vec<FinalityProviderInfo>> {
        Ok(self.providers.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_serves_script_before_steady_state() {
        let client = MockChainClient::new(100);
        client.set_votes(10, &["a"]);
        client.push_response(10, ScriptedVotes::Error(ChainQueryError::Transport("x".into())));

        assert!(client.get_votes_at_height(10).await.is_err());
        assert_eq!(client.get_votes_at_height(10).await.unwrap().len(), 1);
        assert_eq!(client.vote_calls_for(10), 2);
    }

    #[tokio::test]
    async fn test_mock_reports_future_height() {
        let client = MockChainClient::new(100);
        let err = client.get_votes_at_height(101).await.unwrap_err();
        assert!(err.is_future_height());
        assert_eq!(err.kind(), "future_height");
    }

    #[test]
    fn test_vote_record_normalizes_key() {
        assert_eq!(VoteRecord::new("ABC").provider_key().as_str(), "abc");
    }
}
