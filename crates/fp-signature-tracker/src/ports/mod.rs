//! Ports (hexagonal architecture boundaries)

pub mod inbound;
pub mod outbound;

pub use inbound::{ConnectionId, LiveSignatureFeed, SignatureStatsApi};
pub use outbound::{
    BlockchainQueryClient, ChainQueryError, ChainQueryResult, FinalityProviderInfo,
    MockChainClient, ResultCacheStore, ScriptedVotes, VoteRecord,
};
