//! Error types for the signature tracker.
//!
//! Per-height fetch failures never surface here as fatal: the ingestion
//! engine absorbs them into its retry policy. What reaches callers is either a
//! malformed query or a broken configuration, plus chain failures that an
//! on-demand lookup could not work around.

use crate::ports::outbound::ChainQueryError;
use thiserror::Error;

/// Signature tracker errors
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Network or RPC failure while talking to the chain
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// Requested height has not been produced yet
    #[error("Height {requested} is beyond the chain tip {current}")]
    FutureHeight { requested: u64, current: u64 },

    /// Malformed query (bad window, empty provider key, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or inconsistent configuration at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The chain reported an epoch that cannot be used for height mapping
    #[error("Epoch data unavailable: {0}")]
    EpochUnavailable(String),

    /// Engine has been stopped
    #[error("Ingestion engine is not running")]
    EngineStopped,

    /// Stats result could not be (de)serialized for the result cache
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrackerError {
    /// Whether this error came from the caller's input.
    pub fn is_validation(&self) -> bool {
        matches!(self, TrackerError::Validation(_))
    }
}

impl From<ChainQueryError> for TrackerError {
    fn from(err: ChainQueryError) -> Self {
        match err {
            ChainQueryError::FutureHeight { requested, current } => {
                TrackerError::FutureHeight { requested, current }
            }
            ChainQueryError::UnknownNetwork(network) => {
                TrackerError::Configuration(format!("no chain endpoints for network {network}"))
            }
            other => TrackerError::TransientFetch(other.to_string()),
        }
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
