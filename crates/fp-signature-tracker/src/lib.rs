//! # fp-signature-tracker
//!
//! Tracks which finality providers signed each finalized block and derives
//! signature-rate statistics from it.
//!
//! ## Overview
//!
//! - **Ingestion**: polls the chain tip, fetches votes per finalizable height,
//!   retries empty or failed fetches with exponential backoff
//! - **Signature cache**: bounded height-ordered store of signer sets
//! - **Epochs**: caches the current epoch and maps heights to epochs
//! - **Stats**: per-provider signed/missed/unknown counts over a window
//! - **Live feed**: initial snapshot, then one event per finalized height
//!
//! ## Architecture
//!
//! ```text
//! chain ──votes──→ BlockIngestionEngine ──→ SignatureCache ←── StatsComputer
//!                        │                                        ↑
//!                        └── HeightFinalized ──→ Dispatcher ──→ LiveBroadcastHub
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use fp_signature_tracker::{SignatureTracker, StatsQuery, TrackerConfig};
//!
//! let tracker = SignatureTracker::from_config(TrackerConfig::from_env()?)?;
//! tracker.start()?;
//!
//! let stats = tracker.stats().get_stats(StatsQuery::last_n("abc123", 100)).await?;
//! println!("{:.2}%", stats.signature_rate);
//! ```

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod metrics;
pub mod ports;
pub mod service;

pub use application::{
    BlockIngestionEngine, EpochTracker, LiveBroadcastHub, StatsComputer, SubscriptionStream,
};
pub use config::{Network, TrackerConfig};
pub use domain::{
    BlockHeight, BlockStatus, EpochAggregate, EpochInfo, ProviderKey, ProviderSignatureSummary,
    SignatureStats, StatsQuery,
};
pub use error::{TrackerError, TrackerResult};
pub use events::{HeightFinalized, SignatureEvent};
pub use service::SignatureTracker;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
