//! Domain layer: value types, the signature cache, stats math and the
//! ingestion policy. Nothing here performs I/O.

pub mod ingest;
pub mod signature_cache;
pub mod stats;
pub mod types;

pub use ingest::{
    finalized_tip, is_finalizable, next_step, FetchOutcome, IngestTask, NextStep, RetryPolicy,
};
pub use signature_cache::{MergeOutcome, SharedSignatureCache, SignatureCache};
pub use stats::{
    resolve_window, signature_rate, EpochAggregate, EpochSignatureBreakdown,
    ProviderSignatureSummary, ResolvedWindow, SignatureStats, StatsAccumulator, StatsQuery,
    WindowSelector,
};
pub use types::{
    epoch_bounds, epoch_of, BlockHeight, BlockRecord, BlockStatus, EpochInfo, ProviderKey,
    SignerSet,
};
