//! Application layer: the components that run against the ports.

pub mod broadcast;
pub mod dispatch;
pub mod epoch_tracker;
pub mod inflight;
pub mod ingestion;
pub mod scheduler;
pub mod stats;

pub use broadcast::{LiveBroadcastHub, SseSubscription, SubscriptionStream};
pub use dispatch::FinalizationDispatcher;
pub use epoch_tracker::{EpochTracker, EpochTransition};
pub use inflight::{Claim, InflightGuard, InflightRegistry};
pub use ingestion::{BlockIngestionEngine, GapFillReport, IngestStatus};
pub use scheduler::RetryScheduler;
pub use stats::{stats_cache_key, StatsComputer};
