//! # Tracker Metrics
//!
//! Prometheus metrics for ingestion progress, cache pressure and subscribers.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! fp-signature-tracker = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `fp_heights_ingested_total` - Heights whose votes were recorded
//! - `fp_vote_fetch_failures_total` - Failed vote fetches (by kind)
//! - `fp_retries_scheduled_total` - Retry and verification passes scheduled
//! - `fp_heights_unknown_total` - Heights left without data after the retry budget
//! - `fp_cache_evictions_total` - Heights evicted from the signature cache
//! - `fp_last_processed_height` - Engine's last processed height
//! - `fp_chain_height` - Last observed chain height
//! - `fp_active_subscriptions` - Live subscribers
//! - `fp_stats_cache_total` - Stats result cache lookups (by outcome)

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref HEIGHTS_INGESTED: IntCounter = register_int_counter!(
        "fp_heights_ingested_total",
        "Total number of heights whose votes were recorded"
    )
    .expect("Failed to create HEIGHTS_INGESTED metric");

    /// Failed vote fetches, labeled by error kind
    pub static ref VOTE_FETCH_FAILURES: IntCounterVec = register_int_counter_vec!(
        "fp_vote_fetch_failures_total",
        "Total number of failed vote fetches",
        &["kind"]
    )
    .expect("Failed to create VOTE_FETCH_FAILURES metric");

    pub static ref RETRIES_SCHEDULED: IntCounter = register_int_counter!(
        "fp_retries_scheduled_total",
        "Total number of retry and verification passes scheduled"
    )
    .expect("Failed to create RETRIES_SCHEDULED metric");

    pub static ref HEIGHTS_UNKNOWN: IntCounter = register_int_counter!(
        "fp_heights_unknown_total",
        "Total number of heights left unknown after exhausting retries"
    )
    .expect("Failed to create HEIGHTS_UNKNOWN metric");

    pub static ref CACHE_EVICTIONS: IntCounter = register_int_counter!(
        "fp_cache_evictions_total",
        "Total number of heights evicted from the signature cache"
    )
    .expect("Failed to create CACHE_EVICTIONS metric");

    pub static ref LAST_PROCESSED_HEIGHT: IntGauge = register_int_gauge!(
        "fp_last_processed_height",
        "Last height settled by the ingestion engine"
    )
    .expect("Failed to create LAST_PROCESSED_HEIGHT metric");

    pub static ref CHAIN_HEIGHT: IntGauge = register_int_gauge!(
        "fp_chain_height",
        "Last observed chain height"
    )
    .expect("Failed to create CHAIN_HEIGHT metric");

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = register_int_gauge!(
        "fp_active_subscriptions",
        "Number of live signature subscribers"
    )
    .expect("Failed to create ACTIVE_SUBSCRIPTIONS metric");

    /// Stats result cache lookups, labeled hit/miss
    pub static ref STATS_CACHE: IntCounterVec = register_int_counter_vec!(
        "fp_stats_cache_total",
        "Stats result cache lookups",
        &["outcome"]
    )
    .expect("Failed to create STATS_CACHE metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

#[cfg(feature = "metrics")]
pub fn record_height_ingested() {
    HEIGHTS_INGESTED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_fetch_failure(kind: &str) {
    VOTE_FETCH_FAILURES.with_label_values(&[kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_retry_scheduled() {
    RETRIES_SCHEDULED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_height_unknown() {
    HEIGHTS_UNKNOWN.inc();
}

#[cfg(feature = "metrics")]
pub fn record_cache_evictions(count: usize) {
    CACHE_EVICTIONS.inc_by(count as u64);
}

#[cfg(feature = "metrics")]
pub fn set_last_processed_height(height: u64) {
    LAST_PROCESSED_HEIGHT.set(height as i64);
}

#[cfg(feature = "metrics")]
pub fn set_chain_height(height: u64) {
    CHAIN_HEIGHT.set(height as i64);
}

#[cfg(feature = "metrics")]
pub fn set_active_subscriptions(count: usize) {
    ACTIVE_SUBSCRIPTIONS.set(count as i64);
}

#[cfg(feature = "metrics")]
pub fn record_stats_cache(hit: bool) {
    STATS_CACHE
        .with_label_values(&[if hit { "hit" } else { "miss" }])
        .inc();
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn record_height_ingested() {}

#[cfg(not(feature = "metrics"))]
pub fn record_fetch_failure(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_retry_scheduled() {}

#[cfg(not(feature = "metrics"))]
pub fn record_height_unknown() {}

#[cfg(not(feature = "metrics"))]
pub fn record_cache_evictions(_count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn set_last_processed_height(_height: u64) {}

#[cfg(not(feature = "metrics"))]
pub fn set_chain_height(_height: u64) {}

#[cfg(not(feature = "metrics"))]
pub fn set_active_subscriptions(_count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_stats_cache(_hit: bool) {}
