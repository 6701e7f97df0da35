//! HTTP surface of the tracker.
//!
//! ```text
//! GET /v1/finality-providers/{key}/signatures/stream   SSE feed
//! GET /v1/finality-providers/{key}/signatures/stats    window stats
//! GET /v1/finality-providers/signatures/stats          all providers
//! GET /v1/epochs/{epoch}/participation                 epoch aggregate
//! GET /health
//! GET /metrics
//! ```

mod error;
mod routes;
mod sse;

pub use error::{ApiError, ErrorResponse};
pub use routes::HealthResponse;

use axum::routing::get;
use axum::Router;
use fp_signature_tracker::ports::{LiveSignatureFeed, SignatureStatsApi};
use fp_signature_tracker::SignatureTracker;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<SignatureTracker>,
    pub stats: Arc<dyn SignatureStatsApi>,
    pub feed: Arc<dyn LiveSignatureFeed>,
    pub retry_directive: Duration,
    pub default_window: u64,
    pub keep_alive_secs: u64,
}

impl AppState {
    pub fn new(tracker: Arc<SignatureTracker>, keep_alive_secs: u64) -> Self {
        let broadcast = &tracker.config().broadcast;
        Self {
            stats: tracker.stats().clone(),
            feed: tracker.hub().clone(),
            retry_directive: Duration::from_millis(broadcast.retry_directive_ms),
            default_window: broadcast.default_window,
            keep_alive_secs: keep_alive_secs.max(1),
            tracker,
        }
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/finality-providers/signatures/stats",
            get(routes::all_provider_stats),
        )
        .route(
            "/v1/finality-providers/:key/signatures/stats",
            get(routes::provider_stats),
        )
        .route(
            "/v1/finality-providers/:key/signatures/stream",
            get(sse::signature_stream),
        )
        .route("/v1/epochs/:epoch/participation", get(routes::epoch_participation))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
