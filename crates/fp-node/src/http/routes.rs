//! Pull endpoints: stats, epoch participation, health and metrics.

use super::error::ApiError;
use super::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use fp_signature_tracker::{
    BlockHeight, EpochAggregate, ProviderSignatureSummary, SignatureStats, StatsQuery,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub(super) struct StatsParams {
    pub start_height: Option<BlockHeight>,
    pub end_height: Option<BlockHeight>,
    pub last_n_blocks: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct AllProvidersParams {
    pub last_n_blocks: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub running: bool,
    pub chain_height: BlockHeight,
    pub last_processed_height: BlockHeight,
    pub cached_heights: usize,
    pub subscribers: usize,
    pub version: String,
}

pub(super) async fn provider_stats(
    State(state): State<AppState>,
    Path(provider_key): Path<String>,
    Query(params): Query<StatsParams>,
) -> Result<Json<SignatureStats>, ApiError> {
    let query = StatsQuery::from_params(
        &provider_key,
        params.start_height,
        params.end_height,
        params.last_n_blocks,
    )?;
    let stats = state.stats.get_stats(query).await?;
    Ok(Json(stats))
}

pub(super) async fn all_provider_stats(
    State(state): State<AppState>,
    Query(params): Query<AllProvidersParams>,
) -> Result<Json<Vec<ProviderSignatureSummary>>, ApiError> {
    let last_n = params.last_n_blocks.unwrap_or(state.default_window);
    let summaries = state.stats.get_all_provider_stats(last_n).await?;
    Ok(Json(summaries))
}

pub(super) async fn epoch_participation(
    State(state): State<AppState>,
    Path(epoch): Path<u64>,
) -> Result<Json<EpochAggregate>, ApiError> {
    state
        .stats
        .epoch_aggregate(epoch)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no participation data for epoch {epoch}")))
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = state.tracker.engine();
    let running = engine.is_running();
    Json(HealthResponse {
        status: if running { "ok" } else { "stopped" }.to_string(),
        running,
        chain_height: engine.current_chain_height(),
        last_processed_height: engine.last_processed_height(),
        cached_heights: engine.cache().read().size(),
        subscribers: state.feed.subscriber_count(),
        version: fp_signature_tracker::VERSION.to_string(),
    })
}

pub(super) async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let body = fp_telemetry::encode_metrics().map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
