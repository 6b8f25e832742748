//! Admin Routes
//!
//! - POST /api/v1/admin/defragment - Compact the identity log
//! - GET /api/v1/admin/stats - Store counters

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::{DefragmentResponse, StatsResponse};
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// POST /api/v1/admin/defragment
///
/// Runs a compaction and reports the stats on either side of it.
pub async fn defragment(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DefragmentResponse>> {
    let before = state.backend.stats().await?;
    let report = state.backend.defragment().await?;
    let after = state.backend.stats().await?;

    tracing::info!(
        dropped = report.dropped(),
        duration_ms = report.duration_ms,
        "Defragmented identity log"
    );

    Ok(Json(DefragmentResponse {
        before,
        after,
        report,
    }))
}

/// GET /api/v1/admin/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatsResponse>> {
    let stats = state.backend.stats().await?;
    Ok(Json(StatsResponse::from(stats)))
}
