//! Identity Routes
//!
//! Resolution and lookup of metric global IDs.
//!
//! - POST /api/v1/identities/resolve - Resolve name and/or opaque key
//! - GET /api/v1/identities/by-name/:name - Look up by name
//! - GET /api/v1/identities/by-opaque/:key - Look up by hex opaque key
//! - GET /api/v1/identities/:id - Get the record of a global ID
//! - DELETE /api/v1/identities/:id - Delete a global ID

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::{
    decode_opaque, GlobalIdResponse, IdentityResponse, ResolveRequest,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// POST /api/v1/identities/resolve
///
/// Returns the existing global ID for the given keys, creating or merging
/// identities as needed.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Json<GlobalIdResponse>> {
    let opaque_key = req.opaque_bytes().map_err(ApiError::Validation)?;
    let name = req.name.filter(|n| !n.is_empty());
    let opaque_key = opaque_key.filter(|k| !k.is_empty());

    if name.is_none() && opaque_key.is_none() {
        return Err(ApiError::Validation(
            "at least one of name or opaque_key is required".to_string(),
        ));
    }

    let global_id = state.backend.resolve(name, opaque_key).await?;
    Ok(Json(GlobalIdResponse { global_id }))
}

/// GET /api/v1/identities/by-name/:name
pub async fn lookup_by_name(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<GlobalIdResponse>> {
    state
        .backend
        .lookup_by_name(&name)
        .await?
        .map(|global_id| Json(GlobalIdResponse { global_id }))
        .ok_or_else(|| ApiError::NotFound(format!("No identity named '{}'", name)))
}

/// GET /api/v1/identities/by-opaque/:key
pub async fn lookup_by_opaque(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> ApiResult<Json<GlobalIdResponse>> {
    let opaque_key = decode_opaque(&key).map_err(ApiError::Validation)?;

    state
        .backend
        .lookup_by_opaque(&opaque_key)
        .await?
        .map(|global_id| Json(GlobalIdResponse { global_id }))
        .ok_or_else(|| ApiError::NotFound(format!("No identity with opaque key {}", key)))
}

/// GET /api/v1/identities/:id
pub async fn get_identity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<IdentityResponse>> {
    let identity = state
        .backend
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Identity {} not found", id)))?;

    Ok(Json(IdentityResponse::from(&identity)))
}

/// DELETE /api/v1/identities/:id
///
/// Tombstones the record and drops its keys from the indexes.
pub async fn delete_identity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.backend.delete(id).await? {
        return Err(ApiError::NotFound(format!("Identity {} not found", id)));
    }

    tracing::info!(global_id = id, "Deleted identity");
    Ok(StatusCode::NO_CONTENT)
}
