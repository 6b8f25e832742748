//! gidstore REST API
//!
//! HTTP API over an identity backend, built with Axum.
//!
//! # Endpoints
//!
//! ## Identities
//! - `POST /api/v1/identities/resolve` - Resolve name and/or opaque key
//! - `GET /api/v1/identities/by-name/:name` - Look up by name
//! - `GET /api/v1/identities/by-opaque/:key` - Look up by hex opaque key
//! - `GET /api/v1/identities/:id` - Get a record
//! - `DELETE /api/v1/identities/:id` - Delete a global ID
//!
//! ## Admin
//! - `POST /api/v1/admin/defragment` - Compact the identity log
//! - `GET /api/v1/admin/stats` - Store counters
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use gidstore::api::{serve, ApiConfig, AppState};
//! use gidstore::backend::LocalBackend;
//! use gidstore::store::{MetricStore, StoreConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MetricStore::open(StoreConfig::new("./data"))?);
//!     let config = ApiConfig::default();
//!
//!     let state = AppState::new(Arc::new(LocalBackend::new(store)), config.clone());
//!     serve(state, &config).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Identity routes
        .route("/identities/resolve", post(routes::identities::resolve))
        .route(
            "/identities/by-name/:name",
            get(routes::identities::lookup_by_name),
        )
        .route(
            "/identities/by-opaque/:key",
            get(routes::identities::lookup_by_opaque),
        )
        .route(
            "/identities/:id",
            get(routes::identities::get_identity).delete(routes::identities::delete_identity),
        )
        // Admin routes
        .route("/admin/defragment", post(routes::admin::defragment))
        .route("/admin/stats", get(routes::admin::stats));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    serve_until(state, config, shutdown_signal()).await
}

/// Start the API server, stopping when `shutdown` completes
pub async fn serve_until<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<(), ApiError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("gidstore API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("gidstore API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dto::{DefragmentResponse, GlobalIdResponse, IdentityResponse, StatsResponse};
    use crate::backend::LocalBackend;
    use crate::store::{MetricStore, StoreConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    fn create_test_app() -> (Router, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetricStore::open(StoreConfig::new(dir.path())).unwrap());
        let backend = Arc::new(LocalBackend::new(store));

        let state = AppState::new(backend, ApiConfig::default());
        let router = build_router(state);

        (router, dir)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("Content-Type", "application/json");
        }
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);

        app.clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let (app, _dir) = create_test_app();

        for uri in ["/health/live", "/health/ready", "/health"] {
            let response = send(&app, "GET", uri, None).await;
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_resolve_and_lookup() {
        let (app, _dir) = create_test_app();

        let response = send(
            &app,
            "POST",
            "/api/v1/identities/resolve",
            Some(r#"{"name": "cpu.load", "opaque_key": "aabb"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let resolved: GlobalIdResponse = json(response).await;

        let by_name: GlobalIdResponse =
            json(send(&app, "GET", "/api/v1/identities/by-name/cpu.load", None).await).await;
        assert_eq!(by_name, resolved);

        let by_key: GlobalIdResponse =
            json(send(&app, "GET", "/api/v1/identities/by-opaque/AABB", None).await).await;
        assert_eq!(by_key, resolved);

        let uri = format!("/api/v1/identities/{}", resolved.global_id);
        let record: IdentityResponse = json(send(&app, "GET", &uri, None).await).await;
        assert_eq!(record.name.as_deref(), Some("cpu.load"));
        assert_eq!(record.opaque_key.as_deref(), Some("aabb"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_empty_and_bad_hex() {
        let (app, _dir) = create_test_app();

        let empty = send(&app, "POST", "/api/v1/identities/resolve", Some("{}")).await;
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

        let bad_hex = send(
            &app,
            "POST",
            "/api/v1/identities/resolve",
            Some(r#"{"opaque_key": "xyz"}"#),
        )
        .await;
        assert_eq!(bad_hex.status(), StatusCode::BAD_REQUEST);

        let not_json = send(&app, "POST", "/api/v1/identities/resolve", Some("not json")).await;
        assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_404() {
        let (app, _dir) = create_test_app();

        let by_name = send(&app, "GET", "/api/v1/identities/by-name/missing", None).await;
        assert_eq!(by_name.status(), StatusCode::NOT_FOUND);

        let by_id = send(&app, "GET", "/api/v1/identities/42", None).await;
        assert_eq!(by_id.status(), StatusCode::NOT_FOUND);

        let delete = send(&app, "DELETE", "/api/v1/identities/42", None).await;
        assert_eq!(delete.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_then_defragment() {
        let (app, _dir) = create_test_app();

        let resolved: GlobalIdResponse = json(
            send(
                &app,
                "POST",
                "/api/v1/identities/resolve",
                Some(r#"{"name": "disk.used"}"#),
            )
            .await,
        )
        .await;

        let uri = format!("/api/v1/identities/{}", resolved.global_id);
        assert_eq!(
            send(&app, "DELETE", &uri, None).await.status(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(send(&app, "GET", &uri, None).await.status(), StatusCode::NOT_FOUND);

        let stats: StatsResponse = json(send(&app, "GET", "/api/v1/admin/stats", None).await).await;
        assert_eq!(stats.stats.deleted_count, 1);
        assert_eq!(stats.tombstone_ratio, 1.0);

        let defrag: DefragmentResponse =
            json(send(&app, "POST", "/api/v1/admin/defragment", None).await).await;
        assert_eq!(defrag.before.log_size, 1);
        assert_eq!(defrag.after.log_size, 0);
        assert_eq!(defrag.report.dropped(), 1);
    }
}
