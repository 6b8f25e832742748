//! gidstore API Server
//!
//! Run with: cargo run --bin gidstore
//!
//! # Configuration
//!
//! Read from `GIDSTORE_CONFIG` if set, otherwise from the default locations
//! (see [`Config::load_default`]). Environment variables override the file:
//! - `GIDSTORE_DATA_DIR`: Identity log directory
//! - `GIDSTORE_API_HOST` / `GIDSTORE_API_PORT`: Bind address (default: 0.0.0.0:8090)
//! - `GIDSTORE_LOG_LEVEL` / `GIDSTORE_LOG_FORMAT`: Logging (info, pretty)
//! - `RUST_LOG`: Overrides the log filter entirely

use gidstore::api::{serve, ApiConfig, AppState};
use gidstore::backend::LocalBackend;
use gidstore::config::{Config, LoggingConfig};
use gidstore::store::MetricStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::var("GIDSTORE_CONFIG") {
        Ok(path) => Config::load_with_env(&PathBuf::from(path))?,
        Err(_) => Config::load_default(),
    };

    init_tracing(&config.logging);

    tracing::info!("Starting gidstore v{}", env!("CARGO_PKG_VERSION"));

    let store_config = config.store_config();
    tracing::info!("Data directory: {:?}", store_config.data_dir);

    let store = Arc::new(MetricStore::open(store_config)?);
    tracing::info!("Identity store opened: {}", store.stats());

    let defrag_handle = store.start_background_defrag();
    if defrag_handle.is_none() {
        tracing::info!("Background defragmentation disabled");
    }

    let api_config = ApiConfig::from(&config.api);
    let state = AppState::new(Arc::new(LocalBackend::new(Arc::clone(&store))), api_config.clone());

    serve(state, &api_config).await?;

    // Graceful shutdown
    if let Some(handle) = defrag_handle {
        handle.abort();
        let _ = handle.await;
    }

    tracing::info!("Flushing identity store...");
    match Arc::try_unwrap(store) {
        Ok(store) => store.close()?,
        Err(store) => store.flush()?,
    }

    tracing::info!("gidstore stopped");
    Ok(())
}

/// Initialize tracing from the logging config; `RUST_LOG` wins when set
fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("gidstore={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
