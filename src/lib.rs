//! # gidstore
//!
//! Metric identity store: gives every metric a permanent global ID, keyed by
//! a human-readable name and/or an opaque binary key.
//!
//! ## Features
//!
//! - **Durable**: Append-only identity log with tombstones, memory-mapped or positioned I/O
//! - **Fast lookups**: Open-addressing index caches rebuilt from the log on open
//! - **Merging**: A name and key that resolved apart converge on one new ID
//! - **Online compaction**: Defragmentation with lookups served from a shadow snapshot
//!
//! ## Modules
//!
//! - [`store`]: Identity log, resolver, compactor and the store itself
//! - [`index`]: Open-addressing index caches
//! - [`sync`]: Spin lock guarding the log and read path
//! - [`backend`]: Local and remote backends behind one async trait
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gidstore::store::{MetricStore, StoreConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MetricStore::open(StoreConfig::new("./gidstore_data"))?;
//!
//!     let id = store.resolve(Some("cpu.load"), None)?;
//!     assert_eq!(store.lookup_by_name("cpu.load"), Some(id));
//!
//!     store.close()?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod index;
pub mod store;
pub mod sync;

// Re-export top-level types for convenience
pub use store::{
    CompactionPhase, CompactionReport, DefragPolicy, MetricIdentity, MetricStore, StoreConfig,
    StoreError, StoreResult, StoreStats,
};

pub use index::{CacheSet, CacheSizing, IndexCache};

pub use backend::{BackendError, BackendResult, IdentityBackend, LocalBackend, RemoteBackend};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{ApiConfig as ConfigApiConfig, Config, ConfigError, LoggingConfig};
