//! Metric identity store
//!
//! This module provides the durable identity mapping:
//!
//! - **types**: Core data structures (MetricIdentity, StoreStats)
//! - **codec**: Binary record layout
//! - **log**: Append-only identity log with tombstones
//! - **resolver**: Create-or-update and merge semantics
//! - **compactor**: Defragmentation with shadow reads
//! - **engine**: The store orchestrating all components
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   resolve → log lock → NameIndex/OpaqueIndex → append record → update caches
//!
//! Read Path:
//!   lookup → read path (primary or shadow) → NameIndex/OpaqueIndex → gid
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use gidstore::store::{MetricStore, StoreConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MetricStore::open(StoreConfig::new("./data"))?;
//!
//!     let by_key = store.resolve(None, Some(&[0xAA, 0xBB]))?;
//!     let by_name = store.resolve(Some("cpu.load"), None)?;
//!
//!     // Name and key now point at different identities; this merges them
//!     let merged = store.resolve(Some("cpu.load"), Some(&[0xAA, 0xBB]))?;
//!     assert!(merged != by_key && merged != by_name);
//!     assert_eq!(store.lookup_by_name("cpu.load"), Some(merged));
//!
//!     store.defragment()?;
//!     store.close()?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod compactor;
pub mod engine;
pub mod error;
pub mod log;
pub mod resolver;
pub mod types;

// Re-export commonly used types
pub use compactor::{CompactionPhase, CompactionReport};
pub use engine::{DefragPolicy, MetricStore, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use log::{IdentityLog, LogAccess, LogOptions, SyncMode};
pub use resolver::{IdentityResolver, Resolution};
pub use types::{MetricIdentity, StoreStats};
