//! Off-heap index caches for the identity store
//!
//! - **open_hash**: open-addressing table over flat byte regions (double hashing,
//!   FREE/FULL/REMOVED slots)
//! - **cache**: spin-lock guarded typed fronts over the table
//!
//! # Architecture
//!
//! ```text
//! resolve("cpu.load", [0xAA, 0xBB])
//!        ↓
//! NameIndex   "cpu.load"   → gid
//! OpaqueIndex [0xAA, 0xBB] → gid
//!        ↓
//! LocationIndex gid → record index → IdentityLog
//! ```

mod cache;
pub mod open_hash;

pub use cache::{CacheSet, CacheSizing, IndexCache, LocationIndex, NameIndex, OpaqueIndex};
pub use open_hash::{BytesKey, IdKey, OpenHash, SlotKey, TextKey};
