//! Core data types for the identity store
//!
//! - `MetricIdentity`: one identity record
//! - `StoreStats`: cache and log counters

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The identity of one metric
///
/// Never mutated once written: an update is a tombstone of the old record plus
/// an append of the new one.
///
/// An empty name or opaque key is not a key. Records store it as absent, so
/// build identities with [`MetricIdentity::new`] rather than `Some("")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricIdentity {
    /// Permanent identity, never reused
    pub global_id: i64,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
    /// Human-readable name
    #[serde(default)]
    pub name: Option<String>,
    /// Alternate binary identifier
    #[serde(default)]
    pub opaque_key: Option<Vec<u8>>,
    /// Marked deleted in the log but not yet compacted away
    #[serde(default)]
    pub tombstoned: bool,
}

impl MetricIdentity {
    /// Create a live identity stamped with the current time
    ///
    /// Empty keys are dropped.
    pub fn new(global_id: i64, name: Option<&str>, opaque_key: Option<&[u8]>) -> Self {
        Self {
            global_id,
            created_at: Utc::now().timestamp_millis(),
            name: name.filter(|n| !n.is_empty()).map(str::to_owned),
            opaque_key: opaque_key.filter(|k| !k.is_empty()).map(<[u8]>::to_vec),
            tombstoned: false,
        }
    }

    /// Builder method: set creation time
    pub fn created_at(mut self, created_at: i64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether the identity carries at least one key
    pub fn has_key(&self) -> bool {
        self.name.is_some() || self.opaque_key.is_some()
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Entries in the name index
    pub name_cache_size: usize,
    /// Entries in the opaque key index
    pub opaque_cache_size: usize,
    /// Entries in the location index
    pub id_cache_size: usize,
    /// Records in the log, live and tombstoned
    pub log_size: u64,
    /// Tombstoned records awaiting compaction
    pub deleted_count: u64,
    /// Records appended since the store was opened
    pub insert_count: u64,
}

impl StoreStats {
    /// Fraction of log records that are tombstones
    pub fn tombstone_ratio(&self) -> f64 {
        if self.log_size == 0 {
            0.0
        } else {
            self.deleted_count as f64 / self.log_size as f64
        }
    }
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Names: {}, Opaque: {}, IDs: {}, Log: {} ({} deleted), Inserts: {}",
            self.name_cache_size,
            self.opaque_cache_size,
            self.id_cache_size,
            self.log_size,
            self.deleted_count,
            self.insert_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_creation() {
        let identity = MetricIdentity::new(3, Some("cpu.load"), Some(&[0xAA, 0xBB]));

        assert_eq!(identity.global_id, 3);
        assert_eq!(identity.name.as_deref(), Some("cpu.load"));
        assert_eq!(identity.opaque_key.as_deref(), Some(&[0xAA, 0xBB][..]));
        assert!(!identity.tombstoned);
        assert!(identity.has_key());
        assert!(identity.created_at > 0);
    }

    #[test]
    fn test_identity_serialization() {
        let identity = MetricIdentity::new(1, Some("mem.free"), None).created_at(1000);
        let json = serde_json::to_string(&identity).unwrap();
        let restored: MetricIdentity = serde_json::from_str(&json).unwrap();

        assert_eq!(identity, restored);
    }

    #[test]
    fn test_tombstone_ratio() {
        let stats = StoreStats {
            log_size: 10,
            deleted_count: 4,
            ..Default::default()
        };
        assert!((stats.tombstone_ratio() - 0.4).abs() < f64::EPSILON);
        assert_eq!(StoreStats::default().tombstone_ratio(), 0.0);
    }
}
