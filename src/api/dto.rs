//! Data Transfer Objects
//!
//! Request and response types for the REST API. Opaque keys travel as
//! lowercase hex strings.

use crate::store::{CompactionReport, MetricIdentity, StoreStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identity DTOs
// ============================================================================

/// Request to resolve a metric to its global ID
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Human-readable metric name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Opaque key, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opaque_key: Option<String>,
}

impl ResolveRequest {
    /// Decode the opaque key
    pub fn opaque_bytes(&self) -> Result<Option<Vec<u8>>, String> {
        self.opaque_key
            .as_deref()
            .map(decode_opaque)
            .transpose()
    }
}

/// Decode a hex opaque key as it appears in a request
pub fn decode_opaque(hex_key: &str) -> Result<Vec<u8>, String> {
    hex::decode(hex_key).map_err(|e| format!("opaque_key is not valid hex: {}", e))
}

/// A bare global ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIdResponse {
    pub global_id: i64,
}

/// A live identity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub global_id: i64,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub created_at_iso: Option<DateTime<Utc>>,
    pub name: Option<String>,
    /// Hex encoded
    pub opaque_key: Option<String>,
}

impl From<&MetricIdentity> for IdentityResponse {
    fn from(identity: &MetricIdentity) -> Self {
        Self {
            global_id: identity.global_id,
            created_at: identity.created_at,
            created_at_iso: DateTime::from_timestamp_millis(identity.created_at),
            name: identity.name.clone(),
            opaque_key: identity.opaque_key.as_deref().map(hex::encode),
        }
    }
}

impl IdentityResponse {
    /// Convert back to a store record
    pub fn into_identity(self) -> Result<MetricIdentity, String> {
        let opaque_key = self.opaque_key.as_deref().map(decode_opaque).transpose()?;
        Ok(MetricIdentity {
            global_id: self.global_id,
            created_at: self.created_at,
            name: self.name.filter(|n| !n.is_empty()),
            opaque_key: opaque_key.filter(|k| !k.is_empty()),
            tombstoned: false,
        })
    }
}

// ============================================================================
// Admin DTOs
// ============================================================================

/// Store counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: StoreStats,
    pub tombstone_ratio: f64,
}

impl From<StoreStats> for StatsResponse {
    fn from(stats: StoreStats) -> Self {
        Self {
            tombstone_ratio: stats.tombstone_ratio(),
            stats,
        }
    }
}

/// Result of a defragmentation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefragmentResponse {
    pub before: StoreStats,
    pub after: StoreStats,
    pub report: CompactionReport,
}

// ============================================================================
// Health DTOs
// ============================================================================

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub backend: String,
    pub uptime_seconds: u64,
    pub version: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_request_hex() {
        let request: ResolveRequest =
            serde_json::from_str(r#"{"name": "cpu.load", "opaque_key": "aabb"}"#).unwrap();
        assert_eq!(request.opaque_bytes().unwrap(), Some(vec![0xAA, 0xBB]));

        let bad = ResolveRequest {
            opaque_key: Some("zz".to_string()),
            ..Default::default()
        };
        assert!(bad.opaque_bytes().is_err());
    }

    #[test]
    fn test_identity_response_keeps_keys() {
        let identity = MetricIdentity::new(7, Some("mem.free"), Some(&[0x01, 0xFF])).created_at(0);
        let response = IdentityResponse::from(&identity);

        assert_eq!(response.opaque_key.as_deref(), Some("01ff"));
        assert_eq!(response.created_at_iso.map(|t| t.timestamp()), Some(0));
        assert_eq!(response.into_identity().unwrap(), identity);
    }

    #[test]
    fn test_stats_response_is_flat() {
        let stats = StoreStats {
            log_size: 4,
            deleted_count: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(StatsResponse::from(stats)).unwrap();

        assert_eq!(json["log_size"], 4);
        assert_eq!(json["tombstone_ratio"], 0.25);
    }
}
