//! Checkpoints
//!
//! A checkpoint binds the chain cursor (last hash, sequence, entry count)
//! to a point in time and carries a witness proof over that binding.

pub mod scheduler;
pub mod service;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::witness::{WitnessStatus, WitnessType};

pub use scheduler::CheckpointScheduler;
pub use service::{CheckpointService, CheckpointVerifyResult};

/// Default and maximum page size for checkpoint listings
pub const DEFAULT_CHECKPOINT_LIMIT: i64 = 20;
pub const MAX_CHECKPOINT_LIMIT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub checkpoint_hash: String,
    pub last_sequence: i64,
    pub last_entry_id: Uuid,
    pub entry_count: i64,
    pub witness_type: WitnessType,
    #[serde(with = "proof_base64")]
    pub witness_proof: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness_url: Option<String>,
    pub witness_status: WitnessStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn is_confirmed(&self) -> bool {
        self.witness_status == WitnessStatus::Confirmed
    }
}

/// Hex SHA-256 of `last_hash:last_sequence:entry_count:unix_nanos`.
pub fn compute_checkpoint_hash(
    last_hash: &str,
    last_sequence: i64,
    entry_count: i64,
    created_at: &DateTime<Utc>,
) -> String {
    let nanos = created_at.timestamp_nanos_opt().unwrap_or_default();
    let data = format!("{}:{}:{}:{}", last_hash, last_sequence, entry_count, nanos);
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Clamp a requested checkpoint page size.
pub fn clamp_checkpoint_limit(limit: i64) -> i64 {
    if limit <= 0 || limit > MAX_CHECKPOINT_LIMIT {
        DEFAULT_CHECKPOINT_LIMIT
    } else {
        limit
    }
}

mod proof_base64 {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(proof: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(proof))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_checkpoint_hash_is_deterministic() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = compute_checkpoint_hash("abc", 10, 10, &at);
        let b = compute_checkpoint_hash("abc", 10, 10, &at);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let expected = hex::encode(Sha256::digest(b"abc:10:10:1704067200000000000"));
        assert_eq!(a, expected);
        assert_ne!(a, compute_checkpoint_hash("abc", 10, 11, &at));
    }

    #[test]
    fn test_clamp_checkpoint_limit() {
        assert_eq!(clamp_checkpoint_limit(0), 20);
        assert_eq!(clamp_checkpoint_limit(-5), 20);
        assert_eq!(clamp_checkpoint_limit(101), 20);
        assert_eq!(clamp_checkpoint_limit(100), 100);
        assert_eq!(clamp_checkpoint_limit(7), 7);
    }

    #[test]
    fn test_proof_serializes_as_base64() {
        let checkpoint = Checkpoint {
            id: Uuid::new_v4(),
            checkpoint_hash: "h".to_string(),
            last_sequence: 1,
            last_entry_id: Uuid::new_v4(),
            entry_count: 1,
            witness_type: WitnessType::Local,
            witness_proof: vec![1, 2, 3],
            witness_url: None,
            witness_status: WitnessStatus::Confirmed,
            created_at: Utc::now(),
            confirmed_at: None,
        };

        let value = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(value["witness_proof"], "AQID");
        assert_eq!(value["witness_type"], "local");
        assert!(value.get("confirmed_at").is_none());

        let back: Checkpoint = serde_json::from_value(value).unwrap();
        assert_eq!(back, checkpoint);
    }
}
