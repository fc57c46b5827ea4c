//! Local witness
//!
//! Development-only witness with no external trust anchor. The proof is a
//! digest over the checkpoint parameters and is confirmed immediately.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::witness::{WitnessReceipt, WitnessStatus};

#[derive(Debug, Clone, Default)]
pub struct LocalWitness;

impl LocalWitness {
    pub fn new() -> Self {
        Self
    }

    pub fn timestamp(&self, hash: &str, last_sequence: i64, entry_count: i64) -> WitnessReceipt {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let statement = format!(
            "LOCAL_WITNESS:{}:{}:{}:{}",
            hash, last_sequence, entry_count, nanos
        );

        let mut hasher = Sha256::new();
        hasher.update(statement.as_bytes());
        debug!("Local witness recorded checkpoint {}", hash);
        WitnessReceipt::new(hasher.finalize().to_vec())
    }

    /// A local proof cannot be independently checked; any non-empty proof passes.
    pub fn verify(&self, _hash: &str, proof: &[u8]) -> bool {
        !proof.is_empty()
    }

    pub fn get_status(&self, _proof: &[u8]) -> WitnessStatus {
        WitnessStatus::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_witness_roundtrip() {
        let witness = LocalWitness::new();
        let receipt = witness.timestamp("deadbeef", 10, 10);

        assert_eq!(receipt.proof.len(), 32);
        assert!(receipt.url.is_none());
        assert!(witness.verify("deadbeef", &receipt.proof));
        assert_eq!(witness.get_status(&receipt.proof), WitnessStatus::Confirmed);
    }

    #[test]
    fn test_empty_proof_fails() {
        assert!(!LocalWitness::new().verify("deadbeef", &[]));
    }
}
