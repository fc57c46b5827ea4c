//! Composite witness: fan a checkpoint out to several witnesses at once.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::audit::canonical::canonicalize_serializable;
use crate::error::{AuditError, Result};
use crate::witness::{Witness, WitnessReceipt, WitnessStatus, WitnessType};

const DEFAULT_WITNESS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SubProof {
    /// Base64-encoded proof from the sub-witness
    proof: String,
    #[serde(rename = "type")]
    witness_type: WitnessType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompositeProof {
    proofs: Vec<SubProof>,
}

#[derive(Debug, Clone)]
pub struct CompositeWitness {
    witnesses: Vec<Witness>,
    per_witness_timeout: Duration,
}

impl CompositeWitness {
    pub fn new(witnesses: Vec<Witness>) -> Self {
        Self {
            witnesses,
            per_witness_timeout: DEFAULT_WITNESS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, per_witness_timeout: Duration) -> Self {
        self.per_witness_timeout = per_witness_timeout;
        self
    }

    pub fn witnesses(&self) -> &[Witness] {
        &self.witnesses
    }

    /// Timestamp with every sub-witness; succeeds if at least one does.
    pub fn timestamp<'a>(
        &'a self,
        hash: &'a str,
        last_sequence: i64,
        entry_count: i64,
    ) -> BoxFuture<'a, Result<WitnessReceipt>> {
        Box::pin(async move {
            let attempts = self.witnesses.iter().map(|witness| async move {
                let kind = witness.witness_type();
                match timeout(
                    self.per_witness_timeout,
                    witness.timestamp(hash, last_sequence, entry_count),
                )
                .await
                {
                    Ok(Ok(receipt)) => Some(SubProof {
                        proof: BASE64.encode(&receipt.proof),
                        witness_type: kind,
                    }),
                    Ok(Err(e)) => {
                        warn!("{} witness failed for checkpoint {}: {}", kind, hash, e);
                        None
                    }
                    Err(_) => {
                        warn!("{} witness timed out for checkpoint {}", kind, hash);
                        None
                    }
                }
            });

            let proofs: Vec<SubProof> = join_all(attempts).await.into_iter().flatten().collect();
            if proofs.is_empty() {
                return Err(AuditError::Witness("all witnesses failed".to_string()));
            }

            debug!(
                "Composite witness collected {}/{} proofs for {}",
                proofs.len(),
                self.witnesses.len(),
                hash
            );
            let proof = canonicalize_serializable(&CompositeProof { proofs })?;
            Ok(WitnessReceipt::new(proof))
        })
    }

    /// Valid if any sub-witness validates its part of the proof.
    pub fn verify<'a>(&'a self, hash: &'a str, proof: &'a [u8]) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            for (witness, sub_proof) in self.candidates(proof) {
                match witness.verify(hash, &sub_proof).await {
                    Ok(true) => return Ok(true),
                    Ok(false) => {}
                    Err(e) => debug!("{} witness could not verify: {}", witness.witness_type(), e),
                }
            }
            Ok(false)
        })
    }

    /// Confirmed if any sub-witness reports confirmed, pending otherwise.
    pub fn get_status<'a>(&'a self, proof: &'a [u8]) -> BoxFuture<'a, Result<WitnessStatus>> {
        Box::pin(async move {
            for (witness, sub_proof) in self.candidates(proof) {
                if let Ok(WitnessStatus::Confirmed) = witness.get_status(&sub_proof).await {
                    return Ok(WitnessStatus::Confirmed);
                }
            }
            Ok(WitnessStatus::Pending)
        })
    }

    /// Pair each recorded sub-proof with the sub-witnesses of its type. A
    /// proof that is not a composite proof is offered to every sub-witness.
    fn candidates(&self, proof: &[u8]) -> Vec<(&Witness, Vec<u8>)> {
        let parsed = serde_json::from_slice::<CompositeProof>(proof).ok();
        let Some(composite) = parsed else {
            return self
                .witnesses
                .iter()
                .map(|witness| (witness, proof.to_vec()))
                .collect();
        };

        let mut candidates = Vec::new();
        for sub in composite.proofs {
            let Ok(bytes) = BASE64.decode(&sub.proof) else {
                debug!("Skipping undecodable {} sub-proof", sub.witness_type);
                continue;
            };
            for witness in self
                .witnesses
                .iter()
                .filter(|w| w.witness_type() == sub.witness_type)
            {
                candidates.push((witness, bytes.clone()));
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness::{LocalWitness, TimestampAuthority, TsaConfig, TsaWitness};
    use sha2::{Digest, Sha256};
    use std::sync::Arc;

    fn tsa(enabled: bool) -> Witness {
        let config = TsaConfig {
            enabled,
            ..TsaConfig::default()
        };
        TsaWitness::new(Arc::new(TimestampAuthority::generate(config))).into()
    }

    fn hash() -> String {
        hex::encode(Sha256::digest(b"checkpoint"))
    }

    #[tokio::test]
    async fn test_failed_sub_witness_is_skipped() {
        let composite = CompositeWitness::new(vec![LocalWitness::new().into(), tsa(true), tsa(false)]);
        let hash = hash();

        let receipt = composite.timestamp(&hash, 10, 10).await.unwrap();
        let proof: CompositeProof = serde_json::from_slice(&receipt.proof).unwrap();
        assert_eq!(proof.proofs.len(), 2);
        assert_eq!(proof.proofs[0].witness_type, WitnessType::Local);
        assert_eq!(proof.proofs[1].witness_type, WitnessType::Rfc3161Tsa);

        assert!(composite.verify(&hash, &receipt.proof).await.unwrap());
        assert_eq!(
            composite.get_status(&receipt.proof).await.unwrap(),
            WitnessStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn test_all_failed_is_error() {
        let composite = CompositeWitness::new(vec![tsa(false), tsa(false)]);
        let err = composite.timestamp(&hash(), 1, 1).await.unwrap_err();
        assert!(matches!(err, AuditError::Witness(_)));
    }

    #[tokio::test]
    async fn test_raw_proof_offered_to_every_witness() {
        let inner = tsa(true);
        let receipt = inner.timestamp(&hash(), 1, 1).await.unwrap();
        let composite = CompositeWitness::new(vec![tsa(true), inner]);

        assert!(composite.verify(&hash(), &receipt.proof).await.unwrap());
    }

    #[tokio::test]
    async fn test_nested_composite() {
        let inner = CompositeWitness::new(vec![LocalWitness::new().into()]);
        let outer = CompositeWitness::new(vec![inner.into(), tsa(false)]);

        let receipt = outer.timestamp(&hash(), 3, 3).await.unwrap();
        assert!(outer.verify(&hash(), &receipt.proof).await.unwrap());
    }

    #[tokio::test]
    async fn test_unverifiable_proof_is_pending() {
        let composite = CompositeWitness::new(vec![tsa(true)]);
        assert!(!composite.verify(&hash(), b"garbage").await.unwrap());
        assert_eq!(
            composite.get_status(&[]).await.unwrap(),
            WitnessStatus::Pending
        );
    }
}
