//! Multi-Agency Witness
//!
//! Distributed trust for checkpoints: this agency signs a witness request
//! and asks every configured peer agency to co-sign it. A proof is only
//! confirmed when enough distinct agencies have signed, so a single
//! compromised operator cannot forge or rewrite a checkpoint on its own.
//!
//! Signatures are secp256k1 ECDSA over SHA-256 of the canonical JSON form
//! of the request. Verification always uses the public keys from local
//! configuration, never keys carried inside a proof.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::canonical::canonicalize;
use crate::audit::entry::{format_timestamp, truncate_to_micros};
use crate::error::{AuditError, Result};
use crate::witness::{WitnessReceipt, WitnessStatus};

/// Path peer agencies serve co-signing requests on
pub const SIGN_PATH: &str = "/api/v1/witness/sign";

/// A peer agency that co-signs our checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencyWitnessConfig {
    pub agency_code: String,
    pub agency_name: String,
    pub endpoint_url: String,
    /// Hex-encoded compressed secp256k1 public key
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgencyConfig {
    pub enabled: bool,
    /// Signatures required for a confirmed proof, the local one included
    pub min_signatures: usize,
    pub agencies: Vec<AgencyWitnessConfig>,
    pub request_timeout_secs: u64,
}

impl Default for MultiAgencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_signatures: 1,
            agencies: Vec::new(),
            request_timeout_secs: 30,
        }
    }
}

/// This server's own agency identity
#[derive(Debug, Clone)]
pub struct LocalAgency {
    pub code: String,
    pub name: String,
    secret_key: SecretKey,
}

impl LocalAgency {
    pub fn new(code: impl Into<String>, name: impl Into<String>, secret_key: SecretKey) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            secret_key,
        }
    }

    pub fn generate(code: impl Into<String>, name: impl Into<String>) -> Self {
        let secret_key = SecretKey::new(&mut secp256k1::rand::thread_rng());
        Self::new(code, name, secret_key)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::signing_only(), &self.secret_key)
    }

    pub fn public_key_hex(&self) -> String {
        self.public_key().to_string()
    }
}

/// Request sent to peer agencies for co-signing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessRequest {
    pub checkpoint_hash: String,
    pub last_sequence: i64,
    pub entry_count: i64,
    pub timestamp: DateTime<Utc>,
    pub requesting_agency: String,
}

impl WitnessRequest {
    /// Bytes every agency signs. The requesting agency is not part of them.
    pub fn signing_payload(&self) -> Vec<u8> {
        canonicalize(&json!({
            "checkpoint_hash": self.checkpoint_hash,
            "entry_count": self.entry_count,
            "last_sequence": self.last_sequence,
            "timestamp": format_timestamp(&self.timestamp),
        }))
    }

    fn message(&self) -> Result<Message> {
        let digest = Sha256::digest(self.signing_payload());
        Message::from_digest_slice(&digest)
            .map_err(|e| AuditError::Crypto(format!("Invalid message hash: {}", e)))
    }
}

/// One agency's signature over a witness request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgencySignature {
    pub agency_code: String,
    pub agency_name: String,
    /// Base64-encoded DER signature
    pub signature: String,
    /// Signer's key as reported at signing time; informational only
    pub public_key: String,
    pub signed_at: DateTime<Utc>,
}

/// All signatures collected for one checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAgencyProof {
    pub id: Uuid,
    pub checkpoint_hash: String,
    pub last_sequence: i64,
    pub entry_count: i64,
    pub signatures: Vec<AgencySignature>,
    pub min_required: usize,
    pub created_at: DateTime<Utc>,
    pub status: WitnessStatus,
}

impl MultiAgencyProof {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The request every signature in this proof covers
    fn request(&self) -> WitnessRequest {
        WitnessRequest {
            checkpoint_hash: self.checkpoint_hash.clone(),
            last_sequence: self.last_sequence,
            entry_count: self.entry_count,
            timestamp: self.created_at,
            requesting_agency: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignatureVerifyDetail {
    pub agency_code: String,
    pub agency_name: String,
    pub signed_at: DateTime<Utc>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofVerification {
    pub valid: bool,
    pub message: String,
    pub total_signatures: usize,
    pub valid_signatures: usize,
    pub invalid_signatures: usize,
    pub details: Vec<SignatureVerifyDetail>,
}

#[derive(Debug, Clone)]
pub struct MultiAgencyWitness {
    config: MultiAgencyConfig,
    local: LocalAgency,
    /// agency code -> configured public key, local agency included
    keys: HashMap<String, PublicKey>,
    secp: Secp256k1<All>,
    http: reqwest::Client,
}

impl MultiAgencyWitness {
    pub fn new(mut config: MultiAgencyConfig, local: LocalAgency) -> Result<Self> {
        if config.min_signatures < 1 {
            config.min_signatures = 1;
        }
        let available = config.agencies.len() + 1;
        if config.min_signatures > available {
            return Err(AuditError::Config(format!(
                "min_signatures ({}) exceeds available agencies ({})",
                config.min_signatures, available
            )));
        }

        let mut keys = HashMap::with_capacity(available);
        for agency in &config.agencies {
            let key = PublicKey::from_str(&agency.public_key).map_err(|e| {
                AuditError::Config(format!(
                    "Invalid public key for agency {}: {}",
                    agency.agency_code, e
                ))
            })?;
            keys.insert(agency.agency_code.clone(), key);
        }
        keys.insert(local.code.clone(), local.public_key());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AuditError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            "Multi-agency witness for {} ready: {} peer agencies, {} signatures required",
            local.code,
            config.agencies.len(),
            config.min_signatures
        );

        Ok(Self {
            config,
            local,
            keys,
            secp: Secp256k1::new(),
            http,
        })
    }

    pub fn local_agency(&self) -> &LocalAgency {
        &self.local
    }

    pub fn min_signatures(&self) -> usize {
        self.config.min_signatures
    }

    /// Sign locally and collect co-signatures from every peer.
    pub async fn create_proof(
        &self,
        checkpoint_hash: &str,
        last_sequence: i64,
        entry_count: i64,
    ) -> Result<MultiAgencyProof> {
        if !self.config.enabled {
            return Err(AuditError::Witness(
                "multi-agency witness is not enabled".to_string(),
            ));
        }

        let now = truncate_to_micros(Utc::now());
        let request = WitnessRequest {
            checkpoint_hash: checkpoint_hash.to_string(),
            last_sequence,
            entry_count,
            timestamp: now,
            requesting_agency: self.local.code.clone(),
        };

        let mut signatures = vec![self.sign(&request)?];

        let responses = join_all(
            self.config
                .agencies
                .iter()
                .map(|agency| self.request_signature(agency, &request)),
        )
        .await;

        let mut errors = Vec::new();
        for (agency, response) in self.config.agencies.iter().zip(responses) {
            match response {
                Ok(signature) => signatures.push(signature),
                Err(e) => {
                    warn!("Agency {} did not co-sign checkpoint: {}", agency.agency_code, e);
                    errors.push(format!("{}: {}", agency.agency_code, e));
                }
            }
        }

        let status = if signatures.len() >= self.config.min_signatures {
            WitnessStatus::Confirmed
        } else {
            WitnessStatus::Failed
        };
        debug!(
            "Multi-agency proof for {}: {}/{} signatures ({})",
            checkpoint_hash,
            signatures.len(),
            self.config.min_signatures,
            status.as_str()
        );
        if status == WitnessStatus::Failed && !errors.is_empty() {
            debug!("Co-signing errors: {}", errors.join("; "));
        }

        Ok(MultiAgencyProof {
            id: Uuid::new_v4(),
            checkpoint_hash: checkpoint_hash.to_string(),
            last_sequence,
            entry_count,
            signatures,
            min_required: self.config.min_signatures,
            created_at: now,
            status,
        })
    }

    /// Sign a request with this agency's key.
    pub fn sign(&self, request: &WitnessRequest) -> Result<AgencySignature> {
        let signature = self
            .secp
            .sign_ecdsa(&request.message()?, &self.local.secret_key);

        Ok(AgencySignature {
            agency_code: self.local.code.clone(),
            agency_name: self.local.name.clone(),
            signature: BASE64.encode(signature.serialize_der()),
            public_key: self.local.public_key_hex(),
            signed_at: Utc::now(),
        })
    }

    async fn request_signature(
        &self,
        agency: &AgencyWitnessConfig,
        request: &WitnessRequest,
    ) -> Result<AgencySignature> {
        let url = format!("{}{}", agency.endpoint_url.trim_end_matches('/'), SIGN_PATH);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| AuditError::Witness(format!("failed to send request: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuditError::Witness(format!(
                "agency returned status {}",
                response.status()
            )));
        }

        let signature: AgencySignature = response
            .json()
            .await
            .map_err(|e| AuditError::Witness(format!("failed to decode response: {}", e)))?;

        if signature.agency_code != agency.agency_code {
            return Err(AuditError::Witness(format!(
                "response signed as {} instead of {}",
                signature.agency_code, agency.agency_code
            )));
        }
        self.check_signature(&signature, request)?;

        Ok(signature)
    }

    /// Check a signature against the configured key of its agency.
    fn check_signature(&self, signature: &AgencySignature, request: &WitnessRequest) -> Result<()> {
        let key = self
            .keys
            .get(&signature.agency_code)
            .ok_or_else(|| AuditError::Crypto("unknown agency".to_string()))?;

        let der = BASE64
            .decode(&signature.signature)
            .map_err(|e| AuditError::Crypto(format!("failed to decode signature: {}", e)))?;
        let sig = Signature::from_der(&der)?;

        self.secp
            .verify_ecdsa(&request.message()?, &sig, key)
            .map_err(|_| AuditError::Crypto("signature verification failed".to_string()))
    }

    /// Verify every signature of a proof and apply the threshold.
    pub fn verify_proof(&self, proof: &MultiAgencyProof) -> ProofVerification {
        let request = proof.request();
        let mut signers = HashSet::new();
        let mut details = Vec::with_capacity(proof.signatures.len());
        let mut invalid = 0;

        for signature in &proof.signatures {
            let outcome = self.check_signature(signature, &request);
            let valid = outcome.is_ok();
            if valid {
                signers.insert(signature.agency_code.as_str());
            } else {
                invalid += 1;
            }
            details.push(SignatureVerifyDetail {
                agency_code: signature.agency_code.clone(),
                agency_name: signature.agency_name.clone(),
                signed_at: signature.signed_at,
                valid,
                error: outcome.err().map(|e| e.to_string()),
            });
        }

        let required = self.config.min_signatures.max(proof.min_required);
        let valid_signatures = signers.len();
        let valid = valid_signatures >= required;
        let message = if valid {
            format!(
                "proof verified with {}/{} valid signatures",
                valid_signatures,
                proof.signatures.len()
            )
        } else {
            format!(
                "insufficient valid signatures: got {}, need {}",
                valid_signatures, required
            )
        };

        ProofVerification {
            valid,
            message,
            total_signatures: proof.signatures.len(),
            valid_signatures,
            invalid_signatures: invalid,
            details,
        }
    }

    /// Co-sign a request from a known peer agency.
    pub fn handle_sign_request(&self, request: &WitnessRequest) -> Result<AgencySignature> {
        if request.checkpoint_hash.is_empty() {
            return Err(AuditError::bad_request("checkpoint_hash is required"));
        }
        if request.requesting_agency.is_empty() {
            return Err(AuditError::bad_request("requesting_agency is required"));
        }
        if !self
            .config
            .agencies
            .iter()
            .any(|agency| agency.agency_code == request.requesting_agency)
        {
            return Err(AuditError::bad_request(format!(
                "unknown requesting agency: {}",
                request.requesting_agency
            )));
        }

        info!(
            "Co-signing checkpoint {} for agency {}",
            request.checkpoint_hash, request.requesting_agency
        );
        self.sign(request)
    }

    pub async fn timestamp(
        &self,
        hash: &str,
        last_sequence: i64,
        entry_count: i64,
    ) -> Result<WitnessReceipt> {
        let proof = self.create_proof(hash, last_sequence, entry_count).await?;
        if proof.status != WitnessStatus::Confirmed {
            return Err(AuditError::Witness(format!(
                "insufficient signatures: got {}, need {}",
                proof.signatures.len(),
                proof.min_required
            )));
        }
        Ok(WitnessReceipt::new(proof.to_bytes()?))
    }

    pub fn verify(&self, hash: &str, proof: &[u8]) -> Result<bool> {
        let proof = match MultiAgencyProof::from_bytes(proof) {
            Ok(proof) => proof,
            Err(e) => {
                debug!("Not a multi-agency proof: {}", e);
                return Ok(false);
            }
        };
        if proof.checkpoint_hash != hash {
            return Ok(false);
        }

        let result = self.verify_proof(&proof);
        if !result.valid {
            warn!("Multi-agency proof {} rejected: {}", proof.id, result.message);
        }
        Ok(result.valid)
    }

    pub fn get_status(&self, proof: &[u8]) -> Result<WitnessStatus> {
        Ok(MultiAgencyProof::from_bytes(proof)?.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(code: &str, agency: &LocalAgency) -> AgencyWitnessConfig {
        AgencyWitnessConfig {
            agency_code: code.to_string(),
            agency_name: format!("Agency {}", code),
            endpoint_url: "http://127.0.0.1:9".to_string(),
            public_key: agency.public_key_hex(),
        }
    }

    fn standalone() -> MultiAgencyWitness {
        MultiAgencyWitness::new(
            MultiAgencyConfig::default(),
            LocalAgency::generate("MUP", "Ministry of Interior"),
        )
        .unwrap()
    }

    #[test]
    fn test_threshold_validation() {
        let config = MultiAgencyConfig {
            min_signatures: 3,
            ..MultiAgencyConfig::default()
        };
        let err = MultiAgencyWitness::new(config, LocalAgency::generate("A", "A")).unwrap_err();
        assert!(matches!(err, AuditError::Config(_)));

        let config = MultiAgencyConfig {
            min_signatures: 0,
            ..MultiAgencyConfig::default()
        };
        let witness = MultiAgencyWitness::new(config, LocalAgency::generate("A", "A")).unwrap();
        assert_eq!(witness.min_signatures(), 1);
    }

    #[test]
    fn test_invalid_peer_key_rejected() {
        let mut bad = peer("B", &LocalAgency::generate("B", "B"));
        bad.public_key = "zz".to_string();
        let config = MultiAgencyConfig {
            agencies: vec![bad],
            ..MultiAgencyConfig::default()
        };
        assert!(MultiAgencyWitness::new(config, LocalAgency::generate("A", "A")).is_err());
    }

    #[tokio::test]
    async fn test_local_only_proof_roundtrip() {
        let witness = standalone();
        let receipt = witness.timestamp("abc123", 42, 42).await.unwrap();

        assert!(witness.verify("abc123", &receipt.proof).unwrap());
        assert!(!witness.verify("other", &receipt.proof).unwrap());
        assert_eq!(
            witness.get_status(&receipt.proof).unwrap(),
            WitnessStatus::Confirmed
        );

        let proof = MultiAgencyProof::from_bytes(&receipt.proof).unwrap();
        assert_eq!(proof.last_sequence, 42);
        assert_eq!(proof.signatures.len(), 1);
    }

    #[tokio::test]
    async fn test_tampered_proof_rejected() {
        let witness = standalone();
        let receipt = witness.timestamp("abc123", 1, 1).await.unwrap();

        let mut proof = MultiAgencyProof::from_bytes(&receipt.proof).unwrap();
        proof.entry_count = 999;
        let forged = proof.to_bytes().unwrap();

        assert!(!witness.verify("abc123", &forged).unwrap());
    }

    #[tokio::test]
    async fn test_proof_from_unknown_key_rejected() {
        let ours = standalone();
        // Same agency code, different key
        let imposter = standalone();
        let receipt = imposter.timestamp("abc123", 1, 1).await.unwrap();

        assert!(!ours.verify("abc123", &receipt.proof).unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_peers_fail_threshold() {
        let config = MultiAgencyConfig {
            min_signatures: 2,
            agencies: vec![peer("B", &LocalAgency::generate("B", "B"))],
            request_timeout_secs: 1,
            ..MultiAgencyConfig::default()
        };
        let witness = MultiAgencyWitness::new(config, LocalAgency::generate("A", "A")).unwrap();

        let proof = witness.create_proof("abc123", 1, 1).await.unwrap();
        assert_eq!(proof.status, WitnessStatus::Failed);
        assert_eq!(proof.signatures.len(), 1);

        let err = witness.timestamp("abc123", 1, 1).await.unwrap_err();
        assert!(err.to_string().contains("insufficient signatures"));
    }

    #[test]
    fn test_duplicate_signatures_count_once() {
        let b = LocalAgency::generate("B", "B");
        let config = MultiAgencyConfig {
            min_signatures: 2,
            agencies: vec![peer("B", &b)],
            ..MultiAgencyConfig::default()
        };
        let witness = MultiAgencyWitness::new(config, LocalAgency::generate("A", "A")).unwrap();

        let created_at = truncate_to_micros(Utc::now());
        let request = WitnessRequest {
            checkpoint_hash: "abc".to_string(),
            last_sequence: 5,
            entry_count: 5,
            timestamp: created_at,
            requesting_agency: "A".to_string(),
        };
        let local = witness.sign(&request).unwrap();
        let proof = MultiAgencyProof {
            id: Uuid::new_v4(),
            checkpoint_hash: "abc".to_string(),
            last_sequence: 5,
            entry_count: 5,
            signatures: vec![local.clone(), local],
            min_required: 1,
            created_at,
            status: WitnessStatus::Confirmed,
        };

        let result = witness.verify_proof(&proof);
        assert!(!result.valid);
        assert_eq!(result.valid_signatures, 1);
        assert_eq!(result.total_signatures, 2);
    }

    #[test]
    fn test_handle_sign_request_validation() {
        let requester = LocalAgency::generate("A", "A");
        let config = MultiAgencyConfig {
            agencies: vec![peer("A", &requester)],
            ..MultiAgencyConfig::default()
        };
        let witness = MultiAgencyWitness::new(config, LocalAgency::generate("B", "B")).unwrap();

        let mut request = WitnessRequest {
            checkpoint_hash: "abc".to_string(),
            last_sequence: 1,
            entry_count: 1,
            timestamp: Utc::now(),
            requesting_agency: "A".to_string(),
        };
        let signature = witness.handle_sign_request(&request).unwrap();
        assert_eq!(signature.agency_code, "B");

        request.requesting_agency = "Z".to_string();
        assert!(matches!(
            witness.handle_sign_request(&request),
            Err(AuditError::BadRequest(_))
        ));

        request.requesting_agency = "A".to_string();
        request.checkpoint_hash.clear();
        assert!(witness.handle_sign_request(&request).is_err());
    }

    #[test]
    fn test_signing_payload_ignores_requester() {
        let mut request = WitnessRequest {
            checkpoint_hash: "abc".to_string(),
            last_sequence: 1,
            entry_count: 2,
            timestamp: Utc::now(),
            requesting_agency: "A".to_string(),
        };
        let payload = request.signing_payload();
        request.requesting_agency = "B".to_string();
        assert_eq!(payload, request.signing_payload());
    }
}
