//! Time-Stamping Authority
//!
//! An internal RFC 3161 style authority that issues signed timestamp
//! tokens over a message imprint, and the witness that anchors checkpoint
//! hashes with it. Tokens are signed with the authority's secp256k1 key
//! and verified against that key only, never against key material carried
//! inside the token.

use chrono::{DateTime, Utc};
use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::audit::canonical::canonicalize_serializable;
use crate::error::{AuditError, Result};
use crate::witness::{WitnessReceipt, WitnessStatus};

/// Policy OID stamped into tokens when none is configured
pub const DEFAULT_POLICY_OID: &str = "1.3.6.1.4.1.99999.1.1";

const HASH_ALGORITHM: &str = "sha256";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsaConfig {
    pub enabled: bool,
    pub issuer: String,
    pub policy_oid: String,
    pub accuracy_seconds: u32,
}

impl Default for TsaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            issuer: "Audit Chain TSA".to_string(),
            policy_oid: DEFAULT_POLICY_OID.to_string(),
            accuracy_seconds: 1,
        }
    }
}

/// Signed portion of a timestamp token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TstInfo {
    pub version: u32,
    pub policy_oid: String,
    pub hash_algorithm: String,
    /// Hex-encoded message imprint
    pub hashed_message: String,
    pub serial_number: u64,
    pub gen_time: DateTime<Utc>,
    pub accuracy_seconds: u32,
    pub issuer: String,
}

/// Timestamp token: TSTInfo plus the authority's DER signature (hex)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampToken {
    pub info: TstInfo,
    pub signature: String,
}

impl TimestampToken {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        canonicalize_serializable(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimestampResponse {
    pub serial_number: u64,
    pub timestamp: DateTime<Utc>,
    pub hash_algorithm: String,
    pub hashed_message: String,
    pub token: Vec<u8>,
    pub policy_oid: String,
    pub issuer: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenVerification {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

impl TokenVerification {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            timestamp: None,
            serial_number: None,
            issuer: None,
        }
    }
}

#[derive(Debug)]
pub struct TimestampAuthority {
    config: TsaConfig,
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    public_key: PublicKey,
    serial_counter: AtomicU64,
}

impl TimestampAuthority {
    pub fn new(config: TsaConfig, secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64;

        info!("Time-stamping authority '{}' initialized", config.issuer);
        Self {
            config,
            secp,
            secret_key,
            public_key,
            serial_counter: AtomicU64::new(seed),
        }
    }

    /// Authority with a freshly generated signing key (development and tests)
    pub fn generate(config: TsaConfig) -> Self {
        let secret_key = SecretKey::new(&mut secp256k1::rand::thread_rng());
        Self::new(config, secret_key)
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Issue a token over a raw message imprint.
    pub fn timestamp(&self, data_hash: &[u8]) -> Result<TimestampResponse> {
        if !self.config.enabled {
            return Err(AuditError::Witness("TSA is not enabled".to_string()));
        }

        let serial_number = self.serial_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();

        let info = TstInfo {
            version: 1,
            policy_oid: self.config.policy_oid.clone(),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            hashed_message: hex::encode(data_hash),
            serial_number,
            gen_time: now,
            accuracy_seconds: self.config.accuracy_seconds,
            issuer: self.config.issuer.clone(),
        };

        let message = tst_info_message(&info)?;
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key);
        let token = TimestampToken {
            info,
            signature: hex::encode(signature.serialize_der()),
        };

        debug!("Issued timestamp token #{}", serial_number);
        Ok(TimestampResponse {
            serial_number,
            timestamp: now,
            hash_algorithm: HASH_ALGORITHM.to_string(),
            hashed_message: token.info.hashed_message.clone(),
            token: token.to_bytes()?,
            policy_oid: token.info.policy_oid.clone(),
            issuer: token.info.issuer.clone(),
        })
    }

    /// Issue a token for a hex-encoded hash.
    pub fn timestamp_hash(&self, hash_hex: &str) -> Result<TimestampResponse> {
        let hash = hex::decode(hash_hex)
            .map_err(|e| AuditError::bad_request(format!("invalid hash hex: {}", e)))?;
        self.timestamp(&hash)
    }

    /// Issue a token for raw data, hashing it first.
    pub fn timestamp_data(&self, data: &[u8]) -> Result<TimestampResponse> {
        let hash = Sha256::digest(data);
        self.timestamp(&hash)
    }

    /// Verify a token against the original message imprint.
    pub fn verify(&self, token: &[u8], original_hash: &[u8]) -> TokenVerification {
        let token = match TimestampToken::from_bytes(token) {
            Ok(token) => token,
            Err(e) => {
                return TokenVerification::invalid(format!(
                    "failed to parse timestamp token: {}",
                    e
                ))
            }
        };

        if token.info.hashed_message != hex::encode(original_hash) {
            return TokenVerification::invalid(
                "hash mismatch: timestamp was created for different data",
            );
        }

        let signature = match hex::decode(&token.signature)
            .ok()
            .and_then(|der| Signature::from_der(&der).ok())
        {
            Some(signature) => signature,
            None => return TokenVerification::invalid("malformed token signature"),
        };

        let message = match tst_info_message(&token.info) {
            Ok(message) => message,
            Err(e) => return TokenVerification::invalid(e.to_string()),
        };

        if self
            .secp
            .verify_ecdsa(&message, &signature, &self.public_key)
            .is_err()
        {
            return TokenVerification::invalid("token signature does not verify");
        }

        TokenVerification {
            valid: true,
            message: "timestamp verified successfully".to_string(),
            timestamp: Some(token.info.gen_time),
            serial_number: Some(token.info.serial_number),
            issuer: Some(token.info.issuer),
        }
    }
}

/// Digest of the canonical TSTInfo, the message the authority signs
fn tst_info_message(info: &TstInfo) -> Result<Message> {
    let digest = Sha256::digest(canonicalize_serializable(info)?);
    Message::from_digest_slice(&digest)
        .map_err(|e| AuditError::Crypto(format!("Invalid message hash: {}", e)))
}

/// Witness backed by a time-stamping authority
#[derive(Debug, Clone)]
pub struct TsaWitness {
    authority: Arc<TimestampAuthority>,
}

impl TsaWitness {
    pub fn new(authority: Arc<TimestampAuthority>) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &TimestampAuthority {
        &self.authority
    }

    /// The token itself is the proof.
    pub fn timestamp(&self, hash: &str) -> Result<WitnessReceipt> {
        let response = self
            .authority
            .timestamp_hash(hash)
            .map_err(|e| AuditError::Witness(format!("TSA timestamp failed: {}", e)))?;
        Ok(WitnessReceipt::new(response.token))
    }

    pub fn verify(&self, hash: &str, proof: &[u8]) -> Result<bool> {
        let hash_bytes = hex::decode(hash)
            .map_err(|e| AuditError::bad_request(format!("invalid hash: {}", e)))?;
        let result = self.authority.verify(proof, &hash_bytes);
        if !result.valid {
            debug!("TSA token rejected: {}", result.message);
        }
        Ok(result.valid)
    }

    /// Tokens are confirmed as soon as they are issued.
    pub fn get_status(&self, proof: &[u8]) -> WitnessStatus {
        if proof.is_empty() {
            WitnessStatus::Failed
        } else {
            WitnessStatus::Confirmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witness() -> TsaWitness {
        TsaWitness::new(Arc::new(TimestampAuthority::generate(TsaConfig::default())))
    }

    fn checkpoint_hash(seed: &str) -> String {
        hex::encode(Sha256::digest(seed.as_bytes()))
    }

    #[test]
    fn test_token_verifies_for_original_hash() {
        let witness = witness();
        let hash = checkpoint_hash("checkpoint-1");

        let receipt = witness.timestamp(&hash).unwrap();
        assert!(witness.verify(&hash, &receipt.proof).unwrap());
        assert_eq!(witness.get_status(&receipt.proof), WitnessStatus::Confirmed);
    }

    #[test]
    fn test_token_rejected_for_other_hash() {
        let witness = witness();
        let receipt = witness.timestamp(&checkpoint_hash("a")).unwrap();
        assert!(!witness.verify(&checkpoint_hash("b"), &receipt.proof).unwrap());
    }

    #[test]
    fn test_token_from_other_authority_rejected() {
        let ours = witness();
        let theirs = witness();
        let hash = checkpoint_hash("forged");

        let receipt = theirs.timestamp(&hash).unwrap();
        assert!(!ours.verify(&hash, &receipt.proof).unwrap());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let witness = witness();
        let hash = checkpoint_hash("x");
        let receipt = witness.timestamp(&hash).unwrap();

        let mut token = TimestampToken::from_bytes(&receipt.proof).unwrap();
        token.info.gen_time = token.info.gen_time - chrono::Duration::days(365);
        let forged = token.to_bytes().unwrap();

        assert!(!witness.verify(&hash, &forged).unwrap());
    }

    #[test]
    fn test_serial_numbers_increase() {
        let authority = TimestampAuthority::generate(TsaConfig::default());
        let first = authority.timestamp_data(b"one").unwrap();
        let second = authority.timestamp_data(b"two").unwrap();
        assert!(second.serial_number > first.serial_number);
        assert_eq!(first.hash_algorithm, "sha256");
    }

    #[test]
    fn test_disabled_authority_errors() {
        let authority = TimestampAuthority::generate(TsaConfig {
            enabled: false,
            ..TsaConfig::default()
        });
        let witness = TsaWitness::new(Arc::new(authority));
        assert!(witness.timestamp(&checkpoint_hash("x")).is_err());
    }

    #[test]
    fn test_invalid_hash_hex() {
        let witness = witness();
        assert!(witness.timestamp("not-hex").is_err());
        assert!(witness.verify("not-hex", b"{}").is_err());
    }

    #[test]
    fn test_garbage_proof_is_invalid_not_error() {
        let witness = witness();
        assert!(!witness.verify(&checkpoint_hash("x"), b"garbage").unwrap());
        assert_eq!(witness.get_status(&[]), WitnessStatus::Failed);
    }
}
