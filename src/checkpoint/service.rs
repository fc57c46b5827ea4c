//! Checkpoint Service
//!
//! Creates witnessed checkpoints over the current chain head and later
//! re-verifies them against the live chain.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::entry::truncate_to_micros;
use crate::checkpoint::{clamp_checkpoint_limit, compute_checkpoint_hash, Checkpoint};
use crate::error::{AuditError, Result};
use crate::store::AuditStore;
use crate::witness::{Witness, WitnessStatus};

/// Outcome of re-verifying a checkpoint
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointVerifyResult {
    pub checkpoint: Checkpoint,
    pub valid: bool,
    pub chain_valid: bool,
    pub witness_valid: bool,
    pub entries_intact: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

pub struct CheckpointService {
    store: Arc<dyn AuditStore>,
    witness: Witness,
    timeout: Option<Duration>,
}

impl CheckpointService {
    pub fn new(store: Arc<dyn AuditStore>, witness: Witness) -> Self {
        Self {
            store,
            witness,
            timeout: None,
        }
    }

    /// Bound `create_checkpoint` and `verify_checkpoint` by a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn witness(&self) -> &Witness {
        &self.witness
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub async fn create_checkpoint(&self) -> Result<Checkpoint> {
        match self.timeout {
            Some(limit) => self.create_checkpoint_within(limit).await,
            None => {
                let checkpoint = self.witness_checkpoint().await?;
                self.persist(checkpoint).await
            }
        }
    }

    /// Create a checkpoint, giving up after `limit`. On expiry the witness
    /// call in flight is dropped and nothing is persisted.
    pub async fn create_checkpoint_within(&self, limit: Duration) -> Result<Checkpoint> {
        let checkpoint = timeout(limit, self.witness_checkpoint())
            .await
            .map_err(|_| {
                AuditError::Cancelled(format!(
                    "checkpoint creation exceeded {}ms",
                    limit.as_millis()
                ))
            })??;
        self.persist(checkpoint).await
    }

    /// Build and witness a checkpoint over the current head, without saving it.
    async fn witness_checkpoint(&self) -> Result<Checkpoint> {
        if self.store.cursor().await.is_empty() {
            return Err(AuditError::bad_request("no audit entries to checkpoint"));
        }

        // Hash, sequence and id all come from one read of the durable head
        let head = self
            .store
            .recent(1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AuditError::bad_request("no audit entries to checkpoint"))?;
        let entry_count = self.store.count().await?;

        let created_at = truncate_to_micros(Utc::now());
        let checkpoint_hash =
            compute_checkpoint_hash(&head.hash, head.sequence, entry_count, &created_at);

        let receipt = self
            .witness
            .timestamp(&checkpoint_hash, head.sequence, entry_count)
            .await
            .map_err(|e| match e {
                AuditError::Witness(_) => e,
                other => AuditError::Witness(format!("failed to get witness timestamp: {}", other)),
            })?;

        let witness_status = match self.witness.get_status(&receipt.proof).await {
            Ok(status) => status,
            Err(e) => {
                debug!("Witness status unavailable, recording as pending: {}", e);
                WitnessStatus::Pending
            }
        };

        Ok(Checkpoint {
            id: Uuid::new_v4(),
            checkpoint_hash,
            last_sequence: head.sequence,
            last_entry_id: head.id,
            entry_count,
            witness_type: self.witness.witness_type(),
            witness_proof: receipt.proof,
            witness_url: receipt.url,
            witness_status,
            created_at,
            confirmed_at: (witness_status == WitnessStatus::Confirmed).then_some(created_at),
        })
    }

    async fn persist(&self, checkpoint: Checkpoint) -> Result<Checkpoint> {
        self.store.save_checkpoint(&checkpoint).await?;
        info!(
            "Created checkpoint {} at sequence {} ({} entries, {} witness, {})",
            checkpoint.id,
            checkpoint.last_sequence,
            checkpoint.entry_count,
            checkpoint.witness_type,
            checkpoint.witness_status.as_str()
        );
        Ok(checkpoint)
    }

    pub async fn verify_checkpoint(&self, id: Uuid) -> Result<CheckpointVerifyResult> {
        match self.timeout {
            Some(limit) => self.verify_checkpoint_within(id, limit).await,
            None => self.verify_inner(id).await,
        }
    }

    pub async fn verify_checkpoint_within(
        &self,
        id: Uuid,
        limit: Duration,
    ) -> Result<CheckpointVerifyResult> {
        timeout(limit, self.verify_inner(id)).await.map_err(|_| {
            AuditError::Cancelled(format!(
                "checkpoint verification exceeded {}ms",
                limit.as_millis()
            ))
        })?
    }

    async fn verify_inner(&self, id: Uuid) -> Result<CheckpointVerifyResult> {
        let checkpoint = self.store.get_checkpoint(id).await?;
        let mut chain_valid = true;
        let mut witness_valid = true;
        let mut entries_intact = true;
        let mut violations = Vec::new();

        // The store is append-only, so the count can never shrink
        match self.store.count().await {
            Err(e) => {
                chain_valid = false;
                violations.push(format!("Failed to count entries: {}", e));
            }
            Ok(count) if count < checkpoint.entry_count => {
                entries_intact = false;
                violations.push(format!(
                    "Entry count mismatch: expected {}, found {}",
                    checkpoint.entry_count, count
                ));
            }
            Ok(_) => {}
        }

        // The checkpointed head must still be the entry the hash was taken over
        match self.store.find_by_id(checkpoint.last_entry_id).await {
            Ok(head) => {
                let recomputed = compute_checkpoint_hash(
                    &head.hash,
                    checkpoint.last_sequence,
                    checkpoint.entry_count,
                    &checkpoint.created_at,
                );
                if recomputed != checkpoint.checkpoint_hash
                    || head.sequence != checkpoint.last_sequence
                {
                    chain_valid = false;
                    violations.push(format!(
                        "Checkpoint hash mismatch: head entry {} no longer matches",
                        checkpoint.last_entry_id
                    ));
                }
                if !head.verify_hash() {
                    chain_valid = false;
                    violations.push(format!(
                        "CONTENT TAMPERED: Entry {} (seq {}) - stored hash doesn't match content",
                        head.id, head.sequence
                    ));
                }
            }
            Err(e) if e.is_not_found() => {
                entries_intact = false;
                violations.push(format!(
                    "Checkpointed entry {} is missing",
                    checkpoint.last_entry_id
                ));
            }
            Err(e) => {
                chain_valid = false;
                violations.push(format!("Failed to load checkpointed entry: {}", e));
            }
        }

        // A proof can only be checked by a witness of the same kind
        if self.witness.witness_type() == checkpoint.witness_type {
            let verified = self
                .witness
                .verify(&checkpoint.checkpoint_hash, &checkpoint.witness_proof)
                .await;
            if !matches!(verified, Ok(true)) {
                witness_valid = false;
                violations.push("Witness proof verification failed".to_string());
            }
        } else {
            debug!(
                "Skipping witness check: checkpoint uses {}, configured witness is {}",
                checkpoint.witness_type,
                self.witness.witness_type()
            );
        }

        let valid = chain_valid && witness_valid && entries_intact;
        if !valid {
            warn!(
                "Checkpoint {} failed verification: {}",
                checkpoint.id,
                violations.join("; ")
            );
        }

        Ok(CheckpointVerifyResult {
            checkpoint,
            valid,
            chain_valid,
            witness_valid,
            entries_intact,
            violations,
        })
    }

    pub async fn get_latest_checkpoint(&self) -> Result<Checkpoint> {
        self.store
            .get_latest_checkpoint()
            .await?
            .ok_or_else(|| AuditError::not_found("checkpoint", "latest"))
    }

    pub async fn get_checkpoint(&self, id: Uuid) -> Result<Checkpoint> {
        self.store.get_checkpoint(id).await
    }

    pub async fn list_checkpoints(&self, limit: i64) -> Result<Vec<Checkpoint>> {
        self.store
            .list_checkpoints(clamp_checkpoint_limit(limit))
            .await
    }
}
