//! In-memory store for development and tests.

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::checkpoint::{clamp_checkpoint_limit, Checkpoint};
use crate::error::{AuditError, Result};
use crate::store::{
    clamp_limit, AuditStore, ChainCursor, ListFilter, DEFAULT_LIST_LIMIT, DEFAULT_VERIFY_LIMIT,
    MAX_LIST_LIMIT, MAX_VERIFY_LIMIT,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Entries in sequence order
    entries: RwLock<Vec<AuditEntry>>,
    checkpoints: RwLock<Vec<Checkpoint>>,
    cursor: Mutex<ChainCursor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct mutable access to stored entries, bypassing the chain.
    /// Lets tests simulate tampering at rest.
    pub async fn tamper<F>(&self, f: F)
    where
        F: FnOnce(&mut Vec<AuditEntry>),
    {
        f(&mut *self.entries.write().await);
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        let entries = self.entries.read().await;
        let mut cursor = self.cursor.lock().await;
        *cursor = entries
            .last()
            .map(|entry| ChainCursor {
                last_hash: entry.hash.clone(),
                last_sequence: entry.sequence,
            })
            .unwrap_or_default();
        Ok(())
    }

    async fn append(&self, mut entry: AuditEntry) -> Result<AuditEntry> {
        let mut cursor = self.cursor.lock().await;
        cursor.prepare(&mut entry);

        self.entries.write().await.push(entry.clone());
        cursor.advance(&entry);

        debug!("Appended audit entry {} (seq {})", entry.id, entry.sequence);
        Ok(entry)
    }

    async fn list(&self, filter: &ListFilter) -> Result<(Vec<AuditEntry>, i64)> {
        let entries = self.entries.read().await;
        let matching: Vec<&AuditEntry> = entries.iter().rev().filter(|e| filter.matches(e)).collect();
        let total = matching.len() as i64;

        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
            .ok_or_else(|| AuditError::not_found("audit entry", id))
    }

    async fn get_by_resource(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEntry>> {
        let limit = clamp_limit(limit, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT) as usize;
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.resource_type == resource_type && e.resource_id == Some(resource_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.entries.read().await.len() as i64)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let limit = clamp_limit(limit, DEFAULT_VERIFY_LIMIT, MAX_VERIFY_LIMIT) as usize;
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn last_entry_id(&self) -> Result<Option<Uuid>> {
        Ok(self.entries.read().await.last().map(|entry| entry.id))
    }

    async fn cursor(&self) -> ChainCursor {
        self.cursor.lock().await.clone()
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.write().await.push(checkpoint.clone());
        Ok(())
    }

    async fn get_latest_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .iter()
            .max_by_key(|cp| cp.created_at)
            .cloned())
    }

    async fn list_checkpoints(&self, limit: i64) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = self.checkpoints.read().await.clone();
        checkpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        checkpoints.truncate(clamp_checkpoint_limit(limit) as usize);
        Ok(checkpoints)
    }

    async fn get_checkpoint(&self, id: Uuid) -> Result<Checkpoint> {
        self.checkpoints
            .read()
            .await
            .iter()
            .find(|cp| cp.id == id)
            .cloned()
            .ok_or_else(|| AuditError::not_found("checkpoint", id))
    }
}
