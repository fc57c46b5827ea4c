//! Append-Only Audit Store
//!
//! Ordered persistence for the audit chain with a single global cursor.
//! Appends are serialized through the cursor lock; reads never take it.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{ActorType, AuditEntry, ChainVerifier, Order, VerifyResult};
use crate::checkpoint::Checkpoint;
use crate::error::Result;

pub use memory::MemoryStore;
pub use sql::SqlStore;

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 100;
pub const DEFAULT_VERIFY_LIMIT: i64 = 100;
pub const MAX_VERIFY_LIMIT: i64 = 1000;

/// Current head of the chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainCursor {
    pub last_hash: String,
    pub last_sequence: i64,
}

impl ChainCursor {
    pub fn is_empty(&self) -> bool {
        self.last_sequence == 0
    }

    /// Thread `entry` onto this cursor: assign the next sequence number and
    /// re-hash against the current head. The cursor itself is only advanced
    /// by `advance` once the entry is durable.
    pub fn prepare(&self, entry: &mut AuditEntry) {
        entry.sequence = self.last_sequence + 1;
        entry.rechain(&self.last_hash);
    }

    pub fn advance(&mut self, entry: &AuditEntry) {
        self.last_hash = entry.hash.clone();
        self.last_sequence = entry.sequence;
    }
}

/// Filter for listing entries. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub actor_id: Option<Uuid>,
    pub actor_type: Option<ActorType>,
    /// Prefix match, e.g. `case.` for every case action
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl ListFilter {
    pub fn limit(&self) -> i64 {
        clamp_limit(self.limit, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.max(0)
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.actor_id.map_or(true, |id| entry.actor_id == id)
            && self.actor_type.map_or(true, |t| entry.actor_type == t)
            && self
                .action
                .as_deref()
                .map_or(true, |prefix| entry.action.starts_with(prefix))
            && self
                .resource_type
                .as_deref()
                .map_or(true, |t| entry.resource_type == t)
            && self
                .resource_id
                .map_or(true, |id| entry.resource_id == Some(id))
            && self.start_time.map_or(true, |t| entry.timestamp >= t)
            && self.end_time.map_or(true, |t| entry.timestamp <= t)
    }
}

/// Non-positive limits fall back to the default; large ones are capped.
pub fn clamp_limit(limit: i64, default: i64, max: i64) -> i64 {
    if limit <= 0 {
        default
    } else {
        limit.min(max)
    }
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Load the cursor from durable storage. An empty chain is not an error.
    async fn initialize(&self) -> Result<()>;

    /// Append under the chain lock. Returns the entry as stored, with its
    /// sequence assigned and `prev_hash`/`hash` threaded onto the chain.
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry>;

    async fn list(&self, filter: &ListFilter) -> Result<(Vec<AuditEntry>, i64)>;

    async fn find_by_id(&self, id: Uuid) -> Result<AuditEntry>;

    async fn get_by_resource(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEntry>>;

    async fn count(&self) -> Result<i64>;

    /// The newest `limit` entries, newest first.
    async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>>;

    /// Id of the entry at the head of the chain
    async fn last_entry_id(&self) -> Result<Option<Uuid>>;

    async fn cursor(&self) -> ChainCursor;

    async fn get_last_hash(&self) -> String {
        self.cursor().await.last_hash
    }

    async fn get_sequence(&self) -> i64 {
        self.cursor().await.last_sequence
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn get_latest_checkpoint(&self) -> Result<Option<Checkpoint>>;

    async fn list_checkpoints(&self, limit: i64) -> Result<Vec<Checkpoint>>;

    async fn get_checkpoint(&self, id: Uuid) -> Result<Checkpoint>;
}

/// Verify the newest `limit` entries of the chain.
pub async fn verify_chain(
    store: &dyn AuditStore,
    limit: i64,
    include_details: bool,
) -> Result<VerifyResult> {
    let limit = clamp_limit(limit, DEFAULT_VERIFY_LIMIT, MAX_VERIFY_LIMIT);
    let entries = store.recent(limit).await?;
    Ok(ChainVerifier::new(Order::Descending)
        .with_details(include_details)
        .verify(&entries))
}
