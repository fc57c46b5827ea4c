//! SQLite-backed store
//!
//! Timestamps are stored as fixed-width RFC 3339 text so that range
//! filters can compare them lexically, and identifiers as hyphenated UUID
//! text. An append runs in its own transaction while the cursor lock is
//! held; the in-memory cursor only moves after the commit succeeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::entry::format_timestamp;
use crate::audit::{ActorType, AuditEntry};
use crate::checkpoint::{clamp_checkpoint_limit, Checkpoint};
use crate::error::{AuditError, Result};
use crate::store::{
    clamp_limit, AuditStore, ChainCursor, ListFilter, DEFAULT_LIST_LIMIT, DEFAULT_VERIFY_LIMIT,
    MAX_LIST_LIMIT, MAX_VERIFY_LIMIT,
};

const ENTRY_COLUMNS: &str = "id, sequence, timestamp, hash, prev_hash, actor_type, actor_id, \
     actor_agency_id, actor_ip, actor_device, action, resource_type, resource_id, changes, \
     correlation_id, session_id, justification";

const CHECKPOINT_COLUMNS: &str = "id, checkpoint_hash, last_sequence, last_entry_id, entry_count, \
     witness_type, witness_proof, witness_url, witness_status, created_at, confirmed_at";

pub struct SqlStore {
    pool: SqlitePool,
    cursor: Mutex<ChainCursor>,
}

impl SqlStore {
    /// Connect to a SQLite database, creating the file if needed.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AuditError::Config(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cursor: Mutex::new(ChainCursor::default()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/001_audit_entries.sql"))
            .execute(&self.pool)
            .await?;
        sqlx::raw_sql(include_str!("../../migrations/002_audit_checkpoints.sql"))
            .execute(&self.pool)
            .await?;

        info!("Audit store schema is up to date");
        Ok(())
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ListFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(actor_id) = filter.actor_id {
            builder.push(" AND actor_id = ").push_bind(actor_id.to_string());
        }
        if let Some(actor_type) = filter.actor_type {
            builder
                .push(" AND actor_type = ")
                .push_bind(actor_type.as_str().to_string());
        }
        if let Some(action) = &filter.action {
            builder
                .push(" AND substr(action, 1, length(")
                .push_bind(action.clone())
                .push(")) = ")
                .push_bind(action.clone());
        }
        if let Some(resource_type) = &filter.resource_type {
            builder
                .push(" AND resource_type = ")
                .push_bind(resource_type.clone());
        }
        if let Some(resource_id) = filter.resource_id {
            builder
                .push(" AND resource_id = ")
                .push_bind(resource_id.to_string());
        }
        if let Some(start) = &filter.start_time {
            builder.push(" AND timestamp >= ").push_bind(format_timestamp(start));
        }
        if let Some(end) = &filter.end_time {
            builder.push(" AND timestamp <= ").push_bind(format_timestamp(end));
        }
    }
}

#[async_trait]
impl AuditStore for SqlStore {
    async fn initialize(&self) -> Result<()> {
        let head = sqlx::query("SELECT hash, sequence FROM audit_entries ORDER BY sequence DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        let mut cursor = self.cursor.lock().await;
        *cursor = match head {
            Some(row) => ChainCursor {
                last_hash: row.try_get("hash")?,
                last_sequence: row.try_get("sequence")?,
            },
            None => ChainCursor::default(),
        };

        info!(
            "Audit chain initialized at sequence {}",
            cursor.last_sequence
        );
        Ok(())
    }

    async fn append(&self, mut entry: AuditEntry) -> Result<AuditEntry> {
        let mut cursor = self.cursor.lock().await;
        cursor.prepare(&mut entry);

        let changes = entry
            .changes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO audit_entries ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ENTRY_COLUMNS
        ))
        .bind(entry.id.to_string())
        .bind(entry.sequence)
        .bind(format_timestamp(&entry.timestamp))
        .bind(&entry.hash)
        .bind(&entry.prev_hash)
        .bind(entry.actor_type.as_str())
        .bind(entry.actor_id.to_string())
        .bind(entry.actor_agency_id.map(|id| id.to_string()))
        .bind(&entry.actor_ip)
        .bind(&entry.actor_device)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(entry.resource_id.map(|id| id.to_string()))
        .bind(changes)
        .bind(entry.correlation_id.map(|id| id.to_string()))
        .bind(entry.session_id.map(|id| id.to_string()))
        .bind(&entry.justification)
        .execute(&mut *tx)
        .await
        .map_err(|e| AuditError::storage("failed to append audit entry", e))?;
        tx.commit()
            .await
            .map_err(|e| AuditError::storage("failed to commit audit entry", e))?;

        cursor.advance(&entry);
        debug!("Appended audit entry {} (seq {})", entry.id, entry.sequence);
        Ok(entry)
    }

    async fn list(&self, filter: &ListFilter) -> Result<(Vec<AuditEntry>, i64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_entries");
        Self::push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM audit_entries", ENTRY_COLUMNS));
        Self::push_filters(&mut query, filter);
        query
            .push(" ORDER BY sequence DESC LIMIT ")
            .push_bind(filter.limit())
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let rows = query.build().fetch_all(&self.pool).await?;
        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>>>()?;
        Ok((entries, total))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<AuditEntry> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_entries WHERE id = ?",
            ENTRY_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AuditError::not_found("audit entry", id))?;

        entry_from_row(&row)
    }

    async fn get_by_resource(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_entries WHERE resource_type = ? AND resource_id = ? \
             ORDER BY sequence DESC LIMIT ?",
            ENTRY_COLUMNS
        ))
        .bind(resource_type)
        .bind(resource_id.to_string())
        .bind(clamp_limit(limit, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM audit_entries")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_entries ORDER BY sequence DESC LIMIT ?",
            ENTRY_COLUMNS
        ))
        .bind(clamp_limit(limit, DEFAULT_VERIFY_LIMIT, MAX_VERIFY_LIMIT))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn last_entry_id(&self) -> Result<Option<Uuid>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM audit_entries ORDER BY sequence DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        id.as_deref().map(parse_uuid).transpose()
    }

    async fn cursor(&self) -> ChainCursor {
        self.cursor.lock().await.clone()
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO audit_checkpoints ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CHECKPOINT_COLUMNS
        ))
        .bind(checkpoint.id.to_string())
        .bind(&checkpoint.checkpoint_hash)
        .bind(checkpoint.last_sequence)
        .bind(checkpoint.last_entry_id.to_string())
        .bind(checkpoint.entry_count)
        .bind(checkpoint.witness_type.as_str())
        .bind(&checkpoint.witness_proof)
        .bind(&checkpoint.witness_url)
        .bind(checkpoint.witness_status.as_str())
        .bind(format_timestamp(&checkpoint.created_at))
        .bind(checkpoint.confirmed_at.as_ref().map(format_timestamp))
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::storage("failed to save checkpoint", e))?;

        Ok(())
    }

    async fn get_latest_checkpoint(&self) -> Result<Option<Checkpoint>> {
        sqlx::query(&format!(
            "SELECT {} FROM audit_checkpoints ORDER BY created_at DESC LIMIT 1",
            CHECKPOINT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(checkpoint_from_row)
        .transpose()
    }

    async fn list_checkpoints(&self, limit: i64) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_checkpoints ORDER BY created_at DESC LIMIT ?",
            CHECKPOINT_COLUMNS
        ))
        .bind(clamp_checkpoint_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(checkpoint_from_row).collect()
    }

    async fn get_checkpoint(&self, id: Uuid) -> Result<Checkpoint> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_checkpoints WHERE id = ?",
            CHECKPOINT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AuditError::not_found("checkpoint", id))?;

        checkpoint_from_row(&row)
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| AuditError::storage("invalid stored UUID", e))
}

fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>> {
    value.as_deref().map(parse_uuid).transpose()
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AuditError::storage("invalid stored timestamp", e))
}

fn entry_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    let actor_type: String = row.try_get("actor_type")?;
    let changes: Option<String> = row.try_get("changes")?;
    let changes = changes
        .map(|raw| serde_json::from_str::<Map<String, Value>>(&raw))
        .transpose()?;

    Ok(AuditEntry {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        sequence: row.try_get("sequence")?,
        timestamp: parse_time(&row.try_get::<String, _>("timestamp")?)?,
        hash: row.try_get("hash")?,
        prev_hash: row.try_get("prev_hash")?,
        actor_type: ActorType::from_str(&actor_type)
            .map_err(|e| AuditError::storage("invalid stored actor type", e))?,
        actor_id: parse_uuid(&row.try_get::<String, _>("actor_id")?)?,
        actor_agency_id: parse_optional_uuid(row.try_get("actor_agency_id")?)?,
        actor_ip: row.try_get("actor_ip")?,
        actor_device: row.try_get("actor_device")?,
        action: row.try_get("action")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: parse_optional_uuid(row.try_get("resource_id")?)?,
        changes,
        correlation_id: parse_optional_uuid(row.try_get("correlation_id")?)?,
        session_id: parse_optional_uuid(row.try_get("session_id")?)?,
        justification: row.try_get("justification")?,
    })
}

fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint> {
    let witness_type: String = row.try_get("witness_type")?;
    let witness_status: String = row.try_get("witness_status")?;
    let confirmed_at: Option<String> = row.try_get("confirmed_at")?;

    Ok(Checkpoint {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        checkpoint_hash: row.try_get("checkpoint_hash")?,
        last_sequence: row.try_get("last_sequence")?,
        last_entry_id: parse_uuid(&row.try_get::<String, _>("last_entry_id")?)?,
        entry_count: row.try_get("entry_count")?,
        witness_type: witness_type
            .parse()
            .map_err(|e| AuditError::storage("invalid stored witness type", e))?,
        witness_proof: row.try_get("witness_proof")?,
        witness_url: row.try_get("witness_url")?,
        witness_status: witness_status
            .parse()
            .map_err(|e| AuditError::storage("invalid stored witness status", e))?,
        created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
        confirmed_at: confirmed_at.as_deref().map(parse_time).transpose()?,
    })
}
