#![allow(dead_code)]

use audit_chain::audit::{actions, ActorType, AuditEntry};
use audit_chain::store::{AuditStore, MemoryStore, SqlStore};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Setup an in-memory SQLite store for testing
pub async fn setup_sql_store() -> SqlStore {
    let store = SqlStore::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");
    store.migrate().await.expect("Failed to run migrations");
    store.initialize().await.expect("Failed to initialize store");
    store
}

/// Setup a SQLite store backed by a file in `dir`
pub async fn setup_file_store(dir: &tempfile::TempDir) -> SqlStore {
    let url = format!("sqlite://{}", dir.path().join("audit.db").display());
    let store = SqlStore::connect(&url)
        .await
        .expect("Failed to create file database");
    store.migrate().await.expect("Failed to run migrations");
    store.initialize().await.expect("Failed to initialize store");
    store
}

pub fn changes(value: Value) -> Option<Map<String, Value>> {
    value.as_object().cloned()
}

/// A worker action on a case, not yet chained
pub fn case_entry(index: usize) -> AuditEntry {
    AuditEntry::new(
        ActorType::Worker,
        Uuid::new_v4(),
        Some(Uuid::new_v4()),
        actions::CASE_UPDATED,
        "case",
        Some(Uuid::new_v4()),
        changes(json!({
            "title": format!("Case {}", index),
            "status": {"from": "open", "to": "in_review"},
        })),
        "",
    )
}

/// Build a detached chain of `len` entries, oldest first
pub fn build_chain(len: usize) -> Vec<AuditEntry> {
    let mut entries: Vec<AuditEntry> = Vec::with_capacity(len);
    for i in 0..len {
        let prev_hash = entries.last().map(|e| e.hash.clone()).unwrap_or_default();
        let mut entry = AuditEntry::new(
            ActorType::Worker,
            Uuid::new_v4(),
            None,
            actions::CASE_CREATED,
            "case",
            Some(Uuid::new_v4()),
            changes(json!({"title": format!("Case {}", i), "index": i})),
            prev_hash,
        );
        entry.sequence = i as i64 + 1;
        entries.push(entry);
    }
    entries
}

/// Append `count` entries to a store
pub async fn seed(store: &dyn AuditStore, count: usize) -> Vec<AuditEntry> {
    let mut stored = Vec::with_capacity(count);
    for i in 0..count {
        stored.push(store.append(case_entry(i)).await.expect("append failed"));
    }
    stored
}

pub async fn seeded_memory_store(count: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), count).await;
    store
}
