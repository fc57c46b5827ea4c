//! Audit Entry
//!
//! Defines the immutable audit record and its content hash. The hash
//! covers a fixed field set assembled in sorted key order; only the
//! free-form `changes` document goes through the general canonicalizer.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::audit::canonical::{canonical_string, write_key};

/// Common audit action codes
pub mod actions {
    pub const LOGIN: &str = "auth.login";
    pub const LOGOUT: &str = "auth.logout";
    pub const LOGIN_FAILED: &str = "auth.login_failed";

    pub const CASE_CREATED: &str = "case.created";
    pub const CASE_UPDATED: &str = "case.updated";
    pub const CASE_VIEWED: &str = "case.viewed";
    pub const CASE_SHARED: &str = "case.shared";
    pub const CASE_TRANSFERRED: &str = "case.transferred";
    pub const CASE_CLOSED: &str = "case.closed";

    pub const DOCUMENT_CREATED: &str = "document.created";
    pub const DOCUMENT_VIEWED: &str = "document.viewed";
    pub const DOCUMENT_UPLOADED: &str = "document.uploaded";
    pub const DOCUMENT_SIGNED: &str = "document.signed";
    pub const DOCUMENT_DOWNLOADED: &str = "document.downloaded";

    pub const JMBG_ACCESSED: &str = "sensitive.jmbg_accessed";
    pub const DATA_EXPORTED: &str = "sensitive.data_exported";

    pub const WORKER_CREATED: &str = "admin.worker_created";
    pub const WORKER_UPDATED: &str = "admin.worker_updated";
    pub const ROLE_CHANGED: &str = "admin.role_changed";

    /// Corrections never modify the original entry; they append a new one.
    pub const CORRECTION: &str = "correction";
    pub const CORRECTION_DATA: &str = "correction.data";
    pub const CORRECTION_VOID: &str = "correction.void";
    pub const CORRECTION_OVERRIDE: &str = "correction.override";
}

/// Resource type carried by correction entries
pub const CORRECTION_RESOURCE_TYPE: &str = "correction";

/// Who performed the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Citizen,
    Worker,
    System,
    External,
}

impl ActorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorType::Citizen => "citizen",
            ActorType::Worker => "worker",
            ActorType::System => "system",
            ActorType::External => "external",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "citizen" => Ok(ActorType::Citizen),
            "worker" => Ok(ActorType::Worker),
            "system" => Ok(ActorType::System),
            "external" => Ok(ActorType::External),
            _ => Err(format!("Unknown actor type: {}", s)),
        }
    }
}

/// Immutable audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    /// Assigned by the store at append time; not part of the hash.
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    #[serde(default)]
    pub prev_hash: String,

    pub actor_type: ActorType,
    pub actor_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_agency_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_device: Option<String>,

    pub action: String,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

impl AuditEntry {
    /// Create a new entry chained onto `prev_hash` and compute its hash.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        actor_type: ActorType,
        actor_id: Uuid,
        actor_agency_id: Option<Uuid>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Option<Uuid>,
        changes: Option<Map<String, Value>>,
        prev_hash: impl Into<String>,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: truncate_to_micros(Utc::now()),
            hash: String::new(),
            prev_hash: prev_hash.into(),
            actor_type,
            actor_id,
            actor_agency_id,
            actor_ip: None,
            actor_device: None,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id,
            changes,
            correlation_id: None,
            session_id: None,
            justification: None,
        };

        entry.hash = entry.compute_hash();
        entry
    }

    /// Create a correction entry referencing `correction.original_entry_id`.
    pub fn correction(
        actor_type: ActorType,
        actor_id: Uuid,
        actor_agency_id: Option<Uuid>,
        correction: CorrectionEntry,
        prev_hash: impl Into<String>,
    ) -> Self {
        let original_entry_id = correction.original_entry_id;
        let mut changes = Map::new();
        changes.insert("correction".to_string(), correction.to_value());

        Self::new(
            actor_type,
            actor_id,
            actor_agency_id,
            actions::CORRECTION,
            CORRECTION_RESOURCE_TYPE,
            Some(original_entry_id),
            Some(changes),
            prev_hash,
        )
    }

    /// Canonical hash input: `{"k":v,...}` over the hashed field set,
    /// keys in sorted order, optional fields omitted when absent.
    pub fn canonical_string(&self) -> String {
        let mut fields: Vec<(&'static str, Value)> = vec![
            ("id", Value::from(self.id.to_string())),
            ("timestamp", Value::from(format_timestamp(&self.timestamp))),
            ("prev_hash", Value::from(self.prev_hash.as_str())),
            ("actor_type", Value::from(self.actor_type.as_str())),
            ("actor_id", Value::from(self.actor_id.to_string())),
            ("action", Value::from(self.action.as_str())),
            ("resource_type", Value::from(self.resource_type.as_str())),
        ];

        if let Some(agency_id) = &self.actor_agency_id {
            fields.push(("actor_agency_id", Value::from(agency_id.to_string())));
        }
        if let Some(resource_id) = &self.resource_id {
            fields.push(("resource_id", Value::from(resource_id.to_string())));
        }
        if let Some(changes) = self.changes.as_ref().filter(|c| !c.is_empty()) {
            fields.push(("changes", Value::Object(changes.clone())));
        }

        fields.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::from("{");
        for (i, (key, value)) in fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_key(&mut out, key);
            out.push(':');
            out.push_str(&canonical_string(value));
        }
        out.push('}');
        out
    }

    /// SHA-256 over the canonical hash input, hex encoded
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check the stored hash against the current content
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Re-thread this entry onto a new predecessor and recompute its hash.
    /// Only the store calls this, while holding the chain lock.
    pub(crate) fn rechain(&mut self, prev_hash: &str) {
        self.prev_hash = prev_hash.to_string();
        self.hash = self.compute_hash();
    }

    pub fn with_context(
        mut self,
        correlation_id: Option<Uuid>,
        session_id: Option<Uuid>,
        justification: Option<String>,
    ) -> Self {
        self.correlation_id = correlation_id;
        self.session_id = session_id;
        self.justification = justification;
        self
    }

    pub fn with_request(mut self, ip: impl Into<String>, device: impl Into<String>) -> Self {
        self.actor_ip = Some(ip.into());
        self.actor_device = Some(device.into());
        self
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} on {} by {}:{} (seq {})",
            self.action, self.resource_type, self.actor_type, self.actor_id, self.sequence
        )
    }
}

/// Standard reasons for corrections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionReason {
    DataEntryError,
    LegalRequirement,
    CourtOrder,
    CitizenRequest,
    SystemError,
    Other,
}

impl CorrectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionReason::DataEntryError => "data_entry_error",
            CorrectionReason::LegalRequirement => "legal_requirement",
            CorrectionReason::CourtOrder => "court_order",
            CorrectionReason::CitizenRequest => "citizen_request",
            CorrectionReason::SystemError => "system_error",
            CorrectionReason::Other => "other",
        }
    }
}

/// Data carried by a correction entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub original_entry_id: Uuid,
    pub original_action: String,
    pub original_timestamp: DateTime<Utc>,
    pub reason: CorrectionReason,
    pub justification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Uuid>,
    #[serde(default)]
    pub old_value: Option<Map<String, Value>>,
    #[serde(default)]
    pub new_value: Option<Map<String, Value>>,
}

impl CorrectionEntry {
    fn to_value(&self) -> Value {
        let mut doc = json!({
            "original_entry_id": self.original_entry_id.to_string(),
            "original_action": self.original_action,
            "original_timestamp": format_timestamp(&self.original_timestamp),
            "reason": self.reason.as_str(),
            "justification": self.justification,
            "old_value": self.old_value.clone().map(Value::Object).unwrap_or(Value::Null),
            "new_value": self.new_value.clone().map(Value::Object).unwrap_or(Value::Null),
        });

        if let (Some(approver), Some(map)) = (self.approved_by, doc.as_object_mut()) {
            map.insert("approved_by".to_string(), Value::from(approver.to_string()));
        }
        doc
    }
}

/// Drop sub-microsecond precision so hashes survive backends that store µs.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = ts.nanosecond();
    ts.with_nanosecond(nanos - nanos % 1_000).unwrap_or(ts)
}

/// RFC 3339 in UTC with a nanosecond fraction
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
