//! Audit Chain Core
//!
//! Canonical hashing of audit entries and tamper detection over
//! hash-chained windows of the log.

pub mod canonical;
pub mod entry;
pub mod verify;

pub use canonical::{canonical_string, canonicalize, canonicalize_serializable};
pub use entry::{actions, ActorType, AuditEntry, CorrectionEntry, CorrectionReason};
pub use verify::{find_tampered_entries, ChainVerifier, Order, VerifyEntryResult, VerifyResult, ViolationType};
