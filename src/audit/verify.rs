//! Audit Chain Verification
//!
//! Replays a window of stored entries and classifies tampering along two
//! independent axes: content (an entry's stored hash no longer matches its
//! fields) and linkage (an entry's hash no longer matches what its
//! chronological successor recorded as `prev_hash`). The first points at a
//! record edited in place, the second at records spliced, reordered or
//! deleted.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::entry::AuditEntry;

/// Traversal direction of the window handed to the verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Oldest entry first
    Ascending,
    /// Newest entry first, as the store returns them
    Descending,
}

/// Kind of violation found on a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationType {
    None,
    Content,
    Linkage,
    Both,
}

impl ViolationType {
    fn classify(content_valid: bool, linkage_valid: bool) -> Self {
        match (content_valid, linkage_valid) {
            (true, true) => ViolationType::None,
            (false, true) => ViolationType::Content,
            (true, false) => ViolationType::Linkage,
            (false, false) => ViolationType::Both,
        }
    }
}

/// Aggregate verification result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyResult {
    pub valid: bool,
    pub checked: usize,
    pub content_valid: usize,
    pub content_invalid: usize,
    pub linkage_valid: usize,
    pub linkage_invalid: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<VerifyEntryResult>,
}

/// Per-entry detail, only collected when details are requested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyEntryResult {
    pub id: Uuid,
    pub sequence: i64,
    pub hash: String,
    pub computed_hash: String,
    pub prev_hash: String,
    pub valid: bool,
    pub content_valid: bool,
    pub linkage_valid: bool,
    pub action: String,
    pub violation_type: ViolationType,
}

/// Stateless chain verifier
#[derive(Debug, Clone, Copy)]
pub struct ChainVerifier {
    order: Order,
    include_details: bool,
}

impl ChainVerifier {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            include_details: false,
        }
    }

    pub fn with_details(mut self, include_details: bool) -> Self {
        self.include_details = include_details;
        self
    }

    /// Verify a window of entries in the configured order.
    pub fn verify(&self, entries: &[AuditEntry]) -> VerifyResult {
        let mut result = VerifyResult {
            valid: true,
            ..Default::default()
        };

        for (i, entry) in entries.iter().enumerate() {
            let computed_hash = entry.compute_hash();
            let content_valid = computed_hash == entry.hash;

            if content_valid {
                result.content_valid += 1;
            } else {
                result.content_invalid += 1;
                result.violations.push(format!(
                    "CONTENT TAMPERED: Entry {} (seq {}) - stored hash doesn't match content",
                    entry.id, entry.sequence
                ));
            }

            // The newest entry of the window has no successor to check against
            let linkage_valid = match self.successor(entries, i) {
                Some(next) if next.prev_hash != entry.hash => {
                    result.linkage_invalid += 1;
                    result.violations.push(format!(
                        "CHAIN BROKEN: Entry {} (seq {}) - hash doesn't match next entry's prev_hash",
                        entry.id, entry.sequence
                    ));
                    false
                }
                Some(_) => {
                    result.linkage_valid += 1;
                    true
                }
                None => true,
            };

            let violation_type = ViolationType::classify(content_valid, linkage_valid);
            if violation_type != ViolationType::None {
                result.valid = false;
                warn!(
                    "Audit entry {} (seq {}) failed verification: {:?}",
                    entry.id, entry.sequence, violation_type
                );
            }

            if self.include_details {
                result.entries.push(VerifyEntryResult {
                    id: entry.id,
                    sequence: entry.sequence,
                    hash: entry.hash.clone(),
                    computed_hash,
                    prev_hash: entry.prev_hash.clone(),
                    valid: violation_type == ViolationType::None,
                    content_valid,
                    linkage_valid,
                    action: entry.action.clone(),
                    violation_type,
                });
            }

            result.checked += 1;
        }

        debug!(
            "Verified {} audit entries: {} content violations, {} linkage violations",
            result.checked, result.content_invalid, result.linkage_invalid
        );
        result
    }

    /// The chronologically next entry within the window, if any.
    fn successor<'a>(&self, entries: &'a [AuditEntry], index: usize) -> Option<&'a AuditEntry> {
        match self.order {
            Order::Ascending => entries.get(index + 1),
            Order::Descending => index.checked_sub(1).and_then(|i| entries.get(i)),
        }
    }
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new(Order::Descending)
    }
}

/// Indices of entries whose stored hash does not match their content
pub fn find_tampered_entries(entries: &[AuditEntry]) -> Vec<usize> {
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| !entry.verify_hash())
        .map(|(i, _)| i)
        .collect()
}
