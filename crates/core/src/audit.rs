use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::EntityKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    GenerateFromEnquiry,
    CreateRevision,
    Supersede,
    StatusTransition,
    Expire,
    TransitionRejected,
    StatusChange,
    UpdateItem,
    UpdateDiscount,
    ApprovalDecision,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateFromEnquiry => "generate_from_enquiry",
            Self::CreateRevision => "create_revision",
            Self::Supersede => "supersede",
            Self::StatusTransition => "status_transition",
            Self::Expire => "expire",
            Self::TransitionRejected => "transition_rejected",
            Self::StatusChange => "status_change",
            Self::UpdateItem => "update_item",
            Self::UpdateDiscount => "update_discount",
            Self::ApprovalDecision => "approval_decision",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "generate_from_enquiry" => Some(Self::GenerateFromEnquiry),
            "create_revision" => Some(Self::CreateRevision),
            "supersede" => Some(Self::Supersede),
            "status_transition" => Some(Self::StatusTransition),
            "expire" => Some(Self::Expire),
            "transition_rejected" => Some(Self::TransitionRejected),
            "status_change" => Some(Self::StatusChange),
            "update_item" => Some(Self::UpdateItem),
            "update_discount" => Some(Self::UpdateDiscount),
            "approval_decision" => Some(Self::ApprovalDecision),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "success" => Some(Self::Success),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub action: AuditAction,
    pub actor_id: Option<String>,
    pub outcome: AuditOutcome,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        action: AuditAction,
        actor_id: Option<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            action,
            actor_id,
            outcome,
            before: None,
            after: None,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Snapshots that fail to serialize are recorded as absent.
    pub fn with_before<T: Serialize>(mut self, snapshot: &T) -> Self {
        self.before = serde_json::to_value(snapshot).ok();
        self
    }

    pub fn with_after<T: Serialize>(mut self, snapshot: &T) -> Self {
        self.after = serde_json::to_value(snapshot).ok();
        self
    }
}

/// An audit event sealed into its entity's hash chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub event: AuditEvent,
}

impl AuditEntry {
    /// `previous` must be the latest entry recorded for the same entity.
    pub fn seal(event: AuditEvent, previous: Option<(u64, &str)>) -> Self {
        let (sequence, prev_hash) = match previous {
            Some((sequence, hash)) => (sequence.saturating_add(1), Some(hash.to_string())),
            None => (1, None),
        };
        let entry_hash = hash_entry_material(&event, sequence, prev_hash.as_deref());
        Self { sequence, prev_hash, entry_hash, event }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailVerification {
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Checks sequence continuity and the hash chain of a single entity's trail.
pub fn verify_trail(entries: &[AuditEntry]) -> TrailVerification {
    let mut previous_hash: Option<String> = None;
    let mut subject: Option<(EntityKind, &str)> = None;

    for (index, entry) in entries.iter().enumerate() {
        let failure = |reason: String| TrailVerification {
            valid: false,
            verified_entries: index,
            latest_hash: previous_hash.clone(),
            failure_reason: Some(reason),
        };

        let entity = (entry.event.entity_type, entry.event.entity_id.as_str());
        match subject {
            None => subject = Some(entity),
            Some(expected) if expected != entity => {
                return failure(format!(
                    "entry {} belongs to {} {} instead of {} {}",
                    entry.event.event_id, entity.0, entity.1, expected.0, expected.1
                ));
            }
            Some(_) => {}
        }

        let expected_sequence = u64::try_from(index).unwrap_or(u64::MAX).saturating_add(1);
        if entry.sequence != expected_sequence {
            return failure(format!(
                "sequence mismatch at entry {}: expected {}, found {}",
                entry.event.event_id, expected_sequence, entry.sequence
            ));
        }

        if entry.prev_hash != previous_hash {
            return failure(format!("previous hash mismatch at entry {}", entry.event.event_id));
        }

        let computed =
            hash_entry_material(&entry.event, entry.sequence, entry.prev_hash.as_deref());
        if computed != entry.entry_hash {
            return failure(format!("entry hash mismatch at entry {}", entry.event.event_id));
        }

        previous_hash = Some(entry.entry_hash.clone());
    }

    TrailVerification {
        valid: true,
        verified_entries: entries.len(),
        latest_hash: previous_hash,
        failure_reason: None,
    }
}

fn hash_entry_material(event: &AuditEvent, sequence: u64, prev_hash: Option<&str>) -> String {
    let payload = serde_json::to_vec(&(&event.before, &event.after, &event.metadata))
        .unwrap_or_else(|_| event.event_id.as_bytes().to_vec());
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        event.event_id,
        event.entity_type.as_str(),
        event.entity_id,
        sequence,
        event.action.as_str(),
        event.outcome.as_str(),
        event.actor_id.as_deref().unwrap_or(""),
        event.occurred_at.to_rfc3339(),
        prev_hash.unwrap_or(""),
        sha256_hex(&payload),
    );
    sha256_hex(material.as_bytes())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
