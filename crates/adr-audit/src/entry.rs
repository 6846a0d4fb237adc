// entry.rs — Action log entry data model.
//
// Every decision and side effect is recorded as an ActionLogEntry. Entries
// form a chain: each carries the previous entry's `merkle_hash` and its own
// hash over (payload || previous_hash). Entries are built as an
// `EntryDraft` and only become an `ActionLogEntry` when the log appends
// them, so a caller can never pick its own sequence number or hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of record this is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A node passed the gate and was executed.
    Executed,
    /// A node was blocked by the gate.
    Blocked,
    /// A node is waiting on a human approval record.
    AwaitingApproval,
    /// An in-flight node was aborted by a stop signal.
    Aborted,
    /// A node ran its declared compensation path.
    Compensated,
    /// A node ran and failed.
    Failed,
    /// The kill switch changed state or reported a fault.
    KillSwitch,
    /// A self-modification patch changed state.
    SelfModification,
    /// Periodic chain anchor written even when nothing happens.
    AnchorHeartbeat,
    /// An explicit operator action (approval, grant, resume).
    Operator,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryKind::Executed => "executed",
            EntryKind::Blocked => "blocked",
            EntryKind::AwaitingApproval => "awaiting_approval",
            EntryKind::Aborted => "aborted",
            EntryKind::Compensated => "compensated",
            EntryKind::Failed => "failed",
            EntryKind::KillSwitch => "kill_switch",
            EntryKind::SelfModification => "self_modification",
            EntryKind::AnchorHeartbeat => "anchor_heartbeat",
            EntryKind::Operator => "operator",
        };
        write!(f, "{}", s)
    }
}

/// Structured justification: the `why` of an entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Justification {
    /// One-line summary of the decision.
    pub summary: String,
    /// Individual reasons (failed predicates, operator notes).
    #[serde(default)]
    pub details: Vec<String>,
}

impl Justification {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: Vec::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }
}

/// Trust and approval metadata attached to a node decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TrustRecord {
    pub declared: String,
    pub effective: String,
    #[serde(default)]
    pub approved_by: Option<String>,
}

/// The numeric verdict of the execution decision gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DecisionRecord {
    pub confidence_safety: f64,
    pub confidence_semantic: f64,
    pub threshold: f64,
}

/// An entry that has not been appended yet.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub kind: EntryKind,
    pub action: String,
    pub run_id: Option<Uuid>,
    pub intent: Option<String>,
    pub why: Justification,
    pub trust: Option<TrustRecord>,
    pub risk: Option<String>,
    pub decision: Option<DecisionRecord>,
}

impl EntryDraft {
    pub fn new(kind: EntryKind, action: impl Into<String>) -> Self {
        Self {
            kind,
            action: action.into(),
            run_id: None,
            intent: None,
            why: Justification::default(),
            trust: None,
            risk: None,
            decision: None,
        }
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn with_why(mut self, why: Justification) -> Self {
        self.why = why;
        self
    }

    pub fn with_trust(mut self, trust: TrustRecord) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn with_risk(mut self, risk: impl Into<String>) -> Self {
        self.risk = Some(risk.into());
        self
    }

    pub fn with_decision(mut self, decision: DecisionRecord) -> Self {
        self.decision = Some(decision);
        self
    }
}

/// A single appended entry, one line in the JSONL log.
///
/// `deny_unknown_fields` plus canonical re-encoding during verification
/// means a stored line is accepted only if it is byte-for-byte what the log
/// would have written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ActionLogEntry {
    pub seq: u64,
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EntryKind,
    pub run_id: Option<Uuid>,
    pub action: String,
    pub intent: Option<String>,
    pub why: Justification,
    pub trust: Option<TrustRecord>,
    pub risk: Option<String>,
    pub decision: Option<DecisionRecord>,
    pub previous_hash: Option<String>,
    pub merkle_hash: String,
}

/// Everything in an entry except its own hash, in field order.
#[derive(Serialize)]
struct Payload<'a> {
    seq: u64,
    entry_id: &'a Uuid,
    timestamp: &'a DateTime<Utc>,
    kind: EntryKind,
    run_id: &'a Option<Uuid>,
    action: &'a str,
    intent: &'a Option<String>,
    why: &'a Justification,
    trust: &'a Option<TrustRecord>,
    risk: &'a Option<String>,
    decision: &'a Option<DecisionRecord>,
    previous_hash: &'a Option<String>,
}

impl ActionLogEntry {
    /// Materialize a draft at a given chain position. The hash is left empty;
    /// the log fills it in via [`ActionLogEntry::compute_hash`].
    pub(crate) fn from_draft(
        draft: EntryDraft,
        seq: u64,
        timestamp: DateTime<Utc>,
        previous_hash: Option<String>,
    ) -> Self {
        Self {
            seq,
            entry_id: Uuid::new_v4(),
            timestamp,
            kind: draft.kind,
            run_id: draft.run_id,
            action: draft.action,
            intent: draft.intent,
            why: draft.why,
            trust: draft.trust,
            risk: draft.risk,
            decision: draft.decision,
            previous_hash,
            merkle_hash: String::new(),
        }
    }

    /// Canonical payload bytes (the entry minus `merkle_hash`).
    pub fn payload_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Payload {
            seq: self.seq,
            entry_id: &self.entry_id,
            timestamp: &self.timestamp,
            kind: self.kind,
            run_id: &self.run_id,
            action: &self.action,
            intent: &self.intent,
            why: &self.why,
            trust: &self.trust,
            risk: &self.risk,
            decision: &self.decision,
            previous_hash: &self.previous_hash,
        })
    }

    /// H(payload || previous_hash).
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let payload = self.payload_bytes()?;
        Ok(crate::hasher::chain_hash(
            &payload,
            self.previous_hash.as_deref(),
        ))
    }

    /// The stable export record consumed by external audit tooling.
    pub fn to_record(&self) -> AuditRecord {
        AuditRecord {
            action: self.action.clone(),
            intent: self.intent.clone(),
            why: self.why.clone(),
            trust: self.trust.clone(),
            risk: self.risk.clone(),
            merkle_hash: self.merkle_hash.clone(),
        }
    }
}

/// Export format for audit tooling. Field names are a compatibility
/// contract: audit trails outlive any single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub action: String,
    pub intent: Option<String>,
    pub why: Justification,
    pub trust: Option<TrustRecord>,
    pub risk: Option<String>,
    pub merkle_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ActionLogEntry {
        let draft = EntryDraft::new(EntryKind::Blocked, "write-report")
            .with_intent("publish-report")
            .with_why(Justification::new("semantic below threshold").with_detail("0.42 < 0.80"))
            .with_risk("medium");
        let mut entry = ActionLogEntry::from_draft(draft, 0, Utc::now(), None);
        entry.merkle_hash = entry.compute_hash().unwrap();
        entry
    }

    #[test]
    fn hash_covers_every_payload_field() {
        let entry = sample();
        let mut altered = entry.clone();
        altered.why.details[0] = "0.43 < 0.80".to_string();
        assert_ne!(entry.compute_hash().unwrap(), altered.compute_hash().unwrap());

        let mut altered = entry.clone();
        altered.previous_hash = Some("00".to_string());
        assert_ne!(entry.compute_hash().unwrap(), altered.compute_hash().unwrap());
    }

    #[test]
    fn payload_excludes_own_hash() {
        let entry = sample();
        let payload = String::from_utf8(entry.payload_bytes().unwrap()).unwrap();
        assert!(!payload.contains("merkle_hash"));
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&EntryKind::AnchorHeartbeat).unwrap();
        assert_eq!(json, "\"anchor_heartbeat\"");
        assert_eq!(EntryKind::AwaitingApproval.to_string(), "awaiting_approval");
    }

    #[test]
    fn export_record_has_stable_field_names() {
        let record = sample().to_record();
        let value = serde_json::to_value(&record).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        for key in ["action", "intent", "why", "trust", "risk", "merkle_hash"] {
            assert!(keys.contains(&key), "missing {}", key);
        }
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let entry = sample();
        let mut value = serde_json::to_value(&entry).unwrap();
        value
            .as_object_mut()
            .unwrap()
            .insert("extra".to_string(), serde_json::Value::Bool(true));
        assert!(serde_json::from_value::<ActionLogEntry>(value).is_err());
    }
}
