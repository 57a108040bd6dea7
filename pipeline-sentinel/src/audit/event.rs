//! Audit event types
//!
//! An [`AuditEvent`] is immutable once written: the audit log assigns its id,
//! timestamp and checksum, and nothing ever rewrites it. Callers describe what
//! happened with a [`NewAuditEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::checksum;
use crate::ids::EventId;

/// Categories of audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A pipeline run started
    WorkflowStart,
    /// A pipeline run finished
    WorkflowEnd,
    /// A human approval was requested
    ApprovalRequested,
    /// A human approval was granted
    ApprovalGranted,
    /// A human approval was denied
    ApprovalDenied,
    /// An external action (fetch, extraction) started
    ActionStart,
    /// An external action succeeded
    ActionSuccess,
    /// An external action failed
    ActionFailure,
    /// A bulk write to a persistent store started
    PersistenceInsertStart,
    /// A bulk write succeeded
    PersistenceInsertSuccess,
    /// A bulk write failed
    PersistenceInsertFailure,
    /// A rate limit, credential or integrity rule was violated
    SecurityViolation,
    /// A credential was validated, rotated or rejected
    CredentialValidation,
}

impl AuditEventType {
    /// Stable wire name, also the checksum input
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkflowStart => "workflow_start",
            Self::WorkflowEnd => "workflow_end",
            Self::ApprovalRequested => "approval_requested",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalDenied => "approval_denied",
            Self::ActionStart => "action_start",
            Self::ActionSuccess => "action_success",
            Self::ActionFailure => "action_failure",
            Self::PersistenceInsertStart => "persistence_insert_start",
            Self::PersistenceInsertSuccess => "persistence_insert_success",
            Self::PersistenceInsertFailure => "persistence_insert_failure",
            Self::SecurityViolation => "security_violation",
            Self::CredentialValidation => "credential_validation",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded on an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Intent recorded before the action
    Started,
    /// Action completed
    Success,
    /// Action failed
    Error,
    /// Action refused by a policy
    Blocked,
}

impl AuditStatus {
    /// Stable wire name, also the checksum input
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Success => "success",
            Self::Error => "error",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted, checksum-protected audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier
    pub event_id: EventId,
    /// Category of the event
    pub event_type: AuditEventType,
    /// When the event was recorded (microsecond precision)
    pub timestamp: DateTime<Utc>,
    /// Pipeline run the event belongs to
    pub workflow_id: String,
    /// Human or service that caused the event
    #[serde(default)]
    pub actor_id: Option<String>,
    /// What was done
    pub action: String,
    /// What it was done to
    #[serde(default)]
    pub target: String,
    /// Outcome
    pub status: AuditStatus,
    /// Free-form structured payload (not covered by the checksum)
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Truncated BLAKE3 digest of the immutable fields
    pub checksum: String,
}

impl AuditEvent {
    /// Recompute the checksum from the stored fields
    pub fn compute_checksum(&self) -> String {
        checksum::compute(
            self.event_id.as_str(),
            self.event_type,
            self.timestamp,
            &self.workflow_id,
            &self.action,
            self.status,
        )
    }

    /// Whether the stored checksum matches the stored fields
    pub fn is_intact(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// Caller-supplied description of an event to record
///
/// The audit log fills in the id, timestamp and checksum.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    /// Category
    pub event_type: AuditEventType,
    /// Pipeline run
    pub workflow_id: String,
    /// Optional actor
    pub actor_id: Option<String>,
    /// What was done
    pub action: String,
    /// What it was done to
    pub target: String,
    /// Outcome
    pub status: AuditStatus,
    /// Structured payload
    pub details: Map<String, Value>,
}

impl NewAuditEvent {
    /// Describe an event with an empty target and no details
    pub fn new(
        event_type: AuditEventType,
        workflow_id: impl Into<String>,
        action: impl Into<String>,
        status: AuditStatus,
    ) -> Self {
        Self {
            event_type,
            workflow_id: workflow_id.into(),
            actor_id: None,
            action: action.into(),
            target: String::new(),
            status,
            details: Map::new(),
        }
    }

    /// Set the actor
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Set the target
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Add one detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Merge a JSON object into the details; non-object values are stored under `value`
    pub fn with_details(mut self, details: Value) -> Self {
        match details {
            Value::Object(map) => self.details.extend(map),
            Value::Null => {}
            other => {
                self.details.insert("value".to_string(), other);
            }
        }
        self
    }
}

/// An approval decision projected from the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Event that recorded the decision
    pub event_id: EventId,
    /// Pipeline run
    pub workflow_id: String,
    /// Kind of approval (e.g. `bulk_insert`)
    pub approval_type: String,
    /// Whether it was granted
    pub approved: bool,
    /// Who decided
    pub approver: Option<String>,
    /// Stated reason
    pub reason: Option<String>,
    /// When the decision was recorded
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    /// Project an approval-granted/denied event; `None` for other types
    pub fn from_event(event: &AuditEvent) -> Option<Self> {
        let approved = match event.event_type {
            AuditEventType::ApprovalGranted => true,
            AuditEventType::ApprovalDenied => false,
            _ => return None,
        };
        let text = |key: &str| event.details.get(key).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            event_id: event.event_id.clone(),
            workflow_id: event.workflow_id.clone(),
            approval_type: text("approval_type").unwrap_or_else(|| {
                event
                    .action
                    .strip_prefix("approval_")
                    .unwrap_or(&event.action)
                    .to_string()
            }),
            approved,
            approver: text("approver"),
            reason: text("reason"),
            decided_at: event.timestamp,
        })
    }
}
