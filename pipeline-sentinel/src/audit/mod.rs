//! Immutable, checksum-protected audit trail
//!
//! Every security-relevant pipeline step (workflow boundaries, external
//! actions, bulk writes, approvals, violations, credential changes) is
//! recorded as an [`AuditEvent`] in the append-only `audit_events` table.
//!
//! # Integrity
//!
//! Each event carries a truncated BLAKE3 checksum over its immutable fields.
//! [`AuditLog::verify`] recomputes it on demand; a mismatch is escalated as a
//! security violation and a critical alert, and the stored event is never
//! rewritten.
//!
//! # Failure handling
//!
//! Writes are awaited. A store outage is returned to the caller and tracked so
//! that a prolonged outage raises `audit_storage_unreachable`.

pub mod archive;
pub mod checksum;
pub mod config;
pub mod event;
pub(crate) mod failure_tracker;
pub mod logger;

pub use archive::export_jsonl;
pub use checksum::verify_checksum;
pub use config::{AuditConfig, FailureAlertConfig};
pub use event::{ApprovalDecision, AuditEvent, AuditEventType, AuditStatus, NewAuditEvent};
pub use failure_tracker::FailureSnapshot;
pub use logger::{AuditLog, IntegrityReport, WorkflowAudit};
