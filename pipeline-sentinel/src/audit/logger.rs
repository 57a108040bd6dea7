//! Audit log service
//!
//! `AuditLog` is the only writer of the `audit_events` table. Every write is
//! awaited: a store failure or timeout is returned to the caller as a
//! persistence error and counted by the failure tracker, never dropped.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::archive;
use super::config::AuditConfig;
use super::event::{ApprovalDecision, AuditEvent, AuditEventType, AuditStatus, NewAuditEvent};
use super::failure_tracker::{FailureSnapshot, FailureTracker};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::ids::EventId;
use crate::metrics::{Alert, AlertManager, MetricsCollector, Severity};
use crate::store::{StoreHandle, Table};

/// Result of a full integrity scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Events examined
    pub checked: usize,
    /// Ids of events whose checksum did not verify
    pub tampered: Vec<String>,
    /// When the scan ran
    pub verified_at: DateTime<Utc>,
}

impl IntegrityReport {
    /// Whether every event verified
    pub fn is_clean(&self) -> bool {
        self.tampered.is_empty()
    }
}

struct AuditInner {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    alerts: AlertManager,
    failures: FailureTracker,
}

/// Append-only, checksum-protected audit trail
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<AuditInner>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("store", &self.inner.store)
            .finish()
    }
}

impl AuditLog {
    /// Create an audit log writing to `store`
    pub fn new(
        store: StoreHandle,
        clock: Arc<dyn Clock>,
        metrics: MetricsCollector,
        alerts: AlertManager,
        config: &AuditConfig,
        service_name: impl Into<String>,
    ) -> Self {
        let failures = FailureTracker::new(
            alerts.clone(),
            Arc::clone(&clock),
            config.failure_alerts.clone(),
            service_name.into(),
        );
        Self {
            inner: Arc::new(AuditInner {
                store,
                clock,
                metrics,
                alerts,
                failures,
            }),
        }
    }

    /// Persist an event and return its id
    ///
    /// The id, timestamp (truncated to microseconds) and checksum are
    /// assigned here.
    pub async fn record(&self, event: NewAuditEvent) -> Result<EventId> {
        let event_id = EventId::new();
        let timestamp = self.inner.clock.now().trunc_subsecs(6);
        let mut record = AuditEvent {
            event_id: event_id.clone(),
            event_type: event.event_type,
            timestamp,
            workflow_id: event.workflow_id,
            actor_id: event.actor_id,
            action: event.action,
            target: event.target,
            status: event.status,
            details: event.details,
            checksum: String::new(),
        };
        record.checksum = record.compute_checksum();

        let written = self
            .inner
            .store
            .append_record(Table::AuditEvents, event_id.as_str(), timestamp, &record)
            .await;

        match written {
            Ok(()) => {
                self.inner.failures.record_success();
                self.inner.metrics.increment_with(
                    "audit_events_recorded",
                    &[("type", record.event_type.as_str())],
                    1,
                );
                tracing::debug!(
                    event_id = %event_id,
                    event_type = %record.event_type,
                    workflow_id = %record.workflow_id,
                    action = %record.action,
                    status = %record.status,
                    "Audit event recorded"
                );
                Ok(event_id)
            }
            Err(e) => {
                self.inner.failures.record_failure(&e.to_string());
                self.inner.metrics.increment("audit_write_failures");
                tracing::error!(
                    event_type = %record.event_type,
                    workflow_id = %record.workflow_id,
                    action = %record.action,
                    error = %e,
                    "Failed to persist audit event"
                );
                Err(e)
            }
        }
    }

    /// Record a human approval decision
    ///
    /// Granted decisions are recorded with status success, denied ones with
    /// status blocked.
    pub async fn record_approval(
        &self,
        workflow_id: &str,
        approval_type: &str,
        approved: bool,
        approver: Option<&str>,
        reason: Option<&str>,
    ) -> Result<EventId> {
        let (event_type, status) = if approved {
            (AuditEventType::ApprovalGranted, AuditStatus::Success)
        } else {
            (AuditEventType::ApprovalDenied, AuditStatus::Blocked)
        };
        let event = NewAuditEvent::new(event_type, workflow_id, format!("approval_{approval_type}"), status)
            .with_target(workflow_id)
            .with_details(json!({
                "approval_type": approval_type,
                "approver": approver,
                "reason": reason,
                "decision_timestamp": self.inner.clock.now().to_rfc3339(),
            }));
        self.record(event).await
    }

    /// Record a blocked security violation
    pub async fn record_security_violation(
        &self,
        workflow_id: &str,
        violation_type: &str,
        details: Value,
    ) -> Result<EventId> {
        self.inner
            .metrics
            .increment_with("security_violations", &[("type", violation_type)], 1);
        tracing::warn!(
            workflow_id = %workflow_id,
            violation_type = %violation_type,
            "Security violation"
        );
        let event = NewAuditEvent::new(
            AuditEventType::SecurityViolation,
            workflow_id,
            "security_violation",
            AuditStatus::Blocked,
        )
        .with_target(violation_type)
        .with_detail("violation_type", violation_type)
        .with_details(details);
        self.record(event).await
    }

    /// Handle that stamps every event with one workflow id and actor
    pub fn for_workflow(&self, workflow_id: impl Into<String>) -> WorkflowAudit {
        WorkflowAudit {
            log: self.clone(),
            workflow_id: workflow_id.into(),
            actor_id: None,
        }
    }

    /// Fetch an event by id
    pub async fn get(&self, event_id: &str) -> Result<Option<AuditEvent>> {
        self.inner.store.get_record(Table::AuditEvents, event_id).await
    }

    /// Recompute and compare the checksum of a stored event
    ///
    /// Returns `false` when the event does not exist. A mismatch is escalated
    /// as a security-violation event, an `integrity_violations` metric and a
    /// critical alert; the stored event is left as found.
    pub async fn verify(&self, event_id: &str) -> Result<bool> {
        match self.get_verified(event_id).await {
            Ok(found) => Ok(found.is_some()),
            Err(Error::IntegrityViolation { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch an event only if its checksum still matches
    ///
    /// A tampered or unreadable event is escalated as in [`verify`](Self::verify)
    /// and returned as [`Error::IntegrityViolation`].
    pub async fn get_verified(&self, event_id: &str) -> Result<Option<AuditEvent>> {
        let Some(raw) = self.inner.store.get(Table::AuditEvents, event_id).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<AuditEvent>(raw) {
            Ok(event) if event.event_id.as_str() == event_id && event.is_intact() => Ok(Some(event)),
            parsed => {
                self.escalate_tampering(event_id, parsed.as_ref().ok()).await;
                Err(Error::IntegrityViolation {
                    event_id: event_id.to_string(),
                })
            }
        }
    }

    /// Verify every stored event
    pub async fn verify_all(&self) -> Result<IntegrityReport> {
        let rows = self.inner.store.range(Table::AuditEvents, None, None).await?;
        let checked = rows.len();
        let mut tampered = Vec::new();

        for raw in rows {
            let claimed_id = raw
                .get("event_id")
                .and_then(Value::as_str)
                .unwrap_or("<unreadable>")
                .to_string();
            match serde_json::from_value::<AuditEvent>(raw) {
                Ok(event) if event.is_intact() => {}
                Ok(event) => {
                    self.escalate_tampering(&claimed_id, Some(&event)).await;
                    tampered.push(claimed_id);
                }
                Err(_) => {
                    self.escalate_tampering(&claimed_id, None).await;
                    tampered.push(claimed_id);
                }
            }
        }

        let report = IntegrityReport {
            checked,
            tampered,
            verified_at: self.inner.clock.now(),
        };
        if report.is_clean() {
            tracing::info!(checked = report.checked, "Audit trail verified");
        }
        Ok(report)
    }

    async fn escalate_tampering(&self, event_id: &str, event: Option<&AuditEvent>) {
        self.inner.metrics.increment("integrity_violations");
        self.inner.alerts.raise(Alert {
            rule_name: "integrity_violation".to_string(),
            metric_name: "integrity_violations".to_string(),
            current_value: self.inner.metrics.counter("integrity_violations") as f64,
            threshold: 0.0,
            severity: Severity::Critical,
            triggered_at: self.inner.clock.now(),
            message: format!("Audit event {event_id} failed checksum verification"),
        });

        let workflow_id = event.map_or("sentinel", |e| e.workflow_id.as_str());
        let details = json!({
            "event_id": event_id,
            "stored_checksum": event.map(|e| e.checksum.clone()),
            "computed_checksum": event.map(AuditEvent::compute_checksum),
        });
        if let Err(e) = self
            .record_security_violation(workflow_id, "integrity_violation", details)
            .await
        {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Could not record integrity violation"
            );
        }
    }

    /// Every event of a workflow, oldest first
    pub async fn by_workflow(&self, workflow_id: &str) -> Result<Vec<AuditEvent>> {
        Ok(self
            .all_events()
            .await?
            .into_iter()
            .filter(|e| e.workflow_id == workflow_id)
            .collect())
    }

    /// Every event of a type, oldest first
    pub async fn by_type(&self, event_type: AuditEventType) -> Result<Vec<AuditEvent>> {
        Ok(self
            .all_events()
            .await?
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect())
    }

    /// Events with `from <= timestamp <= to`, oldest first
    pub async fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AuditEvent>> {
        self.inner
            .store
            .range_records(Table::AuditEvents, Some(from), Some(to))
            .await
    }

    /// Every security-violation event
    pub async fn security_violations(&self) -> Result<Vec<AuditEvent>> {
        self.by_type(AuditEventType::SecurityViolation).await
    }

    /// Every approval decision
    pub async fn approval_decisions(&self) -> Result<Vec<ApprovalDecision>> {
        Ok(self
            .all_events()
            .await?
            .iter()
            .filter_map(ApprovalDecision::from_event)
            .collect())
    }

    /// Write events in `[from, to]` (all when unbounded) to a JSONL file in `dir`
    pub async fn export_jsonl(
        &self,
        dir: &Path,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<PathBuf> {
        let events: Vec<AuditEvent> = self
            .inner
            .store
            .range_records(Table::AuditEvents, from, to)
            .await?;
        archive::export_jsonl(&events, dir).await
    }

    /// Current storage outage state
    pub fn failure_snapshot(&self) -> FailureSnapshot {
        self.inner.failures.snapshot()
    }

    async fn all_events(&self) -> Result<Vec<AuditEvent>> {
        self.inner
            .store
            .range_records(Table::AuditEvents, None, None)
            .await
    }
}

/// Audit handle bound to one pipeline run
#[derive(Debug, Clone)]
pub struct WorkflowAudit {
    log: AuditLog,
    workflow_id: String,
    actor_id: Option<String>,
}

impl WorkflowAudit {
    /// Stamp events with an actor
    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Workflow id of this handle
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Record an event for this workflow
    pub async fn record(
        &self,
        event_type: AuditEventType,
        action: &str,
        target: &str,
        status: AuditStatus,
        details: Value,
    ) -> Result<EventId> {
        let mut event = NewAuditEvent::new(event_type, self.workflow_id.as_str(), action, status)
            .with_target(target)
            .with_details(details);
        event.actor_id = self.actor_id.clone();
        self.log.record(event).await
    }

    /// Record an approval decision for this workflow
    pub async fn record_approval(
        &self,
        approval_type: &str,
        approved: bool,
        approver: Option<&str>,
        reason: Option<&str>,
    ) -> Result<EventId> {
        self.log
            .record_approval(&self.workflow_id, approval_type, approved, approver, reason)
            .await
    }

    /// Record a security violation for this workflow
    pub async fn record_security_violation(&self, violation_type: &str, details: Value) -> Result<EventId> {
        self.log
            .record_security_violation(&self.workflow_id, violation_type, details)
            .await
    }

    /// Every event recorded for this workflow
    pub async fn trail(&self) -> Result<Vec<AuditEvent>> {
        self.log.by_workflow(&self.workflow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::checksum::verify_checksum;
    use crate::clock::ManualClock;
    use crate::error::{Error, PersistenceErrorKind};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use std::time::Duration as StdDuration;

    struct Fixture {
        memory: Arc<MemoryStore>,
        clock: ManualClock,
        metrics: MetricsCollector,
        alerts: AlertManager,
        audit: AuditLog,
    }

    fn fixture() -> Fixture {
        let memory = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap());
        let metrics = MetricsCollector::new(Arc::new(clock.clone()));
        let alerts = AlertManager::new(metrics.clone(), Arc::new(clock.clone()));
        let store = StoreHandle::new(memory.clone(), StdDuration::from_millis(200));
        let audit = AuditLog::new(
            store,
            Arc::new(clock.clone()),
            metrics.clone(),
            alerts.clone(),
            &AuditConfig::default(),
            "test",
        );
        Fixture {
            memory,
            clock,
            metrics,
            alerts,
            audit,
        }
    }

    #[tokio::test]
    async fn test_record_assigns_id_timestamp_and_checksum() {
        let f = fixture();
        f.clock.advance(Duration::nanoseconds(1_234_567_891));
        let id = f
            .audit
            .record(NewAuditEvent::new(AuditEventType::WorkflowStart, "wf-1", "start", AuditStatus::Started))
            .await
            .unwrap();

        let event = f.audit.get(id.as_str()).await.unwrap().unwrap();
        assert_eq!(event.event_id, id);
        assert_eq!(event.timestamp.timestamp_subsec_nanos() % 1000, 0);
        assert!(event.is_intact());
        assert!(f.audit.verify(id.as_str()).await.unwrap());
        assert_eq!(
            f.metrics.counter_with("audit_events_recorded", &[("type", "workflow_start")]),
            1
        );
    }

    #[tokio::test]
    async fn test_verify_missing_event_is_false_without_escalation() {
        let f = fixture();
        assert!(!f.audit.verify("evt_01h455vb4pex5vsknk084sn02q").await.unwrap());
        assert_eq!(f.metrics.counter("integrity_violations"), 0);
    }

    #[tokio::test]
    async fn test_tampered_event_is_detected_and_escalated() {
        let f = fixture();
        let id = f
            .audit
            .record(NewAuditEvent::new(AuditEventType::ActionSuccess, "wf-9", "fetch", AuditStatus::Success))
            .await
            .unwrap();

        let mut forged = f.audit.get(id.as_str()).await.unwrap().unwrap();
        forged.status = AuditStatus::Blocked;
        f.memory.overwrite_raw(
            Table::AuditEvents,
            id.as_str(),
            serde_json::to_value(&forged).unwrap(),
        );

        let store = StoreHandle::new(f.memory.clone(), StdDuration::from_millis(200));
        assert!(!verify_checksum(&store, id.as_str()).await.unwrap());
        assert!(!f.audit.verify(id.as_str()).await.unwrap());

        assert_eq!(f.metrics.counter("integrity_violations"), 1);
        let violations = f.audit.security_violations().await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].target, "integrity_violation");
        assert_eq!(violations[0].workflow_id, "wf-9");
        assert_eq!(violations[0].details["event_id"], json!(id.as_str()));
        assert!(f
            .alerts
            .recent_alerts(1)
            .iter()
            .any(|a| a.rule_name == "integrity_violation" && a.severity == Severity::Critical));

        // never auto-corrected
        let still_forged = f.audit.get(id.as_str()).await.unwrap().unwrap();
        assert_eq!(still_forged.status, AuditStatus::Blocked);
    }

    #[tokio::test]
    async fn test_get_verified_surfaces_integrity_violation() {
        let f = fixture();
        let id = f
            .audit
            .record(NewAuditEvent::new(AuditEventType::PersistenceInsertSuccess, "wf-3", "insert", AuditStatus::Success))
            .await
            .unwrap();
        assert_eq!(f.audit.get_verified(id.as_str()).await.unwrap().unwrap().event_id, id);
        assert!(f.audit.get_verified("evt_01h455vb4pex5vsknk084sn02q").await.unwrap().is_none());

        let mut forged = f.audit.get(id.as_str()).await.unwrap().unwrap();
        forged.action = "delete".to_string();
        f.memory.overwrite_raw(
            Table::AuditEvents,
            id.as_str(),
            serde_json::to_value(&forged).unwrap(),
        );

        let err = f.audit.get_verified(id.as_str()).await.unwrap_err();
        assert!(matches!(err, Error::IntegrityViolation { ref event_id } if event_id == id.as_str()));
        assert_eq!(err.reason_code(), "integrity_violation");
        assert_eq!(f.metrics.counter("integrity_violations"), 1);
        assert_eq!(f.audit.security_violations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_all_lists_tampered_ids() {
        let f = fixture();
        let keep = f
            .audit
            .record(NewAuditEvent::new(AuditEventType::ActionStart, "wf", "a", AuditStatus::Started))
            .await
            .unwrap();
        let broken = f
            .audit
            .record(NewAuditEvent::new(AuditEventType::ActionSuccess, "wf", "b", AuditStatus::Success))
            .await
            .unwrap();

        let mut forged = f.audit.get(broken.as_str()).await.unwrap().unwrap();
        forged.workflow_id = "someone-else".into();
        f.memory.overwrite_raw(
            Table::AuditEvents,
            broken.as_str(),
            serde_json::to_value(&forged).unwrap(),
        );

        let report = f.audit.verify_all().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.tampered, vec![broken.to_string()]);
        assert!(!report.tampered.contains(&keep.to_string()));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_error_and_alerts() {
        let f = fixture();
        f.memory.set_unavailable(true);

        let err = f
            .audit
            .record(NewAuditEvent::new(AuditEventType::ActionStart, "wf", "a", AuditStatus::Started))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Persistence(ref p) if p.kind == PersistenceErrorKind::Unavailable
        ));
        assert_eq!(f.metrics.counter("audit_write_failures"), 1);
        assert_eq!(f.audit.failure_snapshot().consecutive_failures, 1);
        assert!(f
            .alerts
            .recent_alerts(1)
            .iter()
            .any(|a| a.rule_name == "audit_storage_unreachable"));

        f.memory.set_unavailable(false);
        f.audit
            .record(NewAuditEvent::new(AuditEventType::ActionStart, "wf", "a", AuditStatus::Started))
            .await
            .unwrap();
        assert_eq!(f.audit.failure_snapshot().consecutive_failures, 0);
        assert!(f
            .alerts
            .recent_alerts(1)
            .iter()
            .any(|a| a.rule_name == "audit_storage_recovered"));
    }

    #[tokio::test]
    async fn test_approvals_and_queries() {
        let f = fixture();
        let wf = f.audit.for_workflow("wf-7").with_actor("operator");
        wf.record_approval("bulk_insert", true, Some("alice"), Some("looks good"))
            .await
            .unwrap();
        f.clock.advance(Duration::minutes(5));
        wf.record_approval("purge", false, Some("bob"), None).await.unwrap();
        f.audit
            .record_approval("wf-other", "bulk_insert", true, None, None)
            .await
            .unwrap();

        let decisions = f.audit.approval_decisions().await.unwrap();
        assert_eq!(decisions.len(), 3);
        assert_eq!(decisions[0].approval_type, "bulk_insert");
        assert!(decisions[0].approved);
        assert_eq!(decisions[0].approver.as_deref(), Some("alice"));
        assert!(!decisions[1].approved);
        assert_eq!(decisions[1].reason, None);

        let trail = wf.trail().await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].status, AuditStatus::Blocked);
        assert_eq!(trail[1].action, "approval_purge");
        assert_eq!(trail[1].target, "wf-7");

        let denied = f.audit.by_type(AuditEventType::ApprovalDenied).await.unwrap();
        assert_eq!(denied.len(), 1);

        let start = Utc.with_ymd_and_hms(2025, 5, 1, 12, 1, 0).unwrap();
        let later = f.audit.in_range(start, f.clock.now()).await.unwrap();
        assert_eq!(later.len(), 2);
    }

    #[tokio::test]
    async fn test_export_jsonl_writes_every_event() {
        let f = fixture();
        for action in ["a", "b", "c"] {
            f.audit
                .record(NewAuditEvent::new(AuditEventType::ActionSuccess, "wf", action, AuditStatus::Success))
                .await
                .unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let path = f.audit.export_jsonl(dir.path(), None, None).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let events: Vec<AuditEvent> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(AuditEvent::is_intact));
    }
}
