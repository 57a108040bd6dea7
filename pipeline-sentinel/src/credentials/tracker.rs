//! Credential rotation tracker
//!
//! Tracks expiry and rotation history of pipeline credentials in the
//! `credentials` table. A rotation runs in four durable steps:
//!
//! 1. audit intent (status `started`)
//! 2. claim the store-level lease on the record
//! 3. apply the mutation, which also releases the lease
//! 4. audit confirmation (status `success`)
//!
//! A second rotation of the same kind, in this process or another, fails with
//! [`Error::RotationInProgress`] while a lease is held. Different kinds never
//! block each other.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::config::CredentialsConfig;
use super::record::{
    key_prefix, CredentialRecord, CredentialStatus, CredentialStatusReport, CredentialType, RotationResult,
};
use crate::audit::{AuditEventType, AuditLog, AuditStatus, NewAuditEvent};
use crate::clock::{seconds, Clock};
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::store::{StoreHandle, Table};

/// Workflow id stamped on rotation audit events
pub const ROTATION_WORKFLOW: &str = "credential_rotation";

struct TrackerInner {
    config: CredentialsConfig,
    store: StoreHandle,
    audit: AuditLog,
    metrics: MetricsCollector,
    clock: Arc<dyn Clock>,
    in_flight: DashMap<CredentialType, DateTime<Utc>>,
}

/// Releases the in-process rotation slot on every exit path
struct InFlight<'a> {
    slots: &'a DashMap<CredentialType, DateTime<Utc>>,
    kind: CredentialType,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slots.remove(&self.kind);
    }
}

/// Expiry and rotation tracking for pipeline credentials
#[derive(Clone)]
pub struct CredentialTracker {
    inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for CredentialTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialTracker")
            .field("warning_days", &self.inner.config.warning_days)
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

impl CredentialTracker {
    /// Create a tracker
    pub fn new(
        config: CredentialsConfig,
        store: StoreHandle,
        audit: AuditLog,
        metrics: MetricsCollector,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config,
                store,
                audit,
                metrics,
                clock,
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Create or update the baseline record of a credential
    ///
    /// Rotation history (count, last rotation, key prefix) survives an update.
    pub async fn register(
        &self,
        credential_type: &str,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<CredentialRecord> {
        let kind: CredentialType = credential_type.parse()?;
        let now = self.inner.clock.now();
        let record = self
            .inner
            .store
            .update_record(Table::Credentials, kind.as_str(), |current: Option<CredentialRecord>| {
                let mut record = current.unwrap_or_else(|| CredentialRecord::new(kind, created_at, now));
                record.created_at = created_at;
                record.expires_at = expires_at;
                record.is_active = true;
                record.updated_at = now;
                Ok(record)
            })
            .await?;

        info!(
            credential_type = %kind,
            expires_at = ?expires_at,
            rotation_count = record.rotation_count,
            "Credential registered"
        );
        Ok(record)
    }

    /// Fetch the record of a credential
    pub async fn get(&self, credential_type: &str) -> Result<Option<CredentialRecord>> {
        let kind: CredentialType = credential_type.parse()?;
        self.inner
            .store
            .get_record(Table::Credentials, kind.as_str())
            .await
    }

    /// Whether rotation is due, and whole days until expiry
    ///
    /// Rotation is due inside the warning window or after expiry. Days are
    /// `None` when the credential has no expiry or is not registered.
    pub async fn check_expiration(&self, credential_type: &str) -> Result<(bool, Option<i64>)> {
        let kind: CredentialType = credential_type.parse()?;
        let Some(record) = self.get(kind.as_str()).await? else {
            return Ok((false, None));
        };
        let days = record.days_remaining(self.inner.clock.now());
        let needs_rotation = self.needs_rotation(days);

        if let Some(days) = days {
            self.inner.metrics.set_gauge_with(
                "credential_days_remaining",
                &[("type", kind.as_str())],
                days as f64,
            );
        }
        if needs_rotation {
            warn!(
                credential_type = %kind,
                days_remaining = ?days,
                warning_days = self.inner.config.warning_days,
                "Credential rotation due"
            );
        }
        Ok((needs_rotation, days))
    }

    fn needs_rotation(&self, days: Option<i64>) -> bool {
        days.is_some_and(|d| d <= i64::from(self.inner.config.warning_days))
    }

    /// Rotate a credential to `new_secret`
    ///
    /// The secret is format-checked and only its prefix is stored. When the
    /// confirmation event cannot be written the rotation stands and the
    /// persistence error is returned.
    pub async fn rotate(&self, credential_type: &str, new_secret: &str) -> Result<RotationResult> {
        let kind: CredentialType = credential_type.parse()?;
        let now = self.inner.clock.now();
        let _slot = self.claim_slot(kind, now)?;

        if self.get(kind.as_str()).await?.is_none() {
            warn!(credential_type = %kind, "Rotation requested for unregistered credential");
            return Err(Error::UnknownCredential(kind.to_string()));
        }

        if let Err(reason) = kind.check_format(new_secret) {
            warn!(credential_type = %kind, reason = %reason, "Rejected new credential");
            self.inner.metrics.increment_with("credential_rotation_failures", &[("type", kind.as_str())], 1);
            self.inner
                .audit
                .record(
                    NewAuditEvent::new(
                        AuditEventType::SecurityViolation,
                        ROTATION_WORKFLOW,
                        "rotation_failed",
                        AuditStatus::Error,
                    )
                    .with_target(kind.as_str())
                    .with_detail("reason", format!("new credential failed validation: {reason}")),
                )
                .await?;
            return Err(Error::InvalidCredential(format!("{kind}: {reason}")));
        }

        let new_prefix = key_prefix(new_secret);
        let rotation_days = self.inner.config.rotation_days_for(kind);
        let expires_at = now + Duration::days(i64::from(rotation_days));

        // 1. intent
        self.inner
            .audit
            .record(
                NewAuditEvent::new(
                    AuditEventType::CredentialValidation,
                    ROTATION_WORKFLOW,
                    "credential_rotation",
                    AuditStatus::Started,
                )
                .with_target(kind.as_str())
                .with_detail("new_key_prefix", new_prefix.clone()),
            )
            .await?;

        // 2. lease
        let lease_ttl = seconds(self.inner.config.rotation_lease_secs);
        let leased = self
            .inner
            .store
            .update_record(Table::Credentials, kind.as_str(), |current: Option<CredentialRecord>| {
                let mut record = current.ok_or_else(|| Error::UnknownCredential(kind.to_string()))?;
                if let Some(started) = record.rotation_started_at {
                    if now - started < lease_ttl {
                        return Err(Error::RotationInProgress(kind.to_string()));
                    }
                }
                record.rotation_started_at = Some(now);
                record.updated_at = now;
                Ok(record)
            })
            .await;
        let leased = match leased {
            Ok(record) => record,
            Err(e) => {
                self.record_failure(kind, &e).await;
                return Err(e);
            }
        };
        let previous_prefix = Some(leased.key_prefix).filter(|p| !p.is_empty());

        // 3. mutation
        let rotated = self
            .inner
            .store
            .update_record(Table::Credentials, kind.as_str(), |current: Option<CredentialRecord>| {
                let mut record = current.ok_or_else(|| Error::UnknownCredential(kind.to_string()))?;
                if record.rotation_started_at != Some(now) {
                    return Err(Error::RotationInProgress(kind.to_string()));
                }
                record.last_rotated = Some(now);
                record.rotation_count += 1;
                record.key_prefix = new_prefix.clone();
                record.is_active = true;
                record.expires_at = Some(expires_at);
                record.updated_at = now;
                record.rotation_started_at = None;
                Ok(record)
            })
            .await;
        let rotated = match rotated {
            Ok(record) => record,
            Err(e) => {
                self.release_lease(kind, now).await;
                self.record_failure(kind, &e).await;
                return Err(e);
            }
        };

        self.inner.metrics.increment_with("credential_rotations", &[("type", kind.as_str())], 1);
        self.inner.metrics.set_gauge_with(
            "credential_days_remaining",
            &[("type", kind.as_str())],
            f64::from(rotation_days),
        );
        info!(
            credential_type = %kind,
            rotation_count = rotated.rotation_count,
            key_prefix = %rotated.key_prefix,
            expires_at = %expires_at,
            "Credential rotated"
        );

        // 4. confirmation
        self.inner
            .audit
            .record(
                NewAuditEvent::new(
                    AuditEventType::CredentialValidation,
                    ROTATION_WORKFLOW,
                    "credential_rotated",
                    AuditStatus::Success,
                )
                .with_target(kind.as_str())
                .with_details(json!({
                    "old_key_prefix": previous_prefix,
                    "new_key_prefix": rotated.key_prefix,
                    "rotation_count": rotated.rotation_count,
                    "next_rotation": expires_at.to_rfc3339(),
                })),
            )
            .await?;

        Ok(RotationResult {
            credential_type: kind,
            rotation_count: rotated.rotation_count,
            previous_key_prefix: previous_prefix,
            key_prefix: rotated.key_prefix,
            rotated_at: now,
            expires_at,
        })
    }

    fn claim_slot(&self, kind: CredentialType, now: DateTime<Utc>) -> Result<InFlight<'_>> {
        match self.inner.in_flight.entry(kind) {
            Entry::Occupied(_) => Err(Error::RotationInProgress(kind.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(InFlight {
                    slots: &self.inner.in_flight,
                    kind,
                })
            }
        }
    }

    async fn release_lease(&self, kind: CredentialType, lease: DateTime<Utc>) {
        let released = self
            .inner
            .store
            .update_record(Table::Credentials, kind.as_str(), |current: Option<CredentialRecord>| {
                let mut record = current
                    .ok_or_else(|| Error::Internal(format!("credential record {kind} missing")))?;
                if record.rotation_started_at == Some(lease) {
                    record.rotation_started_at = None;
                }
                Ok(record)
            })
            .await;
        if let Err(e) = released {
            error!(
                credential_type = %kind,
                error = %e,
                "Could not release rotation lease; it expires after the lease timeout"
            );
        }
    }

    async fn record_failure(&self, kind: CredentialType, cause: &Error) {
        self.inner
            .metrics
            .increment_with("credential_rotation_failures", &[("type", kind.as_str())], 1);
        let event = NewAuditEvent::new(
            AuditEventType::CredentialValidation,
            ROTATION_WORKFLOW,
            "credential_rotation",
            AuditStatus::Error,
        )
        .with_target(kind.as_str())
        .with_detail("reason", cause.reason_code())
        .with_detail("error", cause.to_string());
        if let Err(e) = self.inner.audit.record(event).await {
            error!(credential_type = %kind, error = %e, "Could not record rotation failure");
        }
    }

    /// Gate a credential before use
    ///
    /// Fails with [`Error::CredentialExpired`] when the credential is expired
    /// or inactive, and with [`Error::UnknownCredential`] when it was never
    /// registered. Both outcomes are audited.
    pub async fn validate(&self, credential_type: &str, workflow_id: &str) -> Result<CredentialRecord> {
        let kind: CredentialType = credential_type.parse()?;
        let record = self
            .get(kind.as_str())
            .await?
            .ok_or_else(|| Error::UnknownCredential(kind.to_string()))?;
        let now = self.inner.clock.now();
        let days = record.days_remaining(now);

        if record.is_expired(now) || !record.is_active {
            warn!(
                credential_type = %kind,
                workflow_id = %workflow_id,
                days_remaining = ?days,
                is_active = record.is_active,
                "Blocked use of expired credential"
            );
            self.inner
                .audit
                .record(
                    NewAuditEvent::new(
                        AuditEventType::CredentialValidation,
                        workflow_id,
                        "credential_validation",
                        AuditStatus::Blocked,
                    )
                    .with_target(kind.as_str())
                    .with_details(json!({
                        "days_remaining": days,
                        "is_active": record.is_active,
                    })),
                )
                .await?;
            return Err(Error::CredentialExpired {
                credential_type: kind.to_string(),
                days_remaining: days,
            });
        }

        self.inner
            .audit
            .record(
                NewAuditEvent::new(
                    AuditEventType::CredentialValidation,
                    workflow_id,
                    "credential_validation",
                    AuditStatus::Success,
                )
                .with_target(kind.as_str())
                .with_detail("days_remaining", days),
            )
            .await?;
        Ok(record)
    }

    /// Status of every known credential kind
    pub async fn rotation_status(&self) -> Result<Vec<CredentialStatusReport>> {
        let now = self.inner.clock.now();
        let mut reports = Vec::with_capacity(CredentialType::ALL.len());
        for kind in CredentialType::ALL {
            let record: Option<CredentialRecord> = self
                .inner
                .store
                .get_record(Table::Credentials, kind.as_str())
                .await?;
            let days = record.as_ref().and_then(|r| r.days_remaining(now));
            let needs_rotation = self.needs_rotation(days);
            let status = match &record {
                Some(r) if r.is_expired(now) => CredentialStatus::Expired,
                Some(r) if r.expires_at.is_some() && needs_rotation => CredentialStatus::ExpiringSoon,
                Some(r) if r.expires_at.is_some() => CredentialStatus::Ok,
                _ => CredentialStatus::NotApplicable,
            };
            reports.push(CredentialStatusReport {
                credential_type: kind,
                status,
                needs_rotation,
                days_until_expiry: days,
                last_rotated: record.as_ref().and_then(|r| r.last_rotated),
                rotation_count: record.as_ref().map_or(0, |r| r.rotation_count),
                is_active: record.as_ref().is_some_and(|r| r.is_active),
            });
        }
        Ok(reports)
    }

    /// Rotations currently running in this process
    pub fn rotations_in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditConfig;
    use crate::clock::ManualClock;
    use crate::metrics::AlertManager;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    const MODAL_SECRET: &str = "ak-0123456789abcdefghijklmnop";

    struct Fixture {
        memory: Arc<MemoryStore>,
        clock: ManualClock,
        audit: AuditLog,
        metrics: MetricsCollector,
        store: StoreHandle,
        tracker: CredentialTracker,
    }

    fn fixture() -> Fixture {
        let memory = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap());
        let metrics = MetricsCollector::new(Arc::new(clock.clone()));
        let alerts = AlertManager::new(metrics.clone(), Arc::new(clock.clone()));
        let store = StoreHandle::new(memory.clone(), StdDuration::from_millis(500));
        let audit = AuditLog::new(
            store.clone(),
            Arc::new(clock.clone()),
            metrics.clone(),
            alerts,
            &AuditConfig::default(),
            "test",
        );
        let tracker = CredentialTracker::new(
            CredentialsConfig::default(),
            store.clone(),
            audit.clone(),
            metrics.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            memory,
            clock,
            audit,
            metrics,
            store,
            tracker,
        }
    }

    async fn register_all(f: &Fixture, kinds: &[&str]) {
        let now = f.clock.now();
        for kind in kinds {
            f.tracker.register(kind, now, Some(now + Duration::days(90))).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_credential_ten_days_from_expiry() {
        let f = fixture();
        let now = f.clock.now();
        f.tracker
            .register("modal_token", now - Duration::days(50), Some(now + Duration::days(10)))
            .await
            .unwrap();

        assert_eq!(f.tracker.check_expiration("modal_token").await.unwrap(), (true, Some(10)));
        assert_eq!(
            f.metrics.gauge_with("credential_days_remaining", &[("type", "modal_token")]),
            Some(10.0)
        );
        let status = f.tracker.rotation_status().await.unwrap();
        let modal = status.iter().find(|s| s.credential_type == CredentialType::ModalToken).unwrap();
        assert_eq!(modal.status, CredentialStatus::ExpiringSoon);

        let result = f.tracker.rotate("modal_token", MODAL_SECRET).await.unwrap();
        assert_eq!(result.rotation_count, 1);
        assert_eq!(result.key_prefix, "ak-01234...");
        assert_eq!(result.previous_key_prefix, None);
        assert_eq!(result.expires_at, now + Duration::days(60));

        assert_eq!(f.tracker.check_expiration("modal_token").await.unwrap(), (false, Some(60)));
        let status = f.tracker.rotation_status().await.unwrap();
        let modal = status.iter().find(|s| s.credential_type == CredentialType::ModalToken).unwrap();
        assert_eq!(modal.status, CredentialStatus::Ok);
        assert_eq!(modal.rotation_count, 1);
        let github = status.iter().find(|s| s.credential_type == CredentialType::GithubPat).unwrap();
        assert_eq!(github.status, CredentialStatus::NotApplicable);

        // intent then confirmation
        let trail = f.audit.by_workflow(ROTATION_WORKFLOW).await.unwrap();
        let steps: Vec<(&str, AuditStatus)> = trail.iter().map(|e| (e.action.as_str(), e.status)).collect();
        assert_eq!(
            steps,
            vec![
                ("credential_rotation", AuditStatus::Started),
                ("credential_rotated", AuditStatus::Success),
            ]
        );
        assert_eq!(trail[1].details["new_key_prefix"], json!("ak-01234..."));
        assert!(!trail[1].details.values().any(|v| v == MODAL_SECRET));
    }

    #[tokio::test]
    async fn test_unknown_credential_type() {
        let f = fixture();
        assert!(matches!(
            f.tracker.check_expiration("aws_root").await,
            Err(Error::UnknownCredential(ref t)) if t == "aws_root"
        ));
        assert!(matches!(
            f.tracker.rotate("aws_root", "secret-value-123").await,
            Err(Error::UnknownCredential(_))
        ));
        assert!(matches!(
            f.tracker.validate("github_pat", "wf").await,
            Err(Error::UnknownCredential(_))
        ));
        assert_eq!(f.tracker.check_expiration("github_pat").await.unwrap(), (false, None));
    }

    #[tokio::test]
    async fn test_invalid_secret_is_rejected_and_audited() {
        let f = fixture();
        register_all(&f, &["supabase_anon"]).await;
        let err = f.tracker.rotate("supabase_anon", "not-a-jwt").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));

        let violations = f.audit.security_violations().await.unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].action, "rotation_failed");
        assert_eq!(violations[0].status, AuditStatus::Error);
        let record = f.tracker.get("supabase_anon").await.unwrap().unwrap();
        assert_eq!(record.rotation_count, 0);
        assert_eq!(record.rotation_started_at, None);
        assert_eq!(f.tracker.rotations_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_rotating_unregistered_credential_fails() {
        let f = fixture();
        let result = f.tracker.rotate("github_pat", "ghp_first_token_value").await;
        assert!(matches!(result, Err(Error::UnknownCredential(ref t)) if t == "github_pat"));

        assert!(f.tracker.get("github_pat").await.unwrap().is_none());
        assert!(f.audit.by_workflow(ROTATION_WORKFLOW).await.unwrap().is_empty());
        assert_eq!(f.tracker.rotations_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_validate_blocks_expired_credentials() {
        let f = fixture();
        let now = f.clock.now();
        f.tracker
            .register("github_pat", now - Duration::days(100), Some(now + Duration::days(1)))
            .await
            .unwrap();
        assert!(f.tracker.validate("github_pat", "wf-1").await.is_ok());

        f.clock.advance(Duration::days(2));
        let err = f.tracker.validate("github_pat", "wf-2").await.unwrap_err();
        assert!(matches!(
            err,
            Error::CredentialExpired { days_remaining: Some(-1), .. }
        ));

        let trail = f.audit.by_workflow("wf-2").await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].status, AuditStatus::Blocked);

        let status = f.tracker.rotation_status().await.unwrap();
        let github = status.iter().find(|s| s.credential_type == CredentialType::GithubPat).unwrap();
        assert_eq!(github.status, CredentialStatus::Expired);
        assert!(github.needs_rotation);
    }

    #[tokio::test]
    async fn test_register_keeps_rotation_history() {
        let f = fixture();
        let now = f.clock.now();
        register_all(&f, &["github_pat"]).await;
        f.tracker.rotate("github_pat", "ghp_first_token_value").await.unwrap();
        let record = f
            .tracker
            .register("github_pat", now, Some(now + Duration::days(30)))
            .await
            .unwrap();
        assert_eq!(record.rotation_count, 1);
        assert_eq!(record.key_prefix, "ghp_firs...");

        let second = f.tracker.rotate("github_pat", "ghp_second_token").await.unwrap();
        assert_eq!(second.rotation_count, 2);
        assert_eq!(second.previous_key_prefix.as_deref(), Some("ghp_firs..."));
    }

    #[tokio::test]
    async fn test_concurrent_rotations_in_process() {
        let f = fixture();
        register_all(&f, &["github_pat"]).await;
        f.memory.set_latency(StdDuration::from_millis(5));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = f.tracker.clone();
                tokio::spawn(async move { tracker.rotate("github_pat", &format!("ghp_token_{i:02}")).await })
            })
            .collect();

        let mut succeeded = 0u64;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(Error::RotationInProgress(kind)) => assert_eq!(kind, "github_pat"),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(succeeded >= 1);

        let record = f.tracker.get("github_pat").await.unwrap().unwrap();
        assert_eq!(record.rotation_count, succeeded);
        assert_eq!(record.rotation_started_at, None);
        assert_eq!(f.tracker.rotations_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_lease_blocks_rotation_from_another_process() {
        let f = fixture();
        register_all(&f, &["modal_token"]).await;
        f.memory.set_latency(StdDuration::from_millis(5));
        let other = CredentialTracker::new(
            CredentialsConfig::default(),
            f.store.clone(),
            f.audit.clone(),
            f.metrics.clone(),
            Arc::new(f.clock.clone()),
        );

        let (a, b) = tokio::join!(
            f.tracker.rotate("modal_token", MODAL_SECRET),
            other.rotate("modal_token", "ak-zyxwvutsrqponmlkjihgfe"),
        );
        let succeeded = [&a, &b].iter().filter(|r| r.is_ok()).count() as u64;
        for result in [&a, &b] {
            if let Err(e) = result {
                assert!(matches!(e, Error::RotationInProgress(_)), "unexpected error: {e}");
            }
        }
        assert!(succeeded >= 1);
        let record = f.tracker.get("modal_token").await.unwrap().unwrap();
        assert_eq!(record.rotation_count, succeeded);
    }

    #[tokio::test]
    async fn test_stale_lease_is_taken_over() {
        let f = fixture();
        let now = f.clock.now();
        f.tracker.register("github_pat", now, None).await.unwrap();
        f.store
            .update_record(Table::Credentials, "github_pat", |current: Option<CredentialRecord>| {
                let mut record = current.unwrap();
                record.rotation_started_at = Some(now);
                Ok(record)
            })
            .await
            .unwrap();

        assert!(matches!(
            f.tracker.rotate("github_pat", "ghp_new_token").await,
            Err(Error::RotationInProgress(_))
        ));

        f.clock.advance(Duration::seconds(301));
        let result = f.tracker.rotate("github_pat", "ghp_new_token").await.unwrap();
        assert_eq!(result.rotation_count, 1);
    }

    #[tokio::test]
    async fn test_different_kinds_rotate_concurrently() {
        let f = fixture();
        register_all(&f, &["modal_token", "github_pat"]).await;
        f.memory.set_latency(StdDuration::from_millis(5));
        let (a, b) = tokio::join!(
            f.tracker.rotate("modal_token", MODAL_SECRET),
            f.tracker.rotate("github_pat", "ghp_token_value"),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
    }
}
