//! End-to-end runs of a scraping workflow through a fully wired sentinel

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use pipeline_sentinel::config::Config;
use pipeline_sentinel::prelude::*;
use pipeline_sentinel::rate_limit::{LimitReason, RateLimitPolicy};
use serde_json::json;

struct Harness {
    sentinel: Sentinel,
    memory: Arc<MemoryStore>,
    clock: ManualClock,
}

async fn harness() -> Harness {
    let mut config = Config::default();
    config.rate_limit.domains.insert(
        "municode.com".to_string(),
        RateLimitPolicy {
            requests_per_minute: 3,
            ..RateLimitPolicy::default()
        },
    );

    let memory = Arc::new(MemoryStore::new());
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap());
    let sentinel = Sentinel::builder()
        .config(config)
        .store(memory.clone())
        .clock(Arc::new(clock.clone()))
        .without_tracing()
        .build()
        .await
        .unwrap();

    Harness { sentinel, memory, clock }
}

#[tokio::test]
async fn test_workflow_run_is_limited_audited_and_verifiable() {
    let h = harness().await;
    let now = h.clock.now();
    let credentials = h.sentinel.credentials();
    credentials
        .register("github_pat", now - Duration::days(85), Some(now + Duration::days(5)))
        .await
        .unwrap();

    let report = h.sentinel.health_check().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.component("credentials").unwrap().status, HealthStatus::Degraded);

    let workflow = h.sentinel.audit().for_workflow("wf-brevard").with_actor("scheduler");
    workflow
        .record(AuditEventType::WorkflowStart, "scrape", "brevard", AuditStatus::Started, json!({}))
        .await
        .unwrap();
    credentials.validate("github_pat", "wf-brevard").await.unwrap();

    let limiter = h.sentinel.rate_limiter();
    let mut admitted = Vec::new();
    for page in 0..4 {
        let url = format!("https://library.municode.com/fl/brevard?page={page}");
        admitted.push(limiter.acquire(&url, "wf-brevard").await.unwrap());
    }
    assert_eq!(admitted.iter().filter(|a| a.allowed).count(), 3);
    let rejected = admitted.pop().unwrap();
    assert_eq!(rejected.domain, "library.municode.com");
    assert_eq!(rejected.reason, Some(LimitReason::MinuteLimit));
    assert!(matches!(
        rejected.into_result(),
        Err(Error::RateLimitExceeded { ref reason, .. }) if reason == "minute_limit"
    ));

    // window rolls over
    h.clock.advance(Duration::seconds(61));
    assert!(limiter.acquire("library.municode.com", "wf-brevard").await.unwrap().allowed);

    let rotation = credentials.rotate("github_pat", "ghp_0123456789abcdef").await.unwrap();
    assert_eq!(rotation.rotation_count, 1);
    assert_eq!(rotation.key_prefix, "ghp_0123...");

    workflow
        .record(AuditEventType::WorkflowEnd, "scrape", "brevard", AuditStatus::Success, json!({ "pages": 4 }))
        .await
        .unwrap();

    let trail = workflow.trail().await.unwrap();
    let actions: Vec<&str> = trail.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions.first(), Some(&"scrape"));
    assert!(actions.contains(&"rate_limit_exceeded"));
    assert_eq!(actions.last(), Some(&"scrape"));
    assert!(trail.iter().all(|e| e.is_intact()));

    let integrity = h.sentinel.audit().verify_all().await.unwrap();
    assert!(integrity.is_clean());
    assert!(integrity.checked >= trail.len());

    let metrics = h.sentinel.metrics();
    assert_eq!(metrics.counter("rate_limit_checks"), 5);
    assert_eq!(metrics.counter("rate_limit_blocked"), 1);

    let report = h.sentinel.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy, "{report:?}");
}

#[tokio::test]
async fn test_store_outage_fails_closed() {
    let h = harness().await;
    h.memory.set_unavailable(true);

    let result = h
        .sentinel
        .rate_limiter()
        .acquire("https://library.municode.com/fl", "wf-outage")
        .await;
    assert!(matches!(result, Err(Error::Persistence(_))));

    let recorded = h
        .sentinel
        .audit()
        .for_workflow("wf-outage")
        .record(AuditEventType::ActionStart, "fetch", "municode", AuditStatus::Started, json!({}))
        .await;
    assert!(recorded.is_err());

    let report = h.sentinel.health_check().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(report.component("store").unwrap().status, HealthStatus::Unhealthy);
    assert_eq!(report.component("audit").unwrap().status, HealthStatus::Unhealthy);
    assert!(h
        .sentinel
        .alerts()
        .recent_alerts(1)
        .iter()
        .any(|a| a.rule_name == "audit_storage_unreachable"));

    h.memory.set_unavailable(false);
    h.sentinel
        .audit()
        .for_workflow("wf-outage")
        .record(AuditEventType::ActionStart, "fetch", "municode", AuditStatus::Started, json!({}))
        .await
        .unwrap();
    assert_eq!(h.sentinel.health_check().await.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_events_verify_by_id_and_in_bulk() {
    let h = harness().await;
    let audit = h.sentinel.audit().for_workflow("wf-tamper");
    let event_id = audit
        .record(AuditEventType::ActionSuccess, "extract", "bcpao.us", AuditStatus::Success, json!({ "rows": 10 }))
        .await
        .unwrap();
    assert!(h.sentinel.audit().verify(event_id.as_str()).await.unwrap());
    assert!(!h.sentinel.audit().verify("evt_missing").await.unwrap());

    let report = h.sentinel.audit().verify_all().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.checked, 1);
}
