//! Store-backed rate limiter
//!
//! Every `acquire` is one atomic read-modify-write of the domain's
//! [`RateLimitState`] in the `rate_limits` table, persisted before the
//! decision is returned. A store failure or timeout is returned as a
//! persistence error, so the limiter fails closed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

use super::config::{RateLimitConfig, RateLimitPolicy};
use super::state::{LimitReason, RateLimitState, Verdict};
use crate::audit::{AuditEventType, AuditLog, AuditStatus, NewAuditEvent};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::store::{StoreHandle, Table};

/// Domain key used when the input has no recognisable host
pub const WILDCARD_DOMAIN: &str = "*";

/// Reduce a URL or bare domain to its lowercase host
///
/// Unparseable input maps to [`WILDCARD_DOMAIN`].
///
/// ```
/// use pipeline_sentinel::rate_limit::resolve_domain;
///
/// assert_eq!(resolve_domain("https://API.Municode.com/v1/data"), "api.municode.com");
/// assert_eq!(resolve_domain("bcpao.us"), "bcpao.us");
/// assert_eq!(resolve_domain(""), "*");
/// ```
pub fn resolve_domain(domain_or_url: &str) -> String {
    let input = domain_or_url.trim();
    if input.is_empty() {
        return WILDCARD_DOMAIN.to_string();
    }
    let host = |url: Url| url.host_str().filter(|h| !h.is_empty()).map(str::to_ascii_lowercase);
    Url::parse(input)
        .ok()
        .and_then(host)
        .or_else(|| Url::parse(&format!("http://{input}")).ok().and_then(host))
        .unwrap_or_else(|| WILDCARD_DOMAIN.to_string())
}

/// Admission decision returned by [`RateLimiter::acquire`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    /// Resolved domain
    pub domain: String,
    /// Whether the request may proceed
    pub allowed: bool,
    /// Rejection reason
    pub reason: Option<LimitReason>,
    /// How long until a retry can succeed
    pub retry_after: Option<Duration>,
}

impl Admission {
    /// Turn a rejection into [`Error::RateLimitExceeded`]
    pub fn into_result(self) -> Result<()> {
        if self.allowed {
            return Ok(());
        }
        Err(Error::RateLimitExceeded {
            domain: self.domain,
            reason: self
                .reason
                .map_or("rate_limited", |r| r.as_str())
                .to_string(),
            retry_after_secs: self.retry_after.map_or(0, |d| d.as_secs_f64().ceil() as u64),
        })
    }
}

/// Usage of one counting window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub used: u64,
    pub ceiling: u64,
    pub secs_since_reset: i64,
}

/// Status of one domain, from the last observed state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainStatus {
    pub domain: String,
    pub minute: WindowUsage,
    pub hour: WindowUsage,
    pub day: WindowUsage,
    pub burst_available: u32,
    pub in_cooldown: bool,
    pub cooldown_remaining_secs: u64,
}

struct LimiterInner {
    config: RateLimitConfig,
    store: StoreHandle,
    audit: AuditLog,
    metrics: MetricsCollector,
    clock: Arc<dyn Clock>,
    /// Last state observed per domain; status reporting only, never enforcement
    observed: DashMap<String, RateLimitState>,
}

/// Per-domain admission control for outbound requests
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("domains", &self.inner.config.domains.len())
            .field("tracked", &self.inner.observed.len())
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter
    pub fn new(
        config: RateLimitConfig,
        store: StoreHandle,
        audit: AuditLog,
        metrics: MetricsCollector,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                config,
                store,
                audit,
                metrics,
                clock,
                observed: DashMap::new(),
            }),
        }
    }

    /// Policy that applies to a URL or domain
    pub fn policy_for(&self, domain_or_url: &str) -> &RateLimitPolicy {
        self.inner.config.policy_for(&resolve_domain(domain_or_url))
    }

    /// Ask permission for one request to `domain_or_url`
    ///
    /// Each distinct violation (a burst violation, entering cooldown, the
    /// first rejection per window period for a ceiling) is recorded as one
    /// security-violation audit event; rejected retries are not.
    pub async fn acquire(&self, domain_or_url: &str, caller_id: &str) -> Result<Admission> {
        let domain = resolve_domain(domain_or_url);
        let policy = self.inner.config.policy_for(&domain);
        let now = self.inner.clock.now();
        self.inner.metrics.increment("rate_limit_checks");

        let verdict: Mutex<Option<Verdict>> = Mutex::new(None);
        let state = self
            .inner
            .store
            .update_record(Table::RateLimits, &domain, |current: Option<RateLimitState>| {
                let mut state = current.unwrap_or_else(|| RateLimitState::new(domain.as_str(), policy, now));
                let decided = state.evaluate(policy, now);
                *verdict.lock().unwrap_or_else(PoisonError::into_inner) = Some(decided);
                Ok(state)
            })
            .await
            .inspect_err(|e| {
                self.inner.metrics.increment("rate_limit_store_errors");
                warn!(domain = %domain, caller_id = %caller_id, error = %e, "Rate limit state unavailable, rejecting");
            })?;

        let verdict = verdict
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| Error::Internal(format!("no rate limit verdict for {domain}")))?;
        self.inner
            .observed
            .entry(domain.clone())
            .and_modify(|seen| {
                if state.updated_at >= seen.updated_at {
                    *seen = state.clone();
                }
            })
            .or_insert_with(|| state.clone());

        let admission = Admission {
            domain: domain.clone(),
            allowed: verdict.allowed(),
            reason: verdict.reason,
            retry_after: verdict.retry_after,
        };

        match verdict.reason {
            None => {
                self.inner.metrics.increment("rate_limit_allowed");
                debug!(
                    domain = %domain,
                    caller_id = %caller_id,
                    minute_count = state.minute_count,
                    tokens = state.tokens,
                    "Request admitted"
                );
            }
            Some(reason) => {
                self.inner.metrics.increment("rate_limit_blocked");
                self.inner
                    .metrics
                    .increment_with("rate_limit_rejections", &[("reason", reason.as_str())], 1);
                warn!(
                    domain = %domain,
                    caller_id = %caller_id,
                    reason = %reason,
                    retry_after_ms = admission.retry_after.map_or(0, |d| d.as_millis() as u64),
                    "Request rejected"
                );
            }
        }

        for violation in &verdict.new_violations {
            if let Err(e) = self.report_violation(&domain, caller_id, *violation, policy, &state).await {
                if let Some(reset_at) = state.window_reset(*violation) {
                    self.rearm_report(&domain, *violation, reset_at).await;
                }
                return Err(e);
            }
        }

        Ok(admission)
    }

    /// Clear a ceiling's reported flag so the next rejection retries the event
    async fn rearm_report(&self, domain: &str, reason: LimitReason, reset_at: DateTime<Utc>) {
        let rearmed = self
            .inner
            .store
            .update_record(Table::RateLimits, domain, |current: Option<RateLimitState>| {
                let mut state =
                    current.ok_or_else(|| Error::Internal(format!("rate limit state for {domain} missing")))?;
                state.rearm_report(reason, reset_at);
                Ok(state)
            })
            .await;
        if let Err(e) = rearmed {
            error!(
                domain = %domain,
                reason = %reason,
                error = %e,
                "Could not re-arm violation report; the next window will report again"
            );
        }
    }

    async fn report_violation(
        &self,
        domain: &str,
        caller_id: &str,
        violation: LimitReason,
        policy: &RateLimitPolicy,
        state: &RateLimitState,
    ) -> Result<()> {
        let event = NewAuditEvent::new(
            AuditEventType::SecurityViolation,
            caller_id,
            "rate_limit_exceeded",
            AuditStatus::Blocked,
        )
        .with_target(domain)
        .with_details(json!({
            "domain": domain,
            "caller_id": caller_id,
            "reason": violation.as_str(),
            "counts": {
                "minute": state.minute_count,
                "hour": state.hour_count,
                "day": state.day_count,
            },
            "burst_violations": state.burst_violations,
            "cooldown_until": state.cooldown_until,
            "policy": {
                "requests_per_minute": policy.requests_per_minute,
                "requests_per_hour": policy.requests_per_hour,
                "requests_per_day": policy.requests_per_day,
                "burst_limit": policy.burst_limit,
                "cooldown_secs": policy.cooldown_secs,
            },
        }));
        self.inner.audit.record(event).await?;
        Ok(())
    }

    /// Reload the observed-state cache from the store
    ///
    /// Returns the number of domains loaded.
    pub async fn sync_from_store(&self) -> Result<usize> {
        let rows: Vec<(String, RateLimitState)> = self.inner.store.scan_records(Table::RateLimits).await?;
        let count = rows.len();
        for (domain, state) in rows {
            self.inner.observed.insert(domain, state);
        }
        Ok(count)
    }

    /// Per-domain status from the last observed state, sorted by domain
    ///
    /// Configured domains that were never requested are listed with fresh
    /// state.
    pub fn status(&self) -> Vec<DomainStatus> {
        let now = self.inner.clock.now();
        let mut domains: Vec<String> = self
            .inner
            .observed
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.inner.config.domains.keys().cloned())
            .collect();
        domains.sort();
        domains.dedup();

        domains
            .into_iter()
            .map(|domain| {
                let policy = self.inner.config.policy_for(&domain);
                let mut state = self
                    .inner
                    .observed
                    .get(&domain)
                    .map(|s| s.value().clone())
                    .unwrap_or_else(|| RateLimitState::new(domain.as_str(), policy, now));
                state.roll_windows(now);
                state.refill(policy, now);
                project(domain, &state, policy, now)
            })
            .collect()
    }

    /// Domains currently in cooldown, by last observed state
    pub fn domains_in_cooldown(&self) -> usize {
        let now = self.inner.clock.now();
        self.inner
            .observed
            .iter()
            .filter(|entry| entry.value().cooldown_remaining(now).is_some())
            .count()
    }

    /// Number of domains with observed state
    pub fn tracked_domains(&self) -> usize {
        self.inner.observed.len()
    }
}

fn project(domain: String, state: &RateLimitState, policy: &RateLimitPolicy, now: DateTime<Utc>) -> DomainStatus {
    let usage = |used: u64, ceiling: u64, reset: DateTime<Utc>| WindowUsage {
        used,
        ceiling,
        secs_since_reset: (now - reset).num_seconds(),
    };
    let cooldown = state.cooldown_remaining(now);
    DomainStatus {
        minute: usage(state.minute_count, policy.requests_per_minute, state.last_reset_minute),
        hour: usage(state.hour_count, policy.requests_per_hour, state.last_reset_hour),
        day: usage(state.day_count, policy.requests_per_day, state.last_reset_day),
        burst_available: state.tokens.floor().max(0.0) as u32,
        in_cooldown: cooldown.is_some(),
        cooldown_remaining_secs: cooldown.map_or(0, |d| d.num_seconds().max(0) as u64),
        domain,
    }
}
