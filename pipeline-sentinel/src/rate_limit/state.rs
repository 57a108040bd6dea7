//! Persisted per-domain rate limit state
//!
//! [`RateLimitState::evaluate`] is the whole admission algorithm. It runs inside
//! one atomic read-modify-write of the domain record, so the three window
//! counters, the burst bucket and the cooldown always move together.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration as StdDuration;

use super::config::RateLimitPolicy;
use crate::clock::seconds;

const MINUTE_SECS: i64 = 60;
const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86400;

/// Machine-readable rejection reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitReason {
    /// Domain is in cooldown
    Cooldown,
    /// Burst bucket is empty
    BurstLimit,
    /// Minute ceiling reached
    MinuteLimit,
    /// Hour ceiling reached
    HourLimit,
    /// Day ceiling reached
    DayLimit,
}

impl LimitReason {
    /// Stable reason code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::BurstLimit => "burst_limit",
            Self::MinuteLimit => "minute_limit",
            Self::HourLimit => "hour_limit",
            Self::DayLimit => "day_limit",
        }
    }
}

impl fmt::Display for LimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Rejection reason, `None` when admitted
    pub reason: Option<LimitReason>,
    /// How long until a retry can succeed
    pub retry_after: Option<StdDuration>,
    /// Violations seen for the first time by this call
    pub new_violations: Vec<LimitReason>,
}

impl Verdict {
    /// Whether the request was admitted
    pub fn allowed(&self) -> bool {
        self.reason.is_none()
    }
}

/// Enforcement state of one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub domain: String,
    pub minute_count: u64,
    pub hour_count: u64,
    pub day_count: u64,
    pub last_reset_minute: DateTime<Utc>,
    pub last_reset_hour: DateTime<Utc>,
    pub last_reset_day: DateTime<Utc>,
    /// Burst bucket level
    pub tokens: f64,
    pub last_refill: DateTime<Utc>,
    /// Burst violations in the current burst window
    #[serde(default)]
    pub burst_violations: u32,
    #[serde(default)]
    pub burst_window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Ceiling violations already reported in the current window periods
    #[serde(default)]
    pub minute_limit_reported: bool,
    #[serde(default)]
    pub hour_limit_reported: bool,
    #[serde(default)]
    pub day_limit_reported: bool,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitState {
    /// Fresh state with a full burst bucket
    pub fn new(domain: impl Into<String>, policy: &RateLimitPolicy, now: DateTime<Utc>) -> Self {
        Self {
            domain: domain.into(),
            minute_count: 0,
            hour_count: 0,
            day_count: 0,
            last_reset_minute: now,
            last_reset_hour: now,
            last_reset_day: now,
            tokens: f64::from(policy.burst_limit),
            last_refill: now,
            burst_violations: 0,
            burst_window_start: None,
            cooldown_until: None,
            minute_limit_reported: false,
            hour_limit_reported: false,
            day_limit_reported: false,
            updated_at: now,
        }
    }

    /// Remaining cooldown at `now`, if any
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.cooldown_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Reset every window whose duration has elapsed since its reset
    pub fn roll_windows(&mut self, now: DateTime<Utc>) {
        if now - self.last_reset_minute >= Duration::seconds(MINUTE_SECS) {
            self.minute_count = 0;
            self.last_reset_minute = now;
            self.minute_limit_reported = false;
        }
        if now - self.last_reset_hour >= Duration::seconds(HOUR_SECS) {
            self.hour_count = 0;
            self.last_reset_hour = now;
            self.hour_limit_reported = false;
        }
        if now - self.last_reset_day >= Duration::seconds(DAY_SECS) {
            self.day_count = 0;
            self.last_reset_day = now;
            self.day_limit_reported = false;
        }
    }

    /// Reset time of the window a ceiling reason belongs to
    pub fn window_reset(&self, reason: LimitReason) -> Option<DateTime<Utc>> {
        match reason {
            LimitReason::MinuteLimit => Some(self.last_reset_minute),
            LimitReason::HourLimit => Some(self.last_reset_hour),
            LimitReason::DayLimit => Some(self.last_reset_day),
            LimitReason::Cooldown | LimitReason::BurstLimit => None,
        }
    }

    /// Let the next rejection of this window period be reported again
    ///
    /// Used when the violation event could not be written. Does nothing once
    /// the window has rolled past `reset_at`.
    pub fn rearm_report(&mut self, reason: LimitReason, reset_at: DateTime<Utc>) -> bool {
        if self.window_reset(reason) != Some(reset_at) {
            return false;
        }
        let reported = match reason {
            LimitReason::MinuteLimit => &mut self.minute_limit_reported,
            LimitReason::HourLimit => &mut self.hour_limit_reported,
            LimitReason::DayLimit => &mut self.day_limit_reported,
            LimitReason::Cooldown | LimitReason::BurstLimit => return false,
        };
        *reported = false;
        true
    }

    /// Top up the burst bucket for the time elapsed since the last refill
    pub fn refill(&mut self, policy: &RateLimitPolicy, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill).num_microseconds().unwrap_or(i64::MAX) as f64 / 1e6;
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * policy.refill_per_sec()).min(f64::from(policy.burst_limit));
            self.last_refill = now;
        }
    }

    /// Decide one request and apply its effects
    ///
    /// Order: roll windows, refill, cooldown, ceilings, burst bucket. Only an
    /// admission touches the window counters.
    pub fn evaluate(&mut self, policy: &RateLimitPolicy, now: DateTime<Utc>) -> Verdict {
        self.updated_at = now;
        self.roll_windows(now);
        self.refill(policy, now);

        if let Some(remaining) = self.cooldown_remaining(now) {
            return Verdict {
                reason: Some(LimitReason::Cooldown),
                retry_after: Some(to_std(remaining)),
                new_violations: Vec::new(),
            };
        }
        if self.cooldown_until.take().is_some() {
            self.burst_violations = 0;
            self.burst_window_start = None;
        }

        let ceilings = [
            (LimitReason::MinuteLimit, self.minute_count, policy.requests_per_minute, self.last_reset_minute, MINUTE_SECS),
            (LimitReason::HourLimit, self.hour_count, policy.requests_per_hour, self.last_reset_hour, HOUR_SECS),
            (LimitReason::DayLimit, self.day_count, policy.requests_per_day, self.last_reset_day, DAY_SECS),
        ];
        for (reason, count, ceiling, reset_at, window) in ceilings {
            if count >= ceiling {
                let reported = match reason {
                    LimitReason::MinuteLimit => &mut self.minute_limit_reported,
                    LimitReason::HourLimit => &mut self.hour_limit_reported,
                    _ => &mut self.day_limit_reported,
                };
                let first = !*reported;
                *reported = true;
                return Verdict {
                    reason: Some(reason),
                    retry_after: Some(to_std(reset_at + Duration::seconds(window) - now)),
                    new_violations: if first { vec![reason] } else { Vec::new() },
                };
            }
        }

        if self.tokens < 1.0 {
            return self.burst_violation(policy, now);
        }

        self.tokens -= 1.0;
        self.minute_count += 1;
        self.hour_count += 1;
        self.day_count += 1;
        Verdict {
            reason: None,
            retry_after: None,
            new_violations: Vec::new(),
        }
    }

    fn burst_violation(&mut self, policy: &RateLimitPolicy, now: DateTime<Utc>) -> Verdict {
        let window = seconds(policy.burst_window_secs);
        match self.burst_window_start {
            Some(start) if now - start < window => {}
            _ => {
                self.burst_window_start = Some(now);
                self.burst_violations = 0;
            }
        }
        self.burst_violations += 1;

        if self.burst_violations >= policy.burst_violations_before_cooldown {
            let cooldown = seconds(policy.cooldown_secs);
            self.cooldown_until = Some(now + cooldown);
            return Verdict {
                reason: Some(LimitReason::Cooldown),
                retry_after: Some(to_std(cooldown)),
                new_violations: vec![LimitReason::BurstLimit, LimitReason::Cooldown],
            };
        }

        let refill = policy.refill_per_sec();
        let wait_secs = if refill > 0.0 { (1.0 - self.tokens) / refill } else { 60.0 };
        Verdict {
            reason: Some(LimitReason::BurstLimit),
            retry_after: Some(StdDuration::from_secs_f64(wait_secs.max(0.0))),
            new_violations: vec![LimitReason::BurstLimit],
        }
    }
}

fn to_std(duration: Duration) -> StdDuration {
    duration.to_std().unwrap_or(StdDuration::ZERO)
}
