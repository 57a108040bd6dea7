//! Rate limiting configuration
//!
//! Loaded from the `[rate_limit]` section of sentinel.toml.
//!
//! # Example (sentinel.toml)
//!
//! ```toml
//! [rate_limit.default]
//! requests_per_minute = 60
//! requests_per_hour = 1000
//! requests_per_day = 10000
//! burst_limit = 20
//! cooldown_secs = 60
//!
//! [rate_limit.domains."municode.com"]
//! requests_per_minute = 30
//! requests_per_hour = 500
//! requests_per_day = 5000
//! burst_limit = 10
//! cooldown_secs = 60
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::clock::MAX_INTERVAL_SECS;

/// Limits applied to one external domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Ceiling for the 60 second window
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u64,

    /// Ceiling for the 3600 second window
    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u64,

    /// Ceiling for the 86400 second window
    #[serde(default = "default_requests_per_day")]
    pub requests_per_day: u64,

    /// Token bucket capacity; refills at `requests_per_minute / 60` tokens per second
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,

    /// Seconds a domain stays in cooldown
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Burst violations within `burst_window_secs` that trigger a cooldown
    #[serde(default = "default_burst_violations_before_cooldown")]
    pub burst_violations_before_cooldown: u32,

    /// Horizon over which burst violations are counted
    #[serde(default = "default_burst_window_secs")]
    pub burst_window_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            requests_per_hour: default_requests_per_hour(),
            requests_per_day: default_requests_per_day(),
            burst_limit: default_burst_limit(),
            cooldown_secs: default_cooldown_secs(),
            burst_violations_before_cooldown: default_burst_violations_before_cooldown(),
            burst_window_secs: default_burst_window_secs(),
        }
    }
}

impl RateLimitPolicy {
    /// Tokens added to the burst bucket per second
    pub fn refill_per_sec(&self) -> f64 {
        self.requests_per_minute as f64 / 60.0
    }

    /// Validate the policy, returning an error message if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_minute == 0 || self.requests_per_hour == 0 || self.requests_per_day == 0 {
            return Err("window ceilings must be greater than 0".to_string());
        }
        if self.burst_limit == 0 {
            return Err("burst_limit must be greater than 0".to_string());
        }
        if self.burst_violations_before_cooldown == 0 {
            return Err("burst_violations_before_cooldown must be greater than 0".to_string());
        }
        if self.burst_window_secs == 0 {
            return Err("burst_window_secs must be greater than 0".to_string());
        }
        if self.cooldown_secs > MAX_INTERVAL_SECS || self.burst_window_secs > MAX_INTERVAL_SECS {
            return Err(format!("cooldown_secs and burst_window_secs must not exceed {MAX_INTERVAL_SECS}"));
        }
        Ok(())
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Policy for domains without an entry in `domains`
    #[serde(default)]
    pub default: RateLimitPolicy,

    /// Per-domain policies; an entry also covers its subdomains
    #[serde(default)]
    pub domains: HashMap<String, RateLimitPolicy>,
}

impl RateLimitConfig {
    /// Policy for a resolved domain
    ///
    /// Exact match first, then the longest configured parent domain on a dot
    /// boundary, then the default policy.
    pub fn policy_for(&self, domain: &str) -> &RateLimitPolicy {
        if let Some(policy) = self.domains.get(domain) {
            return policy;
        }
        self.domains
            .iter()
            .filter(|(parent, _)| {
                domain.len() > parent.len()
                    && domain.ends_with(parent.as_str())
                    && domain.as_bytes()[domain.len() - parent.len() - 1] == b'.'
            })
            .max_by_key(|(parent, _)| parent.len())
            .map(|(_, policy)| policy)
            .unwrap_or(&self.default)
    }

    /// Validate every policy, returning an error message if invalid
    pub fn validate(&self) -> Result<(), String> {
        self.default
            .validate()
            .map_err(|e| format!("default policy: {e}"))?;
        for (domain, policy) in &self.domains {
            if domain.is_empty() || domain.chars().any(char::is_whitespace) {
                return Err(format!("invalid domain key {domain:?}"));
            }
            if domain.chars().any(|c| c.is_ascii_uppercase()) {
                return Err(format!("domain key {domain:?} must be lowercase"));
            }
            policy.validate().map_err(|e| format!("{domain}: {e}"))?;
        }
        Ok(())
    }
}

fn default_requests_per_minute() -> u64 {
    60
}

fn default_requests_per_hour() -> u64 {
    1000
}

fn default_requests_per_day() -> u64 {
    10000
}

fn default_burst_limit() -> u32 {
    20
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_burst_violations_before_cooldown() -> u32 {
    1
}

fn default_burst_window_secs() -> u64 {
    60
}
