//! Per-domain rate limiting for outbound requests
//!
//! Three counting windows (minute, hour, day) layered with a token bucket for
//! bursts. Repeated burst violations put a domain into cooldown. All state
//! lives in the durable store and every decision is persisted before it is
//! returned.

pub mod config;
pub mod limiter;
pub mod state;

pub use config::{RateLimitConfig, RateLimitPolicy};
pub use limiter::{resolve_domain, Admission, DomainStatus, RateLimiter, WindowUsage, WILDCARD_DOMAIN};
pub use state::{LimitReason, RateLimitState};
