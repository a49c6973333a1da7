//! In-memory per-principal fixed-window rate limiter.
//!
//! A minute-bucket counter per caller, generalized from a single
//! process-wide `OnceLock<Mutex<HashMap<(provider, tenant), _>>>` keyed by
//! provider/tenant to an owned `RateLimiter` keyed by request principal, so
//! each `AppState` gets its own table instead of sharing one global.

use std::collections::HashMap;
use std::sync::Mutex;

/// Fixed-window (one-minute) request counter, one bucket per principal.
pub struct RateLimiter {
    limit_per_minute: u32,
    buckets: Mutex<HashMap<String, (u64, u32)>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Records one request for `principal` at `now_secs`, returning true if
    /// the request is over the limit and should be rejected.
    pub fn is_rate_limited(&self, principal: &str, now_secs: u64) -> bool {
        let window = now_secs / 60;
        let mut guard = self.buckets.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = guard.entry(principal.to_string()).or_insert((window, 0));

        if entry.0 != window {
            *entry = (window, 0);
        }

        if entry.1 >= self.limit_per_minute {
            true
        } else {
            entry.1 += 1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(!limiter.is_rate_limited("agent-1", 1_000_000));
        }
        assert!(limiter.is_rate_limited("agent-1", 1_000_000));
    }

    #[test]
    fn buckets_are_independent_per_principal() {
        let limiter = RateLimiter::new(1);
        assert!(!limiter.is_rate_limited("agent-1", 1_000_000));
        assert!(!limiter.is_rate_limited("agent-2", 1_000_000));
        assert!(limiter.is_rate_limited("agent-1", 1_000_000));
    }

    #[test]
    fn new_minute_resets_the_bucket() {
        let limiter = RateLimiter::new(1);
        assert!(!limiter.is_rate_limited("agent-1", 1_000_000));
        assert!(limiter.is_rate_limited("agent-1", 1_000_010));
        assert!(!limiter.is_rate_limited("agent-1", 1_000_000 + 60));
    }
}
