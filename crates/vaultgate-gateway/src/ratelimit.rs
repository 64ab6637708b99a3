//! Per-client request quota, enforced before any vault traffic.

use std::num::NonZeroU32;

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use crate::config::RateLimitSettings;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Keyed token-bucket limiter over client identifiers.
pub struct ClientRateLimiter {
    limiter: KeyedLimiter,
}

impl ClientRateLimiter {
    /// Build from the configured sustained rate and burst.
    pub fn new(settings: &RateLimitSettings) -> Self {
        let per_minute = NonZeroU32::new(settings.per_minute.max(1)).expect("nonzero");
        let burst = NonZeroU32::new(settings.burst.max(1)).expect("nonzero");
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Whether `client_id` may proceed right now.
    pub fn check(&self, client_id: &str) -> bool {
        self.limiter.check_key(&client_id.to_string()).is_ok()
    }
}

impl std::fmt::Debug for ClientRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRateLimiter").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_bounds_consecutive_calls() {
        let limiter = ClientRateLimiter::new(&RateLimitSettings {
            per_minute: 2,
            burst: 2,
        });
        assert!(limiter.check("vendor-A"));
        assert!(limiter.check("vendor-A"));
        assert!(!limiter.check("vendor-A"));
        // Other clients are unaffected.
        assert!(limiter.check("vendor-B"));
    }
}
