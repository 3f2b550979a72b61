//! Sliding-window per-tenant rate limiter for the HTTP surface. Daily API
//! caps are the metering engine's concern; this guards burst traffic.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct WindowEntry {
    count: u32,
    window_start: DateTime<Utc>,
}

pub struct RateLimiter {
    entries: DashMap<String, WindowEntry>,
    requests_per_minute: u32,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            entries: DashMap::new(),
            requests_per_minute: requests_per_minute.max(1),
        }
    }

    /// Check and consume one request for `key`. Returns `false` when the
    /// window is exhausted.
    pub fn check(&self, key: &str) -> bool {
        let now = Utc::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| WindowEntry {
                count: 0,
                window_start: now,
            });

        if now - entry.window_start >= Duration::minutes(1) {
            entry.count = 0;
            entry.window_start = now;
        }
        if entry.count >= self.requests_per_minute {
            return false;
        }
        entry.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_exhaustion() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.check("1"));
        assert!(limiter.check("1"));
        assert!(limiter.check("1"));
        assert!(!limiter.check("1"));
        // Separate tenants have separate windows.
        assert!(limiter.check("2"));
    }
}
