//! Sliding-window per-actor rate limiter. The same window-retain algorithm
//! backs webhook-surface limits, OTP generation throttling, and OTP
//! verification throttling, each keyed by its own composed string — same
//! convention used elsewhere for `"create_room:<ip>"` / `"send_msg:<ip>"`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

pub struct RateLimiter {
    limits: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    pub retry_after_secs: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a request is allowed. Returns true if allowed, false if rate limited.
    pub fn check(&self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_with_info(key, max, window_secs).allowed
    }

    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(window_secs);

        let entries = limits.entry(key.to_string()).or_default();
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let oldest = match entries.iter().min() {
                Some(t) => *t,
                None => {
                    return RateLimitInfo {
                        allowed: false,
                        remaining: 0,
                        limit: max,
                        retry_after_secs: 1,
                    }
                }
            };
            let elapsed = now.duration_since(oldest);
            let retry_after = if elapsed < window {
                (window - elapsed).as_secs() + 1
            } else {
                1
            };
            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        let remaining = max - entries.len();
        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining,
            retry_after_secs: 0,
        }
    }
}

/// Named rate-limit windows, kept in one place so call sites don't repeat
/// magic numbers.
pub mod windows {
    pub const OTP_GENERATION_PRINCIPAL_MAX: usize = 10;
    pub const OTP_GENERATION_PRINCIPAL_WINDOW_SECS: u64 = 60 * 60;
    pub const OTP_VERIFY_MAX: usize = 3;
    pub const OTP_VERIFY_WINDOW_SECS: u64 = 10 * 60;
    pub const WEBHOOK_MESSAGE_MAX: usize = 60;
    pub const WEBHOOK_MESSAGE_WINDOW_SECS: u64 = 60;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_blocks() {
        let rl = RateLimiter::new();
        for _ in 0..5 {
            assert!(rl.check("k", 5, 60));
        }
        assert!(!rl.check("k", 5, 60));
    }

    #[test]
    fn different_keys_independent() {
        let rl = RateLimiter::new();
        for _ in 0..3 {
            assert!(rl.check("a", 3, 60));
        }
        assert!(rl.check("b", 3, 60));
    }
}
