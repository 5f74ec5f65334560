//! Per-client request throttling.
//!
//! One token bucket per client address, burst of one, refilled at the
//! configured requests-per-minute rate. Buckets are created lazily and kept
//! for the process lifetime; the expected population is small.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

struct Visitor {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    visitors: Mutex<HashMap<String, Visitor>>,
    refill_per_second: f64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            visitors: Mutex::new(HashMap::new()),
            refill_per_second: f64::from(requests_per_minute) / 60.0,
        }
    }

    /// Whether a request from `ip` is allowed right now.
    pub fn allow(&self, ip: &str) -> bool {
        let mut visitors = self
            .visitors
            .lock()
            .expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let visitor = visitors.entry(ip.to_string()).or_insert(Visitor {
            tokens: 1.0,
            last_refill: now,
        });

        let elapsed = now.duration_since(visitor.last_refill).as_secs_f64();
        visitor.tokens = (visitor.tokens + elapsed * self.refill_per_second).min(1.0);
        visitor.last_refill = now;

        if visitor.tokens >= 1.0 {
            visitor.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
