use std::time::Instant;

use dashmap::DashMap;

/// Token bucket keyed by `(source_ip, instance)`, refilled continuously at
/// `capacity` tokens per minute. One token is spent per connect attempt.
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity_per_minute: u32,
    buckets: DashMap<(String, String), Bucket>,
}

impl RateLimiter {
    pub fn new(capacity_per_minute: u32) -> Self {
        Self {
            capacity_per_minute,
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` if a connection attempt for `(source_ip, instance)` is
    /// allowed right now, consuming one token if so.
    pub fn try_acquire(&self, source_ip: &str, instance: &str) -> bool {
        if self.capacity_per_minute == 0 {
            return true;
        }

        let key = (source_ip.to_string(), instance.to_string());
        let refill_per_sec = self.capacity_per_minute as f64 / 60.0;
        let capacity = self.capacity_per_minute as f64;

        let mut bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: Instant::now(),
        });

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_refuses() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.try_acquire("1.2.3.4", "bot-1"));
        assert!(limiter.try_acquire("1.2.3.4", "bot-1"));
        assert!(limiter.try_acquire("1.2.3.4", "bot-1"));
        assert!(!limiter.try_acquire("1.2.3.4", "bot-1"));
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire("1.2.3.4", "bot-1"));
        assert!(limiter.try_acquire("1.2.3.4", "bot-2"));
        assert!(limiter.try_acquire("5.6.7.8", "bot-1"));
    }

    #[test]
    fn zero_capacity_disables_limiting() {
        let limiter = RateLimiter::new(0);
        for _ in 0..100 {
            assert!(limiter.try_acquire("1.2.3.4", "bot-1"));
        }
    }
}
