//! Token bucket rate limiter. Ported from the upstream prototype's
//! `websocket/rate_limiter.py` into the teacher's synchronous-primitive
//! idiom: continuous refill keyed off wall-clock elapsed time, one token per
//! message, burst capacity defaulting to `1.5 * rate` (`spec.md` §4.8).

use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub retry_after_secs: f64,
    pub tokens_remaining: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// A single connection's token bucket. `PushServer` owns one per connection
/// id; idle buckets are dropped wholesale by the connection registry rather
/// than decayed in place (`spec.md` §4.8, "disconnection removes the bucket
/// immediately").
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst_size: f64,
    inner: Mutex<Bucket>,
    last_activity: Mutex<Instant>,
}

impl TokenBucket {
    pub fn new(rate: f64, burst_size: Option<f64>) -> Self {
        let burst_size = burst_size.unwrap_or(rate * 1.5);
        let now = Instant::now();
        Self {
            rate,
            burst_size,
            inner: Mutex::new(Bucket {
                tokens: burst_size,
                last_update: now,
            }),
            last_activity: Mutex::new(now),
        }
    }

    pub fn burst_size(&self) -> f64 {
        self.burst_size
    }

    /// Attempt to consume one token. Refills continuously based on elapsed
    /// wall-clock time before checking availability.
    pub fn check(&self) -> RateLimitOutcome {
        let now = Instant::now();
        *self.last_activity.lock().unwrap() = now;

        let mut bucket = self.inner.lock().unwrap();
        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        let mut tokens = (bucket.tokens + elapsed * self.rate).min(self.burst_size);
        bucket.last_update = now;

        if tokens >= 1.0 {
            tokens -= 1.0;
            bucket.tokens = tokens;
            RateLimitOutcome {
                allowed: true,
                retry_after_secs: 0.0,
                tokens_remaining: tokens,
            }
        } else {
            bucket.tokens = tokens;
            let tokens_needed = 1.0 - tokens;
            RateLimitOutcome {
                allowed: false,
                retry_after_secs: tokens_needed / self.rate,
                tokens_remaining: tokens,
            }
        }
    }

    /// Seconds since the last `check()` call, used by the connection
    /// registry's idle-bucket sweep (`spec.md` §4.8, `cleanup_interval`).
    pub fn idle_for_secs(&self) -> f64 {
        self.last_activity.lock().unwrap().elapsed().as_secs_f64()
    }
}
