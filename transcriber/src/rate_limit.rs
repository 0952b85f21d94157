//! Per-client token bucket for chunk-bearing messages (C8).
//!
//! No crate in the corpus provides this; it's small enough, and specific
//! enough to "chunks per wall-clock second", to hand-roll against
//! `tokio::time::Instant` rather than reach for a generic limiter.

use tokio::time::Instant;

pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(burst: u32, sustained: u32) -> Self {
        Self {
            capacity: burst as f64,
            tokens: burst as f64,
            refill_per_second: sustained as f64,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    /// Consume one token. Returns `false` (message should be dropped with
    /// `RATE_LIMITED`) if the bucket is empty.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
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
    fn burst_capacity_is_consumable_immediately() {
        let mut bucket = TokenBucket::new(3, 1);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let mut bucket = TokenBucket::new(1, 10);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        tokio::time::advance(std::time::Duration::from_millis(200)).await;
        assert!(bucket.try_acquire());
    }
}
