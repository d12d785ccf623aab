// src/proxy/limiter.rs
use std::sync::Mutex;
use std::time::Instant;

/// Non-blocking token bucket: `burst` tokens are available immediately and
/// the bucket refills at `rate` tokens per second. A denied request is never
/// queued; callers surface the denial as 429.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: u32, burst: u32) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            rate: rate as f64,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to consume one token. Returns immediately; never waits for refill.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn burst_allows_then_denies() {
        let bucket = TokenBucket::new(1, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(100, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        std::thread::sleep(Duration::from_millis(30));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn burst_capacity_is_honored() {
        let bucket = TokenBucket::new(1, 3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn zero_burst_is_bumped_to_one() {
        let bucket = TokenBucket::new(5, 0);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
