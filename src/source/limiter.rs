use std::time::Duration;

use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter enforcing a global outbound request budget.
///
/// The broker tolerates roughly 3 requests/second; the default budget of
/// 2.5/s leaves headroom. One limiter is shared across all symbol tasks.
///
/// The mutex is held across the whole refill/sleep/consume decision, so
/// callers drain the bucket one at a time in roughly FIFO order. Strict
/// per-caller fairness is not required.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    rate_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(2.5)
    }
}

impl RateLimiter {
    /// Creates a limiter with `rate_per_sec` refill rate and an equal
    /// bucket capacity, starting full.
    pub fn new(rate_per_sec: f64) -> Self {
        Self {
            capacity: rate_per_sec,
            rate_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: rate_per_sec,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits until a token is available, then consumes it.
    ///
    /// Cancellation-safe: dropping the future while sleeping releases the
    /// lock without consuming a token.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = self.capacity.min(bucket.tokens + elapsed * self.rate_per_sec);
            bucket.last_refill = now;

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return;
            }

            let wait = (1.0 - bucket.tokens) / self.rate_per_sec;
            sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn burst_drains_capacity_without_waiting() {
        let limiter = RateLimiter::new(2.5);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // Two whole tokens available out of 2.5; no timer should fire.
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn ten_concurrent_acquires_respect_the_budget() {
        // rate = 2.5/s, capacity = 2.5: ten acquires need
        // (10 - 2.5) / 2.5 = 3 seconds of refill.
        let limiter = Arc::new(RateLimiter::new(2.5));
        let start = Instant::now();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            tasks.spawn(async move { limiter.acquire().await });
        }
        while tasks.join_next().await.is_some() {}

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2_990), "{elapsed:?}");
        assert!(elapsed <= Duration::from_secs(4), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_capacity() {
        let limiter = RateLimiter::new(2.0);
        // Drain the bucket, then idle far longer than capacity/rate.
        limiter.acquire().await;
        limiter.acquire().await;
        sleep(Duration::from_secs(60)).await;

        // Only `capacity` tokens may have accumulated: the third acquire in
        // a burst of three must wait.
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(490), "{:?}", start.elapsed());
    }
}
