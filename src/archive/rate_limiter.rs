//! Per-host token-bucket rate limiter: fixed-refill-rate state behind an
//! `RwLock<HashMap<..>>`, one bucket per host. The archive client's
//! retry-with-backoff (below) already absorbs 429/5xx responses, so the
//! bucket itself only needs to throttle steady-state request volume.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// A single host's token bucket.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(refill_per_sec: f64) -> Self {
        Self {
            tokens: refill_per_sec.max(1.0),
            capacity: refill_per_sec.max(1.0),
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Seconds to wait before a token is available, 0 if one is available now.
    fn wait_time(&self) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
        }
    }

    fn consume(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }
}

/// A token bucket per upstream host. The rate-limiter bucket is
/// process-local per archive host; no cross-process coordination.
#[derive(Clone)]
pub struct RateLimiter {
    refill_per_sec: f64,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(refill_per_sec: f64) -> Self {
        Self {
            refill_per_sec,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn host_of(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_string()))
            .unwrap_or_else(|| url.to_string())
    }

    /// Block until a token is available for `url`'s host, then consume one.
    pub async fn acquire(&self, url: &str) {
        let host = Self::host_of(url);
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(host.clone())
                    .or_insert_with(|| Bucket::new(self.refill_per_sec));
                bucket.refill();
                let wait = bucket.wait_time();
                if wait.is_zero() {
                    bucket.consume();
                }
                wait
            };
            if wait.is_zero() {
                return;
            }
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_throughput_to_refill_rate() {
        let limiter = RateLimiter::new(2.0);
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire("https://example.com/x").await;
        }
        // 4 acquisitions at 2/s should take at least ~1s once the initial
        // burst capacity (2 tokens) is drained.
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn different_hosts_have_independent_buckets() {
        let limiter = RateLimiter::new(1.0);
        limiter.acquire("https://a.example.com/1").await;
        let start = Instant::now();
        limiter.acquire("https://b.example.com/1").await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
