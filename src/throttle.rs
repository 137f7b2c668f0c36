// ABOUTME: Token bucket rate limiter shared by concurrent status pollers.
// ABOUTME: Bounds the total call rate against the provider regardless of poller count.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Token bucket: tokens refill at a constant rate and each call consumes one.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f32,
    tokens: f32,
    /// Tokens added per second.
    refill_rate: f32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket allowing `requests_per_minute`, starting full.
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f32;
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Take a token, or return how long until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f32(tokens_needed / self.refill_rate))
        }
    }

    pub fn tokens_available(&mut self) -> f32 {
        self.refill();
        self.tokens
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Async front for a [`TokenBucket`], shared between tasks behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(requests_per_minute)),
        }
    }

    /// Wait until a token is available and take it.
    pub async fn acquire(&self) {
        loop {
            // Release the lock before sleeping so other tasks can refill-check.
            let wait = match self.bucket.lock().await.try_acquire() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn tokens_available(&self) -> f32 {
        self.bucket.lock().await.tokens_available()
    }
}
