//! Transmission throttle — byte-rate token bucket per outduct.
//!
//! Refill: nominal rate bytes/sec. Burst: one second of traffic.
//! The bucket starts empty, so a bundle of N bytes never leaves faster
//! than N / rate seconds.
//!
//! Callers acquire bytes in chunks no larger than `burst()`.

use std::time::Duration;

use tokio::time::Instant;

// Float slack so accumulated refill rounding never stalls a waiter.
const EPSILON: f64 = 1e-6;
const MIN_WAIT_SECS: f64 = 0.001;

#[derive(Debug)]
pub struct Throttle {
    tokens: f64,
    rate: f64,
    last_refill: Instant,
}

impl Throttle {
    /// `rate` in bytes/sec. Zero is clamped to one byte/sec; callers
    /// substitute the protocol default before getting here.
    pub fn new(rate: u64) -> Self {
        Self {
            tokens: 0.0,
            rate: rate.max(1) as f64,
            last_refill: Instant::now(),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    pub fn set_rate(&mut self, rate: u64) {
        self.refill();
        self.rate = rate.max(1) as f64;
        self.tokens = self.tokens.min(self.rate);
    }

    /// Largest single acquisition that can ever succeed.
    pub fn burst(&self) -> u64 {
        self.rate as u64
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
        self.last_refill = now;
    }

    /// Take `bytes` if available right now.
    pub fn try_acquire(&mut self, bytes: u64) -> bool {
        self.refill();
        let need = bytes as f64;
        if self.tokens >= need {
            self.tokens -= need;
            true
        } else {
            false
        }
    }

    /// Wait until `bytes` may be sent, then consume them. Requests above
    /// `burst()` wait for a full bucket and leave it in deficit.
    pub async fn acquire(&mut self, bytes: u64) {
        let need = (bytes as f64).min(self.rate);
        loop {
            self.refill();
            if self.tokens + EPSILON >= need {
                self.tokens -= bytes as f64;
                return;
            }
            let wait = ((need - self.tokens) / self.rate).max(MIN_WAIT_SECS);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens.min(self.rate)
    }
}
