use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// How the scan spaces out consecutive scoring calls.
#[derive(Debug, Clone, PartialEq)]
pub enum PacingPolicy {
    /// No waiting between calls.
    Immediate,
    /// Flat delay, optionally extended by a random `0..=jitter`.
    Fixed { delay: Duration, jitter: Duration },
    /// At most `capacity` calls in a burst, refilled at `rate_per_sec`.
    TokenBucket { rate_per_sec: f64, capacity: f64 },
}

impl PacingPolicy {
    /// Fresh per-scan state for this policy.
    pub fn pacer(&self) -> Pacer {
        Pacer {
            policy: self.clone(),
            tokens: match self {
                PacingPolicy::TokenBucket { capacity, .. } => *capacity,
                _ => 0.0,
            },
            last_refill: Instant::now(),
            rng: SmallRng::from_os_rng(),
        }
    }
}

pub struct Pacer {
    policy: PacingPolicy,
    tokens: f64,
    last_refill: Instant,
    rng: SmallRng,
}

impl Pacer {
    /// How long to hold off before the next call. Consumes a token when the
    /// policy is a bucket.
    pub fn next_delay(&mut self) -> Duration {
        match &self.policy {
            PacingPolicy::Immediate => Duration::ZERO,
            PacingPolicy::Fixed { delay, jitter } => {
                if jitter.is_zero() {
                    *delay
                } else {
                    let extra = self.rng.random_range(0..=jitter.as_millis() as u64);
                    *delay + Duration::from_millis(extra)
                }
            }
            PacingPolicy::TokenBucket {
                rate_per_sec,
                capacity,
            } => {
                let now = Instant::now();
                let elapsed = now.duration_since(self.last_refill).as_secs_f64();
                self.tokens = (self.tokens + elapsed * rate_per_sec).min(*capacity);
                self.last_refill = now;
                self.tokens -= 1.0;
                if self.tokens >= 0.0 {
                    Duration::ZERO
                } else {
                    Duration::try_from_secs_f64(-self.tokens / rate_per_sec)
                        .unwrap_or(Duration::MAX)
                }
            }
        }
    }

    /// Waits out the next delay. Returns `false` if the scan was cancelled
    /// while waiting.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(delay) => true,
        }
    }
}
