//! Token bucket pacing the reconciliation worker.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

/// A token bucket that can be awaited.
///
/// Tokens accumulate at `refill_rate` per second up to `capacity`. A waiter
/// reserves its token immediately (the balance may go negative) and sleeps
/// until the reservation matures, so concurrent waiters are served in order.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(refill_rate: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_update: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_update = now;
    }

    /// Reserve a token and return how long to wait before using it.
    pub fn reserve(&self) -> Duration {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, Instant::now());

        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.refill_rate)
        }
    }

    /// Wait for a token.
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}
