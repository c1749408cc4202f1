//! Exponential backoff with jitter for failed sync keys.

use std::time::Duration;
use rand::Rng;

/// Delay schedule for re-enqueueing a key whose sync failed.
///
/// There is no attempt cap: reconfiguration is idempotent, so a key is retried
/// until it succeeds or the queue shuts down.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl RetryPolicy {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay before retry number `failures` (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        calculate_backoff(failures, self.base_ms, self.max_ms)
    }
}

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Jitter: up to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_then_caps() {
        let policy = RetryPolicy::new(100, 1000);
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert!(policy.delay(1).as_millis() >= 100);
        assert!(policy.delay(2).as_millis() >= 200);

        let capped = policy.delay(40);
        assert!(capped.as_millis() >= 1000 && capped.as_millis() < 1100);
    }
}
