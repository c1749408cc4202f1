//! Sync queue subsystem.
//!
//! # Data Flow
//! ```text
//! Controller dispatch
//!     → task_queue.rs (dedupe per key, last write wins)
//!     → rate_limiter.rs (token bucket, one sync every few seconds)
//!     → sync function (render + apply)
//!     → on error: backoff.rs delay, then requeue
//! ```

pub mod backoff;
pub mod rate_limiter;
pub mod task_queue;

pub use backoff::RetryPolicy;
pub use rate_limiter::TokenBucket;
pub use task_queue::{QueueItem, RateLimitedQueue};
