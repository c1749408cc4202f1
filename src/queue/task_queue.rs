//! Key-deduplicating, rate-limited work queue.
//!
//! # Responsibilities
//! - Keep at most one pending item per key (last write wins)
//! - Drop skippable items already covered by a later successful sync
//! - Pace the sync function with a token bucket
//! - Re-enqueue failed keys after a backoff, indefinitely
//!
//! # Design Decisions
//! - A single worker: per-key work is serialized and only one sync runs at a time
//! - Shutdown finishes the in-flight sync, then drops whatever is still pending

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::observability::metrics;
use crate::queue::backoff::RetryPolicy;
use crate::queue::rate_limiter::TokenBucket;

/// A pending unit of work.
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub key: String,
    pub payload: T,
    /// Set for skippable items; `None` items are never skipped.
    enqueued_at: Option<Instant>,
}

impl<T> QueueItem<T> {
    pub fn is_skippable(&self) -> bool {
        self.enqueued_at.is_some()
    }
}

struct QueueState<T> {
    pending: HashMap<String, QueueItem<T>>,
    order: VecDeque<String>,
    shutting_down: bool,
    /// Start of the most recent successful sync.
    last_sync: Option<Instant>,
    failures: HashMap<String, u32>,
}

/// Work queue keyed by object identity.
pub struct RateLimitedQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    limiter: TokenBucket,
    retry: RetryPolicy,
    started: AtomicBool,
    done_tx: watch::Sender<bool>,
}

impl<T> RateLimitedQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(limiter: TokenBucket, retry: RetryPolicy) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(QueueState {
                pending: HashMap::new(),
                order: VecDeque::new(),
                shutting_down: false,
                last_sync: None,
                failures: HashMap::new(),
            }),
            notify: Notify::new(),
            limiter,
            retry,
            started: AtomicBool::new(false),
            done_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the pending payload for `key`.
    pub fn enqueue(&self, key: impl Into<String>, payload: T) {
        self.insert(key.into(), payload, None);
    }

    /// Like [`enqueue`](Self::enqueue), but the item may be dropped if a sync
    /// that started after it was enqueued has already succeeded.
    pub fn enqueue_skippable(&self, key: impl Into<String>, payload: T) {
        self.insert(key.into(), payload, Some(Instant::now()));
    }

    fn insert(&self, key: String, payload: T, enqueued_at: Option<Instant>) {
        let mut state = self.lock();
        if state.shutting_down {
            tracing::debug!(key = %key, "Queue shutting down, dropping item");
            return;
        }

        if let Some(existing) = state.pending.get_mut(&key) {
            existing.payload = payload;
            // A non-skippable write is never downgraded by a later skippable one.
            existing.enqueued_at = match (existing.enqueued_at, enqueued_at) {
                (Some(_), Some(t)) => Some(t),
                _ => None,
            };
            tracing::trace!(key = %key, "Coalesced pending item");
            return;
        }

        state.order.push_back(key.clone());
        state.pending.insert(
            key.clone(),
            QueueItem {
                key,
                payload,
                enqueued_at,
            },
        );
        drop(state);
        self.notify.notify_one();
    }

    /// Re-enqueue a failed key unless a newer write is already pending.
    fn requeue(&self, key: String, payload: T) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        if let Some(existing) = state.pending.get_mut(&key) {
            existing.enqueued_at = None;
            return;
        }
        drop(state);
        self.insert(key, payload, None);
    }

    /// Number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    async fn pop(&self) -> Option<QueueItem<T>> {
        loop {
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                while let Some(key) = state.order.pop_front() {
                    if let Some(item) = state.pending.remove(&key) {
                        return Some(item);
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    /// Fold a write that arrived for the same key while waiting on the limiter.
    fn take_newer(&self, mut item: QueueItem<T>) -> QueueItem<T> {
        let mut state = self.lock();
        if let Some(newer) = state.pending.remove(&item.key) {
            state.order.retain(|k| k != &item.key);
            item.enqueued_at = match (item.enqueued_at, newer.enqueued_at) {
                (Some(_), Some(t)) => Some(t),
                _ => None,
            };
            item.payload = newer.payload;
        }
        item
    }

    fn is_superseded(&self, item: &QueueItem<T>) -> bool {
        let state = self.lock();
        match (item.enqueued_at, state.last_sync) {
            (Some(enqueued), Some(last_sync)) => last_sync > enqueued,
            _ => false,
        }
    }

    /// Run the worker loop until [`shutdown`](Self::shutdown).
    ///
    /// `sync` receives the key and the latest payload. Errors are logged and
    /// the key is retried after a backoff; they never stop the loop.
    pub async fn run<F, Fut, E>(self: Arc<Self>, sync: F)
    where
        F: Fn(String, T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), E>> + Send,
        E: Display + Send,
    {
        self.started.store(true, Ordering::SeqCst);
        tracing::info!("Sync queue worker started");

        while let Some(item) = self.pop().await {
            if self.is_superseded(&item) {
                tracing::debug!(key = %item.key, "Skipping item covered by a later sync");
                continue;
            }

            self.limiter.acquire().await;
            if self.is_shutting_down() {
                break;
            }
            let item = self.take_newer(item);

            let started = Instant::now();
            let key = item.key.clone();
            match sync(key.clone(), item.payload.clone()).await {
                Ok(()) => {
                    let mut state = self.lock();
                    state.last_sync = Some(started);
                    state.failures.remove(&key);
                }
                Err(e) => {
                    let failures = {
                        let mut state = self.lock();
                        let count = state.failures.entry(key.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    let delay = self.retry.delay(failures);
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Sync failed, requeueing"
                    );
                    metrics::record_requeue();

                    let queue = Arc::clone(&self);
                    let payload = item.payload;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        queue.requeue(key, payload);
                    });
                }
            }
        }

        let dropped = self.len();
        tracing::info!(dropped, "Sync queue worker stopped");
        self.done_tx.send_replace(true);
    }

    /// Stop accepting items, let the in-flight sync finish and wait for the
    /// worker loop to exit.
    pub async fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.shutting_down = true;
        }
        self.notify.notify_waiters();
        self.notify.notify_one();

        if self.started.load(Ordering::SeqCst) {
            let mut done = self.done_tx.subscribe();
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn queue(rate: f64) -> Arc<RateLimitedQueue<u32>> {
        Arc::new(RateLimitedQueue::new(
            TokenBucket::new(rate, 1),
            RetryPolicy::new(10, 50),
        ))
    }

    #[test]
    fn pending_items_are_deduplicated() {
        let q = queue(1.0);
        q.enqueue("a", 1);
        q.enqueue("a", 2);
        q.enqueue_skippable("b", 3);
        assert_eq!(q.len(), 2);

        let state = q.lock();
        assert_eq!(state.pending["a"].payload, 2);
        assert!(state.pending["b"].is_skippable());
    }

    #[test]
    fn skippable_write_does_not_downgrade() {
        let q = queue(1.0);
        q.enqueue("a", 1);
        q.enqueue_skippable("a", 2);
        let state = q.lock();
        assert_eq!(state.pending["a"].payload, 2);
        assert!(!state.pending["a"].is_skippable());
    }

    #[tokio::test(start_paused = true)]
    async fn last_write_wins_before_dequeue() {
        let q = queue(100.0);
        let (tx, mut rx) = mpsc::unbounded_channel();

        q.enqueue("ingress/app", 1);
        q.enqueue("ingress/app", 2);

        let worker = tokio::spawn(Arc::clone(&q).run(move |key, payload| {
            let tx = tx.clone();
            async move {
                tx.send((key, payload)).unwrap();
                Ok::<(), String>(())
            }
        }));

        assert_eq!(rx.recv().await, Some(("ingress/app".to_string(), 2)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        q.shutdown().await;
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn writes_during_rate_limit_wait_are_folded() {
        let q = queue(0.5);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(Arc::clone(&q).run(move |key, payload| {
            let tx = tx.clone();
            async move {
                tx.send((key, payload)).unwrap();
                Ok::<(), String>(())
            }
        }));

        q.enqueue("global", 1);
        assert_eq!(rx.recv().await, Some(("global".to_string(), 1)));

        // The next token is two seconds away; both writes land while waiting.
        q.enqueue("global", 2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        q.enqueue("global", 3);

        assert_eq!(rx.recv().await, Some(("global".to_string(), 3)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        q.shutdown().await;
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sync_is_retried() {
        let q = queue(100.0);
        let attempts = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let counter = Arc::clone(&attempts);
        let worker = tokio::spawn(Arc::clone(&q).run(move |_key, payload: u32| {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    return Err(format!("attempt {n} failed"));
                }
                tx.send(payload).unwrap();
                Ok(())
            }
        }));

        q.enqueue("global", 7);
        assert_eq!(rx.recv().await, Some(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        q.shutdown().await;
        worker.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn skippable_item_dropped_after_newer_sync() {
        let q = queue(1000.0);
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Enqueued before the worker's first sync starts.
        q.enqueue_skippable("obj-a", 1);
        {
            let mut state = q.lock();
            state.last_sync = Some(Instant::now() + Duration::from_millis(1));
        }

        let worker = tokio::spawn(Arc::clone(&q).run(move |key, payload| {
            let tx = tx.clone();
            async move {
                tx.send((key, payload)).unwrap();
                Ok::<(), String>(())
            }
        }));

        q.enqueue("global", 2);
        assert_eq!(rx.recv().await, Some(("global".to_string(), 2)));
        assert!(rx.try_recv().is_err());

        q.shutdown().await;
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_is_noop() {
        let q = queue(1.0);
        q.shutdown().await;
        assert!(q.is_shutting_down());
        q.enqueue("a", 1);
        assert!(q.is_empty());
    }
}
