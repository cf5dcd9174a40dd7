//! Deduplicating, rate-limited queue of reconciliation keys
//!
//! A key is in at most one of two places: the pending queue, or the
//! processing set (handed out by [`WorkQueue::get`] and not yet
//! [`WorkQueue::done`]). Adding a key that is being processed only marks it
//! dirty; `done` puts it back on the queue afterwards. This is what keeps
//! any single key from being worked on by two workers at the same time.

pub mod rate_limiter;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use rate_limiter::{default_controller_rate_limiter, RateLimiter};

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys that need processing: everything queued plus re-adds of keys in flight
    dirty: HashSet<String>,
    /// Keys handed out by `get` and not yet `done`
    processing: HashSet<String>,
    shutting_down: bool,
}

impl WorkQueue {
    /// Queue using [`default_controller_rate_limiter`]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_limiter(name, Box::new(default_controller_rate_limiter()))
    }

    pub fn with_rate_limiter(name: impl Into<String>, rate_limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                rate_limiter,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing processing; duplicates collapse into one entry
    pub fn add(&self, key: &str) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key; `None` once the queue is shutting down.
    ///
    /// Every key returned must be handed back with [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.processing.insert(key.clone());
                    state.dirty.remove(&key);
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // pass the wakeup on in case several permits collapsed into ours
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release `key` after processing; requeues it if it was added meanwhile
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has passed
    pub fn add_after(&self, key: &str, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = self.clone();
        let key = key.to_string();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(&key),
            }
        });
    }

    /// Add `key` after the rate limiter's delay for it
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.inner.rate_limiter.when(key);
        tracing::debug!("Requeueing {} in {:?} (queue {})", key, delay, self.inner.name);
        self.add_after(key, delay);
    }

    /// Stop tracking failures of `key`
    pub fn forget(&self, key: &str) {
        self.inner.rate_limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake every waiting `get` with `None` and refuse further adds
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::rate_limiter::ItemExponentialFailureRateLimiter;
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn get_within(queue: &WorkQueue, limit: Duration) -> Option<Option<String>> {
        tokio::time::timeout(limit, queue.get()).await.ok()
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_adds_collapse() {
        let queue = WorkQueue::new("test");
        queue.add("db/a");
        queue.add("db/b");
        queue.add("db/a");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await.as_deref(), Some("db/a"));
        assert_eq!(queue.get().await.as_deref(), Some("db/b"));
        assert!(get_within(&queue, Duration::from_secs(1)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_in_flight_is_not_handed_out_twice() {
        let queue = WorkQueue::new("test");
        queue.add("db/a");
        let key = queue.get().await.unwrap();

        for _ in 0..5 {
            queue.add("db/a");
        }
        assert_eq!(queue.len(), 0);
        assert!(get_within(&queue, Duration::from_secs(1)).await.is_none());

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("db/a"));
        queue.done("db/a");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new("test");
        queue.add("db/a");
        let key = queue.get().await.unwrap();
        queue.done(&key);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shut_down_wakes_waiting_workers() {
        let queue = WorkQueue::new("test");
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        queue.shut_down();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), None);
        }

        queue.add("db/a");
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_add_waits_for_backoff() {
        let queue = WorkQueue::with_rate_limiter(
            "test",
            Box::new(ItemExponentialFailureRateLimiter::new(
                Duration::from_secs(1),
                Duration::from_secs(60),
            )),
        );

        queue.add_rate_limited("db/a");
        assert_eq!(queue.num_requeues("db/a"), 1);
        assert!(get_within(&queue, Duration::from_millis(900)).await.is_none());
        assert_eq!(
            get_within(&queue, Duration::from_millis(200)).await,
            Some(Some("db/a".to_string()))
        );
        queue.done("db/a");

        queue.add_rate_limited("db/a");
        assert!(get_within(&queue, Duration::from_millis(1900)).await.is_none());
        assert!(get_within(&queue, Duration::from_millis(200)).await.is_some());
        queue.done("db/a");

        queue.forget("db/a");
        assert_eq!(queue.num_requeues("db/a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shut_down_cancels_delayed_adds() {
        let queue = WorkQueue::new("test");
        queue.add_after("db/a", Duration::from_secs(5));
        queue.shut_down();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_never_share_a_key() {
        let queue = WorkQueue::new("test");
        let in_flight: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let overlaps = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let in_flight = Arc::clone(&in_flight);
                let overlaps = Arc::clone(&overlaps);
                let processed = Arc::clone(&processed);
                tokio::spawn(async move {
                    while let Some(key) = queue.get().await {
                        {
                            let mut map = in_flight.lock().unwrap();
                            let count = map.entry(key.clone()).or_insert(0);
                            *count += 1;
                            if *count > 1 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        *in_flight.lock().unwrap().get_mut(&key).unwrap() -= 1;
                        processed.fetch_add(1, Ordering::SeqCst);
                        queue.done(&key);
                    }
                })
            })
            .collect();

        for round in 0..50 {
            for key in ["db/a", "db/b", "db/c"] {
                queue.add(key);
            }
            if round % 5 == 0 {
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        }
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shut_down();
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(processed.load(Ordering::SeqCst) >= 3);
    }
}
