//! Bounded multi-producer / single-consumer ingress queue with the
//! drop-oldest-on-overflow policy spec.md 4.4 requires.
//!
//! Neither `tokio::sync::mpsc` nor `async-channel` expose a way to evict
//! the head of a full queue, so this is a small hand-rolled bounded deque
//! guarded by `parking_lot::Mutex` with a `tokio::sync::Notify` for the
//! consumer side — the same "fast lock, no await while held" split the
//! teacher uses for `risk_manager` (api/routes.rs).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
    dropped: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

/// Submit-side handle.
#[derive(Clone)]
pub struct QueueProducer<T> {
    inner: Arc<Inner<T>>,
}

/// Consume-side handle (single consumer by convention; cloning is allowed
/// for convenience but the batcher only ever holds one).
#[derive(Clone)]
pub struct QueueConsumer<T> {
    inner: Arc<Inner<T>>,
}

pub fn bounded<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let inner = Arc::new(Inner {
        items: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        not_empty: Notify::new(),
        not_full: Notify::new(),
        dropped: AtomicU64::new(0),
        closed: std::sync::atomic::AtomicBool::new(false),
    });
    (
        QueueProducer {
            inner: inner.clone(),
        },
        QueueConsumer { inner },
    )
}

impl<T> QueueProducer<T> {
    /// Non-blocking fast path: try to enqueue immediately.
    pub fn try_submit(&self, item: T) -> Result<(), T> {
        let mut items = self.inner.items.lock();
        if items.len() >= self.inner.capacity {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Block the caller up to `timeout` for space; on expiry, drop the
    /// oldest in-queue record and enqueue the new one, incrementing the
    /// drop counter (spec.md 4.4).
    pub async fn submit(&self, item: T, timeout: Duration) {
        let mut item = match self.try_submit(item) {
            Ok(()) => return,
            Err(item) => item,
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let notified = self.inner.not_full.notified();
            tokio::select! {
                _ = notified => {
                    match self.try_submit(item) {
                        Ok(()) => return,
                        Err(returned) => item = returned,
                    }
                }
                _ = tokio::time::sleep(remaining) => break,
            }
        }

        let mut items = self.inner.items.lock();
        items.pop_front();
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        items.push_back(item);
        drop(items);
        self.inner.not_empty.notify_one();
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.not_empty.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }
}

impl<T> QueueConsumer<T> {
    /// Pop the next item, waiting if the queue is empty, unless closed and
    /// drained.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut items = self.inner.items.lock();
                if let Some(item) = items.pop_front() {
                    drop(items);
                    self.inner.not_full.notify_one();
                    return Some(item);
                }
                if self.inner.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.inner.not_empty.notified().await;
        }
    }

    /// Drain everything currently buffered without waiting.
    pub fn drain(&self) -> Vec<T> {
        let mut items = self.inner.items.lock();
        let drained: Vec<T> = items.drain(..).collect();
        drop(items);
        self.inner.not_full.notify_waiters();
        drained
    }

    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_path_submit_and_recv_preserves_order() {
        let (tx, rx) = bounded::<u32>(4);
        for i in 0..4 {
            tx.try_submit(i).unwrap();
        }
        let mut out = Vec::new();
        for _ in 0..4 {
            out.push(rx.recv().await.unwrap());
        }
        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let (tx, rx) = bounded::<u32>(2);
        tx.try_submit(1).unwrap();
        tx.try_submit(2).unwrap();
        // Queue full; a submit with a short timeout should drop 1 and keep
        // 2, then accept 3.
        tx.submit(3, Duration::from_millis(5)).await;
        assert_eq!(tx.dropped_count(), 1);
        let drained = rx.drain();
        assert_eq!(drained, vec![2, 3]);
    }

    #[tokio::test]
    async fn closed_empty_queue_yields_none() {
        let (tx, rx) = bounded::<u32>(2);
        tx.close();
        assert_eq!(rx.recv().await, None);
    }
}
