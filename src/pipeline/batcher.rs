//! Per-kind batching consumer (C5): drains a queue into a buffer, flushes
//! on size/time/explicit triggers, retries failed batches with exponential
//! backoff, and dead-letters on exhaustion. Mirrors the retry/backoff idiom
//! of `scrapers/binance_session.rs::BackoffCalculator` applied to storage
//! writes instead of reconnects.

use super::dead_letter::DeadLetterLog;
use super::queue::QueueConsumer;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Storage-facing half of the batcher: one transactional write per batch.
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn write_batch(&self, batch: &[T]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
}

#[derive(Default)]
pub struct BatcherMetrics {
    pub batches_flushed: AtomicU64,
    pub batches_dead_lettered: AtomicU64,
    pub records_written: AtomicU64,
}

/// Explicit flush signal shared with callers of `Pipeline::flush`.
#[derive(Clone, Default)]
pub struct FlushSignal {
    notify: Arc<Notify>,
}

impl FlushSignal {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    async fn notified(&self) {
        self.notify.notified().await;
    }
}

pub struct Batcher<T> {
    kind: &'static str,
    consumer: QueueConsumer<T>,
    sink: Arc<dyn BatchSink<T>>,
    dead_letter: Arc<DeadLetterLog>,
    config: BatcherConfig,
    flush_signal: FlushSignal,
    metrics: Arc<BatcherMetrics>,
}

impl<T: Clone + Serialize + Send + Sync + 'static> Batcher<T> {
    pub fn new(
        kind: &'static str,
        consumer: QueueConsumer<T>,
        sink: Arc<dyn BatchSink<T>>,
        dead_letter: Arc<DeadLetterLog>,
        config: BatcherConfig,
        flush_signal: FlushSignal,
        metrics: Arc<BatcherMetrics>,
    ) -> Self {
        Self {
            kind,
            consumer,
            sink,
            dead_letter,
            config,
            flush_signal,
            metrics,
        }
    }

    /// Run until `cancel` fires. On cancellation, drains and flushes the
    /// remaining buffer up to `shutdown_timeout` before returning
    /// (spec.md 4.4's cancellation contract; the timeout itself is
    /// enforced by the caller wrapping this future in `tokio::time::timeout`).
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut buffer: Vec<T> = Vec::with_capacity(self.config.batch_size);
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    buffer.extend(self.consumer.drain());
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                    return;
                }

                item = self.consumer.recv() => {
                    match item {
                        Some(item) => {
                            buffer.push(item);
                            if buffer.len() >= self.config.batch_size {
                                self.flush(&mut buffer).await;
                            }
                        }
                        None => {
                            if !buffer.is_empty() {
                                self.flush(&mut buffer).await;
                            }
                            return;
                        }
                    }
                }

                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }

                _ = self.flush_signal.notified() => {
                    buffer.extend(self.consumer.drain());
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<T>) {
        let batch = std::mem::take(buffer);
        let mut attempt = 0u32;
        loop {
            match self.sink.write_batch(&batch).await {
                Ok(()) => {
                    self.metrics.batches_flushed.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .records_written
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        error!(kind = self.kind, error = %e, records = batch.len(), "batch exhausted retries, dead-lettering");
                        self.metrics
                            .batches_dead_lettered
                            .fetch_add(1, Ordering::Relaxed);
                        if let Err(dl_err) = self.dead_letter.write(self.kind, &e.to_string(), &batch) {
                            error!(kind = self.kind, error = %dl_err, "failed to write dead-letter entry");
                        }
                        return;
                    }
                    let delay = self.config.retry_base * 2u32.pow(attempt.min(6));
                    warn!(kind = self.kind, attempt, delay_ms = delay.as_millis(), error = %e, "batch write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::bounded;
    use std::sync::atomic::AtomicUsize;

    struct FlakySink {
        fail_times: AtomicUsize,
        written: Arc<Mutex<Vec<i32>>>,
    }
    use parking_lot::Mutex;

    #[async_trait]
    impl BatchSink<i32> for FlakySink {
        async fn write_batch(&self, batch: &[i32]) -> anyhow::Result<()> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("transient failure");
            }
            self.written.lock().extend_from_slice(batch);
            Ok(())
        }
    }

    #[tokio::test]
    async fn flush_on_batch_size() {
        let (tx, rx) = bounded::<i32>(100);
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(FlakySink {
            fail_times: AtomicUsize::new(0),
            written: written.clone(),
        });
        let dead_letter = Arc::new(
            DeadLetterLog::open(tempfile::tempdir().unwrap().path().join("dl.log")).unwrap(),
        );
        let config = BatcherConfig {
            batch_size: 3,
            flush_interval: Duration::from_secs(3600),
            max_retries: 2,
            retry_base: Duration::from_millis(1),
        };
        let metrics = Arc::new(BatcherMetrics::default());
        let batcher = Batcher::new(
            "ticker",
            rx,
            sink,
            dead_letter,
            config,
            FlushSignal::new(),
            metrics.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(batcher.run(cancel.clone()));

        for i in 0..3 {
            tx.try_submit(i).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*written.lock(), vec![0, 1, 2]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn retries_then_dead_letters_after_exhaustion() {
        let (tx, rx) = bounded::<i32>(100);
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(FlakySink {
            fail_times: AtomicUsize::new(10),
            written: written.clone(),
        });
        let tmp = tempfile::tempdir().unwrap();
        let dl_path = tmp.path().join("dl.log");
        let dead_letter = Arc::new(DeadLetterLog::open(&dl_path).unwrap());
        let config = BatcherConfig {
            batch_size: 1,
            flush_interval: Duration::from_secs(3600),
            max_retries: 2,
            retry_base: Duration::from_millis(1),
        };
        let metrics = Arc::new(BatcherMetrics::default());
        let batcher = Batcher::new(
            "ticker",
            rx,
            sink,
            dead_letter,
            config,
            FlushSignal::new(),
            metrics.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(batcher.run(cancel.clone()));

        tx.try_submit(42).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.batches_dead_lettered.load(Ordering::SeqCst), 1);
        assert!(written.lock().is_empty());
        let contents = std::fs::read_to_string(&dl_path).unwrap();
        assert_eq!(contents.lines().count(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
