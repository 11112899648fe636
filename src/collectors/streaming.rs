//! Shared buffering/flush shape for the trade and liquidation collectors
//!.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

/// Generic "bounded buffer, periodic + threshold flush, at-least-once
/// retry-by-requeue" collector. `F` performs the bulk insert and returns the
/// number of rows actually written (informational only; at-least-once
/// semantics come from re-pushing the whole flushed batch to the front of
/// the buffer on failure).
pub struct StreamingCollector<T, F> {
    buffer: Mutex<VecDeque<T>>,
    max_buffer_size: usize,
    flush_interval: Duration,
    insert: F,
    label: &'static str,
}

impl<T, F> StreamingCollector<T, F>
where
    T: Send + 'static,
    F: Fn(&[T]) -> anyhow::Result<usize> + Send + Sync,
{
    pub fn new(label: &'static str, max_buffer_size: usize, flush_interval: Duration, insert: F) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            max_buffer_size,
            flush_interval,
            insert,
            label,
        }
    }

    fn push(&self, item: T) -> bool {
        let mut buffer = self.buffer.lock();
        buffer.push_back(item);
        buffer.len() >= self.max_buffer_size
    }

    fn flush(&self) {
        let batch: Vec<T> = {
            let mut buffer = self.buffer.lock();
            buffer.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }
        match (self.insert)(&batch) {
            Ok(count) => info!(collector = self.label, saved = count, "flush complete"),
            Err(e) => {
                error!(collector = self.label, error = %e, "flush failed, requeueing batch");
                let mut buffer = self.buffer.lock();
                for item in batch.into_iter().rev() {
                    buffer.push_front(item);
                }
            }
        }
    }

    /// Drain `rx` until closed or `running` clears, flushing on the
    /// interval or immediately once the buffer crosses `max_buffer_size`.
    /// Always performs one final flush before returning.
    pub async fn run(&self, mut rx: UnboundedReceiver<T>, running: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.tick().await;
        loop {
            if !running.load(Ordering::Relaxed) {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => self.flush(),
                item = rx.recv() => {
                    match item {
                        Some(item) => {
                            if self.push(item) {
                                self.flush();
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn flush_requeues_on_failure_and_succeeds_next_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_ref = attempts.clone();
        let collector = StreamingCollector::new("test", 1000, Duration::from_millis(20), move |batch: &[i32]| {
            let n = attempts_ref.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                anyhow::bail!("simulated failure")
            } else {
                Ok(batch.len())
            }
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        drop(tx);

        let running = Arc::new(AtomicBool::new(true));
        collector.run(rx, running).await;

        // First flush (triggered by channel close) fails and requeues; but
        // the channel is already closed so no further flush runs inside
        // `run`. Verify state was preserved for a follow-up flush.
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(collector.buffer.lock().len(), 2);

        collector.flush();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(collector.buffer.lock().is_empty());
    }
}
