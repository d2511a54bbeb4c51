//! Bounded Batch Channel
//!
//! Hand-off between one producer and a pool of writers. The channel holds
//! at most `capacity` batches; a producer that finds it full waits until a
//! writer takes one, which keeps memory bounded no matter how fast files
//! are read.
//!
//! ```text
//! producer ──put──▶ [■■■□□□□□□□] ──take──▶ writer 1
//!                        cap=10    ──take──▶ writer 2
//!                                  ──take──▶ writer N
//! ```
//!
//! The channel closes once the sender is dropped. Writers keep draining
//! until it is both closed and empty, then `take` returns `None`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::domain::batching::SymbolBatch;

/// The channel was closed on the receiving side; the batch is returned.
#[derive(Debug, thiserror::Error)]
#[error("batch channel closed")]
pub struct ChannelClosed<T>(pub SymbolBatch<T>);

/// Create a bounded channel holding at most `capacity` batches.
///
/// A `capacity` of zero is treated as one.
#[must_use]
pub fn batch_channel<T>(capacity: usize) -> (BatchSender<T>, BatchReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let depth = Arc::new(AtomicUsize::new(0));

    (
        BatchSender {
            tx,
            depth: Arc::clone(&depth),
        },
        BatchReceiver {
            rx: Arc::new(Mutex::new(rx)),
            depth,
        },
    )
}

/// Producer half. Dropping it closes the channel.
#[derive(Debug)]
pub struct BatchSender<T> {
    tx: mpsc::Sender<SymbolBatch<T>>,
    depth: Arc<AtomicUsize>,
}

impl<T> BatchSender<T> {
    /// Enqueue a batch, waiting while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] if every receiver has been dropped.
    pub async fn put(&self, batch: SymbolBatch<T>) -> Result<(), ChannelClosed<T>> {
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.tx.send(batch).await.map_err(|e| {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            ChannelClosed(e.0)
        })
    }

    /// Blocking variant of [`put`](Self::put) for producers running on a
    /// blocking thread.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] if every receiver has been dropped.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn blocking_put(&self, batch: SymbolBatch<T>) -> Result<(), ChannelClosed<T>> {
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.tx.blocking_send(batch).map_err(|e| {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            ChannelClosed(e.0)
        })
    }

    /// Maximum number of queued batches.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Handle for observing the queue depth.
    #[must_use]
    pub fn depth(&self) -> ChannelDepth {
        ChannelDepth(Arc::clone(&self.depth))
    }
}

/// Consumer half. Clone it once per writer.
#[derive(Debug)]
pub struct BatchReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<SymbolBatch<T>>>>,
    depth: Arc<AtomicUsize>,
}

impl<T> Clone for BatchReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
            depth: Arc::clone(&self.depth),
        }
    }
}

impl<T> BatchReceiver<T> {
    /// Wait for the next batch. Returns `None` once the channel is closed
    /// and drained.
    pub async fn take(&self) -> Option<SymbolBatch<T>> {
        let batch = self.rx.lock().await.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(batch)
    }

    /// Handle for observing the queue depth.
    #[must_use]
    pub fn depth(&self) -> ChannelDepth {
        ChannelDepth(Arc::clone(&self.depth))
    }
}

/// Read-only view of how many batches are queued or being handed over.
#[derive(Debug, Clone)]
pub struct ChannelDepth(Arc<AtomicUsize>);

impl ChannelDepth {
    /// Current number of batches in flight between producer and writers.
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::domain::reference_data::DividendEvent;

    fn batch(symbol: &str) -> SymbolBatch<DividendEvent> {
        SymbolBatch::new(vec![DividendEvent {
            exchange: "NYSE".to_string(),
            symbol: symbol.to_string(),
            date: NaiveDate::from_ymd_opt(2020, 3, 2).unwrap(),
            amount: 0.25,
        }])
        .unwrap()
    }

    #[tokio::test]
    async fn delivers_in_order_then_none_after_close() {
        let (tx, rx) = batch_channel(4);
        tx.put(batch("A")).await.unwrap();
        tx.put(batch("B")).await.unwrap();
        assert_eq!(tx.depth().get(), 2);
        drop(tx);

        assert_eq!(rx.take().await.unwrap().symbol(), "A");
        assert_eq!(rx.take().await.unwrap().symbol(), "B");
        assert!(rx.take().await.is_none());
        assert_eq!(rx.depth().get(), 0);
    }

    #[tokio::test]
    async fn put_waits_while_full() {
        let (tx, rx) = batch_channel(1);
        tx.put(batch("A")).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.put(batch("B"))).await;
        assert!(blocked.is_err(), "put should wait while the channel is full");

        assert_eq!(rx.take().await.unwrap().symbol(), "A");
        tx.put(batch("C")).await.unwrap();
        assert_eq!(rx.take().await.unwrap().symbol(), "C");
    }

    #[tokio::test]
    async fn put_fails_once_receivers_are_gone() {
        let (tx, rx) = batch_channel(2);
        drop(rx);

        let err = tx.put(batch("A")).await.unwrap_err();
        assert_eq!(err.0.symbol(), "A");
        assert_eq!(tx.depth().get(), 0);
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let (tx, _rx) = batch_channel::<DividendEvent>(0);
        assert_eq!(tx.capacity(), 1);
    }

    #[tokio::test]
    async fn blocking_put_from_blocking_thread() {
        let (tx, rx) = batch_channel(2);
        let producer = tokio::task::spawn_blocking(move || {
            for symbol in ["A", "B", "C", "D"] {
                tx.blocking_put(batch(symbol)).unwrap();
            }
        });

        let mut seen = Vec::new();
        while let Some(b) = rx.take().await {
            seen.push(b.symbol().to_string());
        }
        producer.await.unwrap();

        assert_eq!(seen, vec!["A", "B", "C", "D"]);
    }

    #[tokio::test]
    async fn cloned_receivers_share_one_queue() {
        let (tx, rx) = batch_channel(8);
        let other = rx.clone();
        for symbol in ["A", "B", "C"] {
            tx.put(batch(symbol)).await.unwrap();
        }
        drop(tx);

        let mut total = 0;
        while rx.take().await.is_some() {
            total += 1;
            if other.take().await.is_some() {
                total += 1;
            }
        }
        assert_eq!(total, 3);
    }
}
