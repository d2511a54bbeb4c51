//! Writer Pool
//!
//! A fixed number of workers that take batches from a bounded channel,
//! submit them through the gateway and wait for every write to be answered
//! before taking the next one. At most one batch is in flight per worker.
//!
//! Workers stop when the channel is closed and drained, or when the
//! shutdown token is cancelled. A failed or timed-out batch is reported
//! and the worker moves on.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::application::services::channel::BatchReceiver;
use crate::application::services::failures::FailureReporter;
use crate::application::services::gateway::BatchSubmitter;
use crate::domain::reference_data::{RecordKind, SymbolRecord};
use crate::infrastructure::metrics;

/// What a pool (or one worker) got done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// Batches whose writes were all answered.
    pub batches: u64,
    /// Records submitted.
    pub records: u64,
    /// Writes answered with a failure.
    pub failed_writes: u64,
    /// Batches that hit the completion timeout.
    pub timed_out_batches: u64,
}

impl PoolReport {
    fn merge(&mut self, other: Self) {
        self.batches += other.batches;
        self.records += other.records;
        self.failed_writes += other.failed_writes;
        self.timed_out_batches += other.timed_out_batches;
    }
}

/// Running set of writer tasks for one record kind.
#[derive(Debug)]
pub struct WriterPool {
    kind: RecordKind,
    workers: JoinSet<PoolReport>,
}

impl WriterPool {
    /// Start `workers` writers draining `receiver`.
    ///
    /// A `workers` value of zero is treated as one. The pool owns the
    /// receiver; once every worker exits the channel reports closed to the
    /// producer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<T, G>(
        kind: RecordKind,
        workers: usize,
        receiver: BatchReceiver<T>,
        gateway: Arc<G>,
        failures: &FailureReporter,
        shutdown: &CancellationToken,
    ) -> Self
    where
        T: SymbolRecord,
        G: BatchSubmitter<T>,
    {
        let mut set = JoinSet::new();
        for worker_id in 0..workers.max(1) {
            set.spawn(run_worker(
                worker_id,
                kind,
                receiver.clone(),
                Arc::clone(&gateway),
                failures.clone(),
                shutdown.clone(),
            ));
        }
        tracing::info!(kind = %kind, workers = set.len(), "Writer pool started");

        Self { kind, workers: set }
    }

    /// Number of workers still running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to exit and combine their reports.
    pub async fn join(mut self) -> PoolReport {
        let mut total = PoolReport::default();
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(report) => total.merge(report),
                Err(e) => tracing::error!(kind = %self.kind, error = %e, "Writer task failed"),
            }
        }
        tracing::info!(
            kind = %self.kind,
            batches = total.batches,
            records = total.records,
            failed_writes = total.failed_writes,
            timed_out_batches = total.timed_out_batches,
            "Writer pool finished"
        );
        total
    }
}

async fn run_worker<T, G>(
    worker_id: usize,
    kind: RecordKind,
    receiver: BatchReceiver<T>,
    gateway: Arc<G>,
    failures: FailureReporter,
    shutdown: CancellationToken,
) -> PoolReport
where
    T: SymbolRecord,
    G: BatchSubmitter<T>,
{
    let mut report = PoolReport::default();

    loop {
        let batch = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!(worker_id, kind = %kind, "Writer stopping on shutdown");
                break;
            }
            next = receiver.take() => match next {
                Some(batch) => batch,
                None => break,
            },
        };
        metrics::set_channel_depth(kind, receiver.depth().get());

        let key = batch.key();
        let records = batch.len() as u64;
        report.records += records;

        let handle = gateway.submit(batch).report_late_failures(failures.clone());
        match gateway.complete(handle).await {
            Ok(outcome) => {
                report.batches += 1;
                metrics::record_batch_completed(kind, outcome.elapsed);
                for failure in outcome.failures {
                    tracing::warn!(worker_id, error = %failure, "Write not acknowledged");
                    metrics::record_write_failure(kind);
                    report.failed_writes += 1;
                    failures.report(failure);
                }
            }
            Err(e) => {
                tracing::warn!(worker_id, batch = %key, records, error = %e, "Batch did not complete");
                report.timed_out_batches += 1;
            }
        }
    }

    tracing::debug!(worker_id, kind = %kind, batches = report.batches, "Writer exited");
    report
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;
    use crate::application::services::channel::batch_channel;
    use crate::application::services::failures::failure_channel;
    use crate::application::services::gateway::{GatewaySettings, StoreGateway};
    use crate::application::services::retry::WriteRetryPolicy;
    use crate::domain::batching::SymbolBatch;
    use crate::domain::reference_data::PriceBar;
    use crate::infrastructure::memory::InMemoryReferenceStore;

    fn batch(symbol: &str, days: u32) -> SymbolBatch<PriceBar> {
        SymbolBatch::new(
            (1..=days)
                .map(|day| PriceBar {
                    exchange: "NYSE".to_string(),
                    symbol: symbol.to_string(),
                    date: NaiveDate::from_ymd_opt(2020, 2, day).unwrap(),
                    open: 1.0,
                    high: 2.0,
                    low: 0.5,
                    close: 1.5,
                    volume: 1_000,
                    adj_close: 1.5,
                })
                .collect(),
        )
        .unwrap()
    }

    fn settings() -> GatewaySettings {
        GatewaySettings {
            write_timeout: Some(Duration::from_secs(5)),
            retry: WriteRetryPolicy::none(),
        }
    }

    #[tokio::test]
    async fn drains_channel_then_exits() {
        let store = Arc::new(InMemoryReferenceStore::new());
        let gateway = Arc::new(StoreGateway::new(Arc::clone(&store), settings()));
        let (tx, rx) = batch_channel(2);
        let (reporter, collector) = failure_channel();
        let shutdown = CancellationToken::new();

        let pool = WriterPool::spawn(RecordKind::PriceBar, 3, rx, Arc::clone(&gateway), &reporter, &shutdown);
        drop(reporter);
        assert_eq!(pool.running(), 3);

        for (symbol, days) in [("AAA", 3), ("BBB", 1), ("CCC", 5), ("DDD", 2)] {
            tx.put(batch(symbol, days)).await.unwrap();
        }
        drop(tx);

        let report = pool.join().await;
        assert_eq!(report.batches, 4);
        assert_eq!(report.records, 11);
        assert_eq!(report.failed_writes, 0);
        assert_eq!(store.price_bars().len(), 11);
        assert_eq!(store.all_metadata().len(), 4);
        assert_eq!(gateway.throughput().total(), 11);
        assert_eq!(collector.collect().await.total(), 0);
    }

    #[tokio::test]
    async fn failures_are_forwarded_and_worker_continues() {
        let store = Arc::new(InMemoryReferenceStore::new());
        store.reject_symbol("BAD");
        let gateway = Arc::new(StoreGateway::new(Arc::clone(&store), settings()));
        let (tx, rx) = batch_channel(4);
        let (reporter, collector) = failure_channel();
        let shutdown = CancellationToken::new();

        let pool = WriterPool::spawn(RecordKind::PriceBar, 1, rx, gateway, &reporter, &shutdown);
        drop(reporter);

        tx.put(batch("BAD", 2)).await.unwrap();
        tx.put(batch("GOOD", 2)).await.unwrap();
        drop(tx);

        let report = pool.join().await;
        assert_eq!(report.batches, 2);
        assert_eq!(report.failed_writes, 3);
        assert_eq!(store.price_bars().len(), 2);

        let summary = collector.collect().await;
        assert_eq!(summary.price_bars, 3);
    }

    #[tokio::test]
    async fn shutdown_stops_idle_workers() {
        let store = Arc::new(InMemoryReferenceStore::new());
        let gateway = Arc::new(StoreGateway::new(store, settings()));
        let (tx, rx) = batch_channel::<PriceBar>(1);
        let (reporter, _collector) = failure_channel();
        let shutdown = CancellationToken::new();

        let pool = WriterPool::spawn(RecordKind::PriceBar, 2, rx, gateway, &reporter, &shutdown);
        shutdown.cancel();

        let report = tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .unwrap();
        assert_eq!(report, PoolReport::default());
        // Channel stays open; the sender outlived the pool.
        drop(tx);
    }

    #[tokio::test]
    async fn timed_out_batch_is_counted() {
        let store = Arc::new(InMemoryReferenceStore::new());
        store.pause_writes();
        let gateway = Arc::new(StoreGateway::new(
            Arc::clone(&store),
            GatewaySettings {
                write_timeout: Some(Duration::from_millis(20)),
                retry: WriteRetryPolicy::none(),
            },
        ));
        let (tx, rx) = batch_channel(1);
        let (reporter, _collector) = failure_channel();
        let shutdown = CancellationToken::new();

        let pool = WriterPool::spawn(RecordKind::PriceBar, 1, rx, gateway, &reporter, &shutdown);
        tx.put(batch("SLOW", 1)).await.unwrap();
        drop(tx);

        let report = pool.join().await;
        assert_eq!(report.timed_out_batches, 1);
        assert_eq!(report.batches, 0);
        store.resume_writes();
    }
}
