//! Batch Producer
//!
//! Reads files one after another on a blocking thread, cuts each file's
//! records into per-symbol batches and feeds them into the bounded channel.
//! When the channel is full the producer blocks, which is what throttles
//! file reading to the pace of the writers.
//!
//! Batches never span files: the trailing run of each file is flushed
//! before the next file is opened. A row that fails to parse is skipped
//! and does not close the current batch.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::application::ports::RecordFileSource;
use crate::application::services::channel::BatchSender;
use crate::domain::batching::{BatchAccumulator, SymbolBatch};
use crate::domain::reference_data::{RecordKind, SymbolRecord};
use crate::infrastructure::metrics;

/// What one producer read and emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerReport {
    /// Files fully read.
    pub files_read: u64,
    /// Files that could not be opened.
    pub files_skipped: u64,
    /// Rows parsed into records.
    pub records_read: u64,
    /// Rows dropped because they could not be parsed.
    pub records_skipped: u64,
    /// Batches handed to the channel.
    pub batches: u64,
    /// Whether production stopped before every file was read.
    pub interrupted: bool,
}

/// Why production ended early.
enum Stop {
    Cancelled,
    ChannelClosed,
}

/// Feeds one record kind from files into a batch channel.
#[derive(Debug)]
pub struct BatchProducer<T, S> {
    kind: RecordKind,
    source: S,
    sender: BatchSender<T>,
    shutdown: CancellationToken,
}

impl<T, S> BatchProducer<T, S>
where
    T: SymbolRecord,
    S: RecordFileSource<T>,
{
    /// Create a producer that owns the sending half of the channel.
    #[must_use]
    pub const fn new(
        kind: RecordKind,
        source: S,
        sender: BatchSender<T>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            kind,
            source,
            sender,
            shutdown,
        }
    }

    /// Read every file in order. Blocks; run it with `spawn_blocking`.
    ///
    /// The channel closes when this returns and the sender is dropped.
    pub fn run(self, files: &[PathBuf]) -> ProducerReport {
        let mut report = ProducerReport::default();

        for path in files {
            if self.shutdown.is_cancelled() {
                report.interrupted = true;
                break;
            }

            let rows = match self.source.open(path) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(kind = %self.kind, error = %e, "Could not process file, skipping");
                    metrics::record_file_skipped(self.kind);
                    report.files_skipped += 1;
                    continue;
                }
            };

            tracing::info!(kind = %self.kind, path = %path.display(), "Processing file");
            match self.load_file(path, rows, &mut report) {
                Ok(()) => report.files_read += 1,
                Err(Stop::Cancelled) => {
                    tracing::info!(kind = %self.kind, path = %path.display(), "Stopped reading on shutdown");
                    report.interrupted = true;
                    break;
                }
                Err(Stop::ChannelClosed) => {
                    tracing::warn!(kind = %self.kind, "Writers are gone, stopping producer");
                    report.interrupted = true;
                    break;
                }
            }
        }

        tracing::info!(
            kind = %self.kind,
            files_read = report.files_read,
            files_skipped = report.files_skipped,
            records = report.records_read,
            skipped = report.records_skipped,
            batches = report.batches,
            "Producer finished"
        );
        report
    }

    fn load_file(
        &self,
        path: &Path,
        rows: S::Rows,
        report: &mut ProducerReport,
    ) -> Result<(), Stop> {
        let mut accumulator = BatchAccumulator::new();

        for row in rows {
            if self.shutdown.is_cancelled() {
                return Err(Stop::Cancelled);
            }

            match row {
                Ok(record) => {
                    report.records_read += 1;
                    if let Some(batch) = accumulator.push(record) {
                        self.emit(batch, report)?;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        kind = %self.kind,
                        path = %path.display(),
                        line = e.line(),
                        raw = e.raw(),
                        error = %e,
                        "Skipping unparsable row"
                    );
                    metrics::record_records_skipped(self.kind, 1);
                    report.records_skipped += 1;
                }
            }
        }

        if let Some(batch) = accumulator.finish() {
            self.emit(batch, report)?;
        }
        Ok(())
    }

    fn emit(&self, batch: SymbolBatch<T>, report: &mut ProducerReport) -> Result<(), Stop> {
        tracing::debug!(
            kind = %self.kind,
            exchange = batch.exchange(),
            symbol = batch.symbol(),
            records = batch.len(),
            "Flushing batch"
        );
        self.sender
            .blocking_put(batch)
            .map_err(|_| Stop::ChannelClosed)?;
        metrics::set_channel_depth(self.kind, self.sender.depth().get());
        report.batches += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::application::ports::{FileAccessError, ParseError};
    use crate::application::services::channel::batch_channel;
    use crate::domain::reference_data::DividendEvent;

    /// Files as in-memory row lists keyed by path.
    #[derive(Debug, Default)]
    struct FakeSource {
        files: HashMap<PathBuf, Vec<Result<DividendEvent, ParseError>>>,
    }

    impl FakeSource {
        fn with_file(mut self, path: &str, rows: Vec<Result<DividendEvent, ParseError>>) -> Self {
            self.files.insert(PathBuf::from(path), rows);
            self
        }
    }

    impl RecordFileSource<DividendEvent> for FakeSource {
        type Rows = std::vec::IntoIter<Result<DividendEvent, ParseError>>;

        fn open(&self, path: &Path) -> Result<Self::Rows, FileAccessError> {
            self.files
                .get(path)
                .cloned()
                .map(Vec::into_iter)
                .ok_or_else(|| FileAccessError::new(path, "not found"))
        }
    }

    fn row(symbol: &str, day: u32) -> Result<DividendEvent, ParseError> {
        Ok(DividendEvent {
            exchange: "NYSE".to_string(),
            symbol: symbol.to_string(),
            date: NaiveDate::from_ymd_opt(2021, 6, day).unwrap(),
            amount: 0.1,
        })
    }

    fn bad_row(line: u64) -> Result<DividendEvent, ParseError> {
        Err(ParseError::InvalidDate {
            line,
            value: "06/01/2021".to_string(),
            raw: "NYSE,ACME,06/01/2021,0.1".to_string(),
        })
    }

    async fn run_to_end(source: FakeSource, files: Vec<PathBuf>) -> (ProducerReport, Vec<SymbolBatch<DividendEvent>>) {
        let (tx, rx) = batch_channel(2);
        let producer = BatchProducer::new(RecordKind::Dividend, source, tx, CancellationToken::new());
        let handle = tokio::task::spawn_blocking(move || producer.run(&files));

        let mut batches = Vec::new();
        while let Some(batch) = rx.take().await {
            batches.push(batch);
        }
        (handle.await.unwrap(), batches)
    }

    #[tokio::test]
    async fn batches_per_symbol_and_per_file() {
        let source = FakeSource::default()
            .with_file("a_dividends.csv", vec![row("ACME", 1), row("ACME", 2), row("WIDGE", 1)])
            .with_file("b_dividends.csv", vec![row("WIDGE", 2)]);

        let (report, batches) = run_to_end(
            source,
            vec![PathBuf::from("a_dividends.csv"), PathBuf::from("b_dividends.csv")],
        )
        .await;

        assert_eq!(report.files_read, 2);
        assert_eq!(report.records_read, 4);
        assert_eq!(report.batches, 3);
        let shape: Vec<_> = batches.iter().map(|b| (b.symbol().to_string(), b.len())).collect();
        assert_eq!(
            shape,
            vec![("ACME".to_string(), 2), ("WIDGE".to_string(), 1), ("WIDGE".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn unparsable_rows_are_skipped_without_splitting() {
        let source = FakeSource::default().with_file(
            "dividends.csv",
            vec![row("ACME", 1), bad_row(3), row("ACME", 3)],
        );

        let (report, batches) = run_to_end(source, vec![PathBuf::from("dividends.csv")]).await;

        assert_eq!(report.records_skipped, 1);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn leading_bad_row_never_yields_empty_batch() {
        let source = FakeSource::default()
            .with_file("dividends.csv", vec![bad_row(2), row("ACME", 1)]);

        let (_, batches) = run_to_end(source, vec![PathBuf::from("dividends.csv")]).await;

        assert_eq!(batches.len(), 1);
        assert!(batches.iter().all(|b| !b.is_empty()));
    }

    #[tokio::test]
    async fn missing_file_is_skipped() {
        let source = FakeSource::default().with_file("dividends.csv", vec![row("ACME", 1)]);

        let (report, batches) = run_to_end(
            source,
            vec![PathBuf::from("missing_dividends.csv"), PathBuf::from("dividends.csv")],
        )
        .await;

        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.files_read, 1);
        assert_eq!(batches.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_reads_nothing() {
        let source = FakeSource::default().with_file("dividends.csv", vec![row("ACME", 1)]);
        let (tx, rx) = batch_channel(2);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let producer = BatchProducer::new(RecordKind::Dividend, source, tx, shutdown);
        let report = tokio::task::spawn_blocking(move || producer.run(&[PathBuf::from("dividends.csv")]))
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.records_read, 0);
        assert!(rx.take().await.is_none());
    }

    #[tokio::test]
    async fn closed_channel_stops_producer() {
        let source = FakeSource::default()
            .with_file("dividends.csv", vec![row("A", 1), row("B", 1), row("C", 1)]);
        let (tx, rx) = batch_channel(1);
        drop(rx);

        let producer = BatchProducer::new(RecordKind::Dividend, source, tx, CancellationToken::new());
        let report = tokio::task::spawn_blocking(move || producer.run(&[PathBuf::from("dividends.csv")]))
            .await
            .unwrap();

        assert!(report.interrupted);
        assert_eq!(report.batches, 0);
    }
}
