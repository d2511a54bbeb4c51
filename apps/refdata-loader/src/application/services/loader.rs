//! Bulk Loader
//!
//! Wires one producer, one bounded channel and one writer pool per record
//! kind, runs price bars and dividends side by side and returns a summary
//! once both pipelines have drained.
//!
//! ```text
//! price files ──▶ producer ──▶ [channel] ──▶ writers ──┐
//!                                                      ├──▶ gateway ──▶ store
//! dividend files ▶ producer ──▶ [channel] ──▶ writers ──┘
//! ```
//!
//! Completion is structural: each pool exits when its channel is closed and
//! drained, and the channel closes when its producer returns. No polling is
//! involved in deciding that the load is over.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{RecordFileSource, ReferenceStorePort};
use crate::application::services::channel::{ChannelDepth, batch_channel};
use crate::application::services::failures::{FailureReporter, FailureSummary, failure_channel};
use crate::application::services::gateway::{BatchSubmitter, StoreGateway};
use crate::application::services::producer::{BatchProducer, ProducerReport};
use crate::application::services::writer_pool::{PoolReport, WriterPool};
use crate::domain::reference_data::{DividendEvent, PriceBar, RecordKind, SymbolRecord};
use crate::infrastructure::metrics;

// =============================================================================
// Inputs
// =============================================================================

/// Files to load, already classified and ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    /// Daily price files, in load order.
    pub price_files: Vec<PathBuf>,
    /// Dividend files, in load order.
    pub dividend_files: Vec<PathBuf>,
}

impl LoadPlan {
    /// Whether there is nothing to load.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.price_files.is_empty() && self.dividend_files.is_empty()
    }
}

/// Pipeline sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Writers per pipeline (default: 5).
    pub workers: usize,
    /// Batches each channel can hold (default: 10).
    pub channel_capacity: usize,
    /// Whether dividend files are loaded (default: true).
    pub load_dividends: bool,
    /// How often queue depth is logged (default: 10s).
    pub progress_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 5,
            channel_capacity: 10,
            load_dividends: true,
            progress_interval: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Reports from both halves of one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// File reading side.
    pub producer: ProducerReport,
    /// Writing side.
    pub writers: PoolReport,
}

/// Result of a full load.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSummary {
    /// Wall time from start until both pipelines drained.
    pub elapsed: Duration,
    /// Price bar writes issued, from the throughput counter.
    pub price_bars: u64,
    /// Dividend writes issued.
    pub dividends: u64,
    /// Price bar pipeline details.
    pub price_pipeline: PipelineReport,
    /// Dividend pipeline details, if it ran.
    pub dividend_pipeline: Option<PipelineReport>,
    /// Writes that were never acknowledged.
    pub failures: FailureSummary,
    /// Whether the load was cut short by shutdown.
    pub cancelled: bool,
}

impl LoadSummary {
    /// Price bars issued per second of wall time.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.price_bars as f64 / secs
        } else {
            self.price_bars as f64
        }
    }

    /// Rows dropped by the parser across both pipelines.
    #[must_use]
    pub fn records_skipped(&self) -> u64 {
        self.pipelines().map(|p| p.producer.records_skipped).sum()
    }

    /// Unreadable files across both pipelines.
    #[must_use]
    pub fn files_skipped(&self) -> u64 {
        self.pipelines().map(|p| p.producer.files_skipped).sum()
    }

    /// Batches that hit the completion timeout across both pipelines.
    #[must_use]
    pub fn timed_out_batches(&self) -> u64 {
        self.pipelines().map(|p| p.writers.timed_out_batches).sum()
    }

    fn pipelines(&self) -> impl Iterator<Item = &PipelineReport> {
        std::iter::once(&self.price_pipeline).chain(self.dividend_pipeline.as_ref())
    }
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Data Loading took {} secs. Total Points {} ({:.0} a sec)",
            self.elapsed.as_secs(),
            self.price_bars,
            self.rate_per_sec()
        )
    }
}

// =============================================================================
// Loader
// =============================================================================

struct RunningPipeline {
    kind: RecordKind,
    producer: JoinHandle<ProducerReport>,
    pool: WriterPool,
}

impl RunningPipeline {
    async fn finish(self) -> PipelineReport {
        let producer = match self.producer.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(kind = %self.kind, error = %e, "Producer task failed");
                ProducerReport {
                    interrupted: true,
                    ..ProducerReport::default()
                }
            }
        };
        let writers = self.pool.join().await;
        PipelineReport { producer, writers }
    }
}

/// Runs a complete load from a [`LoadPlan`].
#[derive(Debug)]
pub struct BulkLoader<S, Src> {
    gateway: Arc<StoreGateway<S>>,
    source: Src,
    settings: PipelineSettings,
}

impl<S, Src> BulkLoader<S, Src>
where
    S: ReferenceStorePort,
    Src: RecordFileSource<PriceBar> + RecordFileSource<DividendEvent> + Clone,
{
    /// Create a loader writing through `gateway` and reading with `source`.
    #[must_use]
    pub const fn new(gateway: Arc<StoreGateway<S>>, source: Src, settings: PipelineSettings) -> Self {
        Self {
            gateway,
            source,
            settings,
        }
    }

    /// Load every file in `plan` and wait for all writes to be answered.
    ///
    /// Cancelling `shutdown` stops producers between rows and writers
    /// between batches; the summary then covers what was done so far.
    pub async fn run(&self, plan: LoadPlan, shutdown: CancellationToken) -> LoadSummary {
        let started = Instant::now();

        if plan.is_empty() {
            tracing::warn!("No input files to load");
        }
        tracing::info!(
            price_files = plan.price_files.len(),
            dividend_files = plan.dividend_files.len(),
            workers = self.settings.workers,
            channel_capacity = self.settings.channel_capacity,
            "Starting load"
        );

        let (reporter, collector) = failure_channel();
        let failures = tokio::spawn(collector.collect());

        let (prices, price_depth) =
            self.start::<PriceBar>(RecordKind::PriceBar, plan.price_files, &reporter, &shutdown);

        let dividends = if self.settings.load_dividends {
            Some(self.start::<DividendEvent>(
                RecordKind::Dividend,
                plan.dividend_files,
                &reporter,
                &shutdown,
            ))
        } else {
            if !plan.dividend_files.is_empty() {
                tracing::info!(files = plan.dividend_files.len(), "Dividend loading disabled, skipping files");
            }
            None
        };
        drop(reporter);

        let progress_stop = CancellationToken::new();
        let progress = tokio::spawn(report_progress(
            self.settings.progress_interval,
            price_depth,
            dividends.as_ref().map(|(_, depth)| depth.clone()),
            Arc::clone(&self.gateway),
            progress_stop.clone(),
        ));

        let (price_pipeline, dividend_pipeline) = tokio::join!(prices.finish(), async {
            match dividends {
                Some((pipeline, _)) => Some(pipeline.finish().await),
                None => None,
            }
        });

        progress_stop.cancel();
        let _ = progress.await;

        let failures = failures.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failure collector task failed");
            FailureSummary::default()
        });

        let summary = LoadSummary {
            elapsed: started.elapsed(),
            price_bars: self.gateway.throughput().total(),
            dividends: dividend_pipeline.map_or(0, |p| p.writers.records),
            price_pipeline,
            dividend_pipeline,
            failures,
            cancelled: shutdown.is_cancelled(),
        };

        tracing::info!(
            elapsed_secs = summary.elapsed.as_secs_f64(),
            price_bars = summary.price_bars,
            dividends = summary.dividends,
            rate_per_sec = summary.rate_per_sec(),
            records_skipped = summary.records_skipped(),
            files_skipped = summary.files_skipped(),
            write_failures = summary.failures.total(),
            timed_out_batches = summary.timed_out_batches(),
            cancelled = summary.cancelled,
            "{summary}"
        );
        summary
    }

    fn start<T>(
        &self,
        kind: RecordKind,
        files: Vec<PathBuf>,
        failures: &FailureReporter,
        shutdown: &CancellationToken,
    ) -> (RunningPipeline, ChannelDepth)
    where
        T: SymbolRecord,
        Src: RecordFileSource<T>,
        StoreGateway<S>: BatchSubmitter<T>,
    {
        let (sender, receiver) = batch_channel::<T>(self.settings.channel_capacity);
        let depth = sender.depth();

        let pool = WriterPool::spawn(
            kind,
            self.settings.workers,
            receiver,
            Arc::clone(&self.gateway),
            failures,
            shutdown,
        );

        let producer = BatchProducer::new(kind, self.source.clone(), sender, shutdown.clone());
        let producer = tokio::task::spawn_blocking(move || producer.run(&files));

        (
            RunningPipeline {
                kind,
                producer,
                pool,
            },
            depth,
        )
    }
}

async fn report_progress<S: ReferenceStorePort>(
    every: Duration,
    prices: ChannelDepth,
    dividends: Option<ChannelDepth>,
    gateway: Arc<StoreGateway<S>>,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(100)));
    ticker.tick().await;

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let price_queue = prices.get();
                let dividend_queue = dividends.as_ref().map_or(0, ChannelDepth::get);
                metrics::set_channel_depth(RecordKind::PriceBar, price_queue);
                metrics::set_channel_depth(RecordKind::Dividend, dividend_queue);
                tracing::info!(
                    price_batches_queued = price_queue,
                    dividend_batches_queued = dividend_queue,
                    price_bars_issued = gateway.throughput().total(),
                    "Load in progress"
                );
            }
        }
    }
}
