//! Store Gateway
//!
//! Issues one asynchronous write per record of a batch, plus the metadata
//! upsert for price bar batches, and hands back a [`SubmissionHandle`]
//! that resolves only once every one of those writes has been answered.
//!
//! # Write Lifecycle
//!
//! ```text
//! submit ──▶ spawn N record writes (+1 metadata) ──▶ handle
//!                 │  retry transient errors with backoff
//!                 ▼
//! handle.wait ──▶ all answered ──▶ SubmissionReport { succeeded, failures }
//!             └─▶ timeout ───────▶ GatewayError::WriteTimeout
//! ```
//!
//! A failed write never stalls the barrier: it is answered with a
//! [`WriteFailure`] and reported alongside the successes.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::task::JoinSet;

use crate::application::ports::{PriceBarStream, ReferenceStorePort, StoreError, WriteError};
use crate::application::services::failures::FailureReporter;
use crate::application::services::retry::{ExponentialBackoff, WriteRetryPolicy};
use crate::application::services::throughput::ThroughputCounter;
use crate::domain::batching::SymbolBatch;
use crate::domain::reference_data::{
    DividendEvent, ExchangeSymbol, PriceBar, RecordKind, SymbolMetadata, SymbolRecord,
};
use crate::infrastructure::metrics;

// =============================================================================
// Errors and Reports
// =============================================================================

/// Gateway-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Not every write of a batch was answered in time.
    #[error("writes for {key} not answered within {timeout:?}: {outstanding} of {issued} outstanding")]
    WriteTimeout {
        /// Batch partition.
        key: ExchangeSymbol,
        /// Configured completion timeout.
        timeout: Duration,
        /// Writes still unanswered.
        outstanding: usize,
        /// Writes issued for the batch.
        issued: usize,
    },

    /// A read against the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which row a failed write was targeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// A price bar or dividend row.
    Record {
        /// Partition key.
        key: ExchangeSymbol,
        /// Row date.
        date: NaiveDate,
    },
    /// The instrument's metadata row.
    Metadata {
        /// Partition key.
        key: ExchangeSymbol,
    },
    /// A write whose task died before reporting its row.
    Unknown {
        /// Partition key of the batch.
        key: ExchangeSymbol,
    },
}

impl fmt::Display for WriteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record { key, date } => write!(f, "{key} {date}"),
            Self::Metadata { key } => write!(f, "{key} metadata"),
            Self::Unknown { key } => write!(f, "{key} (unknown row)"),
        }
    }
}

/// A write that was not acknowledged after all retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} write for {target} failed after {attempts} attempt(s): {error}")]
pub struct WriteFailure {
    /// Pipeline the write belonged to.
    pub kind: RecordKind,
    /// Row being written.
    pub target: WriteTarget,
    /// Last error returned by the store.
    pub error: WriteError,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Outcome of every write issued for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    /// Batch partition.
    pub key: ExchangeSymbol,
    /// Pipeline the batch belonged to.
    pub kind: RecordKind,
    /// Writes issued, metadata included.
    pub issued: usize,
    /// Writes acknowledged.
    pub succeeded: usize,
    /// Writes that failed.
    pub failures: Vec<WriteFailure>,
    /// Time from submission until the last write was answered.
    pub elapsed: Duration,
}

impl SubmissionReport {
    /// Whether every issued write was acknowledged.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// Submission Handle
// =============================================================================

/// Completion barrier for one submitted batch.
///
/// Consumed by [`wait`](Self::wait), so a handle is awaited at most once.
#[derive(Debug)]
#[must_use = "a submission is only complete once its handle has been awaited"]
pub struct SubmissionHandle {
    kind: RecordKind,
    key: ExchangeSymbol,
    issued: usize,
    submitted_at: Instant,
    pending: JoinSet<Result<(), WriteFailure>>,
    late_failures: Option<FailureReporter>,
}

impl SubmissionHandle {
    fn new(kind: RecordKind, key: ExchangeSymbol) -> Self {
        Self {
            kind,
            key,
            issued: 0,
            submitted_at: Instant::now(),
            pending: JoinSet::new(),
            late_failures: None,
        }
    }

    /// Send failures of writes still running after a timeout to `reporter`.
    ///
    /// Without a reporter those writes are detached and their outcome is lost.
    pub fn report_late_failures(mut self, reporter: FailureReporter) -> Self {
        self.late_failures = Some(reporter);
        self
    }

    /// Batch partition.
    #[must_use]
    pub const fn key(&self) -> &ExchangeSymbol {
        &self.key
    }

    /// Writes issued for the batch, metadata included.
    #[must_use]
    pub const fn issued(&self) -> usize {
        self.issued
    }

    /// Writes not yet collected by [`wait`](Self::wait).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Wait until every write has been answered.
    ///
    /// With `timeout` set, gives up after that long. The unanswered writes
    /// keep running; if a reporter was attached with
    /// [`report_late_failures`](Self::report_late_failures) a background task
    /// forwards their failures to it, and holds the reporter until the last
    /// of them is answered.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::WriteTimeout`] if the timeout elapses first.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<SubmissionReport, GatewayError> {
        let drained = match timeout {
            Some(limit) => {
                tokio::time::timeout(limit, drain(&mut self.pending, self.kind, &self.key))
                    .await
                    .ok()
            }
            None => Some(drain(&mut self.pending, self.kind, &self.key).await),
        };

        match (drained, timeout) {
            (Some((succeeded, failures)), _) => Ok(SubmissionReport {
                key: self.key,
                kind: self.kind,
                issued: self.issued,
                succeeded,
                failures,
                elapsed: self.submitted_at.elapsed(),
            }),
            (None, limit) => {
                let outstanding = self.pending.len();
                match self.late_failures.take() {
                    Some(reporter) => {
                        let pending = std::mem::take(&mut self.pending);
                        tokio::spawn(forward_late(pending, self.kind, self.key.clone(), reporter));
                    }
                    None => self.pending.detach_all(),
                }
                Err(GatewayError::WriteTimeout {
                    key: self.key,
                    timeout: limit.unwrap_or_default(),
                    outstanding,
                    issued: self.issued,
                })
            }
        }
    }
}

async fn drain(
    pending: &mut JoinSet<Result<(), WriteFailure>>,
    kind: RecordKind,
    key: &ExchangeSymbol,
) -> (usize, Vec<WriteFailure>) {
    let mut succeeded = 0;
    let mut failures = Vec::new();

    while let Some(joined) = pending.join_next().await {
        match joined {
            Ok(Ok(())) => succeeded += 1,
            Ok(Err(failure)) => failures.push(failure),
            Err(join_error) => failures.push(WriteFailure {
                kind,
                target: WriteTarget::Unknown { key: key.clone() },
                error: WriteError::Aborted {
                    message: join_error.to_string(),
                },
                attempts: 1,
            }),
        }
    }

    (succeeded, failures)
}

async fn forward_late(
    mut pending: JoinSet<Result<(), WriteFailure>>,
    kind: RecordKind,
    key: ExchangeSymbol,
    reporter: FailureReporter,
) {
    let (_, failures) = drain(&mut pending, kind, &key).await;
    for failure in failures {
        tracing::warn!(error = %failure, "Write failed after its batch timed out");
        metrics::record_write_failure(kind);
        reporter.report(failure);
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Tunables for the gateway.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatewaySettings {
    /// Completion timeout per batch; `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
    /// Retry policy for individual writes.
    pub retry: WriteRetryPolicy,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            write_timeout: Some(Duration::from_secs(60)),
            retry: WriteRetryPolicy::default(),
        }
    }
}

/// Translates batches into store writes and tracks their completion.
#[derive(Debug)]
pub struct StoreGateway<S> {
    store: Arc<S>,
    throughput: Arc<ThroughputCounter>,
    settings: GatewaySettings,
}

impl<S: ReferenceStorePort> StoreGateway<S> {
    /// Create a gateway over `store` with its own throughput counter.
    #[must_use]
    pub fn new(store: Arc<S>, settings: GatewaySettings) -> Self {
        Self {
            store,
            throughput: Arc::new(ThroughputCounter::new()),
            settings,
        }
    }

    /// Issued price bar writes so far.
    #[must_use]
    pub fn throughput(&self) -> &ThroughputCounter {
        &self.throughput
    }

    /// Issue one write per price bar plus the metadata upsert for the batch.
    ///
    /// The throughput counter advances by the batch size immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn submit_price_bars(&self, batch: SymbolBatch<PriceBar>) -> SubmissionHandle {
        let metadata = batch.metadata();
        let count = batch.len() as u64;

        let mut handle = SubmissionHandle::new(RecordKind::PriceBar, batch.key());
        for bar in batch.into_records() {
            self.spawn_write(&mut handle, WriteOp::PriceBar(bar));
        }
        self.spawn_write(&mut handle, WriteOp::Metadata(metadata));

        self.throughput.add(count);
        metrics::record_records_written(RecordKind::PriceBar, count);
        handle
    }

    /// Issue one write per dividend. Dividends carry no metadata row.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn submit_dividends(&self, batch: SymbolBatch<DividendEvent>) -> SubmissionHandle {
        let count = batch.len() as u64;

        let mut handle = SubmissionHandle::new(RecordKind::Dividend, batch.key());
        for dividend in batch.into_records() {
            self.spawn_write(&mut handle, WriteOp::Dividend(dividend));
        }

        metrics::record_records_written(RecordKind::Dividend, count);
        handle
    }

    /// Wait for a submission using the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::WriteTimeout`] if the timeout elapses first.
    pub async fn await_submission(
        &self,
        handle: SubmissionHandle,
    ) -> Result<SubmissionReport, GatewayError> {
        handle.wait(self.settings.write_timeout).await
    }

    /// Stream every stored price bar.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Store`] if the query cannot be started.
    pub async fn scan_all(&self, page_size: i32) -> Result<PriceBarStream, GatewayError> {
        Ok(self.store.scan_price_bars(page_size).await?)
    }

    /// Stream the stored price bars of one instrument.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Store`] if the query cannot be started.
    pub async fn lookup(&self, key: &ExchangeSymbol) -> Result<PriceBarStream, GatewayError> {
        Ok(self.store.price_bars_for(key).await?)
    }

    fn spawn_write(&self, handle: &mut SubmissionHandle, op: WriteOp) {
        let store = Arc::clone(&self.store);
        let policy = self.settings.retry;
        let kind = handle.kind;
        handle
            .pending
            .spawn(async move { write_with_retry(store.as_ref(), op, kind, &policy).await });
        handle.issued += 1;
    }
}

/// Submission side of the gateway, per record type.
#[async_trait]
pub trait BatchSubmitter<T: SymbolRecord>: Send + Sync + 'static {
    /// Issue every write for the batch.
    fn submit(&self, batch: SymbolBatch<T>) -> SubmissionHandle;

    /// Wait for a handle returned by [`submit`](Self::submit).
    async fn complete(&self, handle: SubmissionHandle) -> Result<SubmissionReport, GatewayError>;
}

#[async_trait]
impl<S: ReferenceStorePort> BatchSubmitter<PriceBar> for StoreGateway<S> {
    fn submit(&self, batch: SymbolBatch<PriceBar>) -> SubmissionHandle {
        self.submit_price_bars(batch)
    }

    async fn complete(&self, handle: SubmissionHandle) -> Result<SubmissionReport, GatewayError> {
        self.await_submission(handle).await
    }
}

#[async_trait]
impl<S: ReferenceStorePort> BatchSubmitter<DividendEvent> for StoreGateway<S> {
    fn submit(&self, batch: SymbolBatch<DividendEvent>) -> SubmissionHandle {
        self.submit_dividends(batch)
    }

    async fn complete(&self, handle: SubmissionHandle) -> Result<SubmissionReport, GatewayError> {
        self.await_submission(handle).await
    }
}

// =============================================================================
// Individual Writes
// =============================================================================

#[derive(Debug)]
enum WriteOp {
    PriceBar(PriceBar),
    Dividend(DividendEvent),
    Metadata(SymbolMetadata),
}

impl WriteOp {
    async fn apply<S: ReferenceStorePort>(&self, store: &S) -> Result<(), WriteError> {
        match self {
            Self::PriceBar(bar) => store.insert_price_bar(bar).await,
            Self::Dividend(dividend) => store.insert_dividend(dividend).await,
            Self::Metadata(metadata) => store.upsert_metadata(metadata).await,
        }
    }

    fn target(&self) -> WriteTarget {
        match self {
            Self::PriceBar(bar) => WriteTarget::Record {
                key: bar.key(),
                date: bar.date,
            },
            Self::Dividend(dividend) => WriteTarget::Record {
                key: dividend.key(),
                date: dividend.date,
            },
            Self::Metadata(metadata) => WriteTarget::Metadata {
                key: metadata.key(),
            },
        }
    }
}

async fn write_with_retry<S: ReferenceStorePort>(
    store: &S,
    op: WriteOp,
    kind: RecordKind,
    policy: &WriteRetryPolicy,
) -> Result<(), WriteFailure> {
    let mut backoff = ExponentialBackoff::new(policy);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let error = match op.apply(store).await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        let delay = if error.is_retryable() {
            backoff.next_backoff()
        } else {
            None
        };

        let Some(delay) = delay else {
            return Err(WriteFailure {
                kind,
                target: op.target(),
                error,
                attempts,
            });
        };

        tracing::debug!(
            target_row = %op.target(),
            attempt = attempts,
            delay_ms = delay.as_millis(),
            error = %error,
            "Retrying store write"
        );
        tokio::time::sleep(delay).await;
    }
}
