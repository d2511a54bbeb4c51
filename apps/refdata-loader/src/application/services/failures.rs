//! Write Failure Reporting
//!
//! Writers forward every unacknowledged write to a single collector, which
//! keeps per-kind totals and a bounded sample for the final summary. The
//! channel is unbounded so reporting never blocks a writer.

use tokio::sync::mpsc;

use crate::application::services::gateway::WriteFailure;
use crate::domain::reference_data::RecordKind;

/// Failures kept verbatim for the final summary.
const SAMPLE_LIMIT: usize = 20;

/// Create a reporter and the collector that drains it.
#[must_use]
pub fn failure_channel() -> (FailureReporter, FailureCollector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FailureReporter { tx }, FailureCollector { rx })
}

/// Cloneable sending side, one per writer.
#[derive(Debug, Clone)]
pub struct FailureReporter {
    tx: mpsc::UnboundedSender<WriteFailure>,
}

impl FailureReporter {
    /// Forward a failure. Dropped silently if the collector is gone.
    pub fn report(&self, failure: WriteFailure) {
        let _ = self.tx.send(failure);
    }
}

/// Receiving side; finishes once every reporter is dropped.
#[derive(Debug)]
pub struct FailureCollector {
    rx: mpsc::UnboundedReceiver<WriteFailure>,
}

impl FailureCollector {
    /// Drain until every reporter has been dropped.
    pub async fn collect(mut self) -> FailureSummary {
        let mut summary = FailureSummary::default();
        while let Some(failure) = self.rx.recv().await {
            summary.record(failure);
        }
        summary
    }
}

/// Totals of unacknowledged writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSummary {
    /// Failed price bar and price metadata writes.
    pub price_bars: u64,
    /// Failed dividend writes.
    pub dividends: u64,
    /// The first failures seen, up to a fixed limit.
    pub sample: Vec<WriteFailure>,
}

impl FailureSummary {
    /// All failed writes.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.price_bars + self.dividends
    }

    fn record(&mut self, failure: WriteFailure) {
        match failure.kind {
            RecordKind::PriceBar => self.price_bars += 1,
            RecordKind::Dividend => self.dividends += 1,
        }
        if self.sample.len() < SAMPLE_LIMIT {
            self.sample.push(failure);
        }
    }
}
