//! Per-Symbol Batching
//!
//! Groups a symbol-contiguous record stream into [`SymbolBatch`]es, the unit
//! of submission to the store.
//!
//! # Boundaries
//!
//! A batch is closed when a record for a different `(exchange, symbol)`
//! arrives, or when the input ends. Input that interleaves symbols produces
//! one batch per contiguous run rather than merging them.
//!
//! ```text
//! ACME ACME ACME WIDGE WIDGE ACME
//! └──── #1 ────┘ └── #2 ───┘ └#3┘
//! ```

use thiserror::Error;

use crate::domain::reference_data::{ExchangeSymbol, SymbolMetadata, SymbolRecord};

/// Errors from constructing a batch out of arbitrary records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// No records were supplied.
    #[error("batch must contain at least one record")]
    Empty,

    /// A record belongs to a different partition than the first one.
    #[error("record for {found} does not belong to batch for {expected}")]
    MixedPartition {
        /// Partition of the first record.
        expected: ExchangeSymbol,
        /// Partition of the offending record.
        found: ExchangeSymbol,
    },
}

// =============================================================================
// Symbol Batch
// =============================================================================

/// A non-empty run of records that all share one `(exchange, symbol)`.
///
/// Records keep their input order; no date ordering is implied.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolBatch<T> {
    records: Vec<T>,
}

impl<T: SymbolRecord> SymbolBatch<T> {
    /// Build a batch, checking that it is non-empty and homogeneous.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Empty`] for no records and
    /// [`BatchError::MixedPartition`] when partitions differ.
    pub fn new(records: Vec<T>) -> Result<Self, BatchError> {
        let Some(first) = records.first() else {
            return Err(BatchError::Empty);
        };

        if let Some(stray) = records.iter().find(|r| !first.same_partition(r)) {
            return Err(BatchError::MixedPartition {
                expected: first.key(),
                found: stray.key(),
            });
        }

        Ok(Self { records })
    }

    /// Callers guarantee `records` is non-empty and homogeneous.
    fn from_run(records: Vec<T>) -> Self {
        debug_assert!(!records.is_empty());
        Self { records }
    }

    /// Shared partition key.
    #[must_use]
    pub fn key(&self) -> ExchangeSymbol {
        self.first().key()
    }

    /// Listing exchange of every record in the batch.
    #[must_use]
    pub fn exchange(&self) -> &str {
        self.first().exchange()
    }

    /// Ticker symbol of every record in the batch.
    #[must_use]
    pub fn symbol(&self) -> &str {
        self.first().symbol()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always `false`; present for API symmetry with collections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in input order.
    #[must_use]
    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Consume the batch, returning its records.
    #[must_use]
    pub fn into_records(self) -> Vec<T> {
        self.records
    }

    /// Record with the latest date. Ties keep the first occurrence.
    #[must_use]
    pub fn latest(&self) -> &T {
        self.records
            .iter()
            .skip(1)
            .fold(self.first(), |best, r| if r.date() > best.date() { r } else { best })
    }

    /// Metadata row derived from the latest record.
    #[must_use]
    pub fn metadata(&self) -> SymbolMetadata {
        SymbolMetadata::from_record(self.latest())
    }

    fn first(&self) -> &T {
        &self.records[0]
    }
}

// =============================================================================
// Batch Accumulator
// =============================================================================

/// Incrementally cuts a record stream into per-symbol batches.
///
/// Feed records with [`push`](Self::push); each call returns the batch that
/// was closed by that record, if any. Call [`finish`](Self::finish) at end of
/// input to flush the trailing run.
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    buffer: Vec<T>,
    emitted: usize,
}

impl<T> Default for BatchAccumulator<T> {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            emitted: 0,
        }
    }
}

impl<T: SymbolRecord> BatchAccumulator<T> {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, returning the previous run if this record starts a new one.
    pub fn push(&mut self, record: T) -> Option<SymbolBatch<T>> {
        let starts_new_run = self
            .buffer
            .last()
            .is_some_and(|last| !last.same_partition(&record));
        let closed = starts_new_run.then(|| self.take_run());
        self.buffer.push(record);
        closed
    }

    /// Flush the trailing run, if any records are buffered.
    pub fn finish(&mut self) -> Option<SymbolBatch<T>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take_run())
        }
    }

    /// Number of records waiting in the current run.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of batches emitted so far.
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }

    fn take_run(&mut self) -> SymbolBatch<T> {
        self.emitted += 1;
        SymbolBatch::from_run(std::mem::take(&mut self.buffer))
    }
}

/// Cut a whole record sequence into batches.
pub fn batch_records<T, I>(records: I) -> Vec<SymbolBatch<T>>
where
    T: SymbolRecord,
    I: IntoIterator<Item = T>,
{
    let mut accumulator = BatchAccumulator::new();
    let mut batches: Vec<SymbolBatch<T>> = records
        .into_iter()
        .filter_map(|record| accumulator.push(record))
        .collect();
    batches.extend(accumulator.finish());
    batches
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;
    use crate::domain::reference_data::PriceBar;

    fn bar(symbol: &str, day: u32) -> PriceBar {
        PriceBar {
            exchange: "NYSE".to_string(),
            symbol: symbol.to_string(),
            date: NaiveDate::from_ymd_opt(2020, 1, day).unwrap(),
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 1000,
            adj_close: 10.5,
        }
    }

    #[test]
    fn splits_on_symbol_change() {
        let batches = batch_records(vec![bar("ACME", 1), bar("ACME", 2), bar("WIDGE", 1)]);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].symbol(), "ACME");
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].symbol(), "WIDGE");
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn splits_on_exchange_change() {
        let mut other = bar("ACME", 2);
        other.exchange = "NASDAQ".to_string();

        let batches = batch_records(vec![bar("ACME", 1), other]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].exchange(), "NASDAQ");
    }

    #[test]
    fn empty_input_produces_no_batches() {
        let batches = batch_records(Vec::<PriceBar>::new());
        assert!(batches.is_empty());
    }

    #[test]
    fn single_record_produces_one_batch() {
        let batches = batch_records(vec![bar("ACME", 7)]);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].metadata().last_updated_date.to_string(), "2020-01-07");
    }

    #[test]
    fn interleaved_symbols_fragment_per_run() {
        let batches = batch_records(vec![bar("ACME", 1), bar("WIDGE", 1), bar("ACME", 2)]);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].symbol(), "ACME");
    }

    #[test]
    fn push_returns_closed_run() {
        let mut acc = BatchAccumulator::new();
        assert!(acc.push(bar("ACME", 1)).is_none());
        assert!(acc.push(bar("ACME", 2)).is_none());
        assert_eq!(acc.buffered(), 2);

        let closed = acc.push(bar("WIDGE", 1)).unwrap();
        assert_eq!(closed.len(), 2);
        assert_eq!(acc.buffered(), 1);
        assert_eq!(acc.emitted(), 1);

        let tail = acc.finish().unwrap();
        assert_eq!(tail.symbol(), "WIDGE");
        assert!(acc.finish().is_none());
        assert_eq!(acc.emitted(), 2);
    }

    #[test]
    fn latest_uses_max_date_not_position() {
        let batch = SymbolBatch::new(vec![bar("ACME", 5), bar("ACME", 9), bar("ACME", 2)]).unwrap();
        assert_eq!(batch.latest().date.to_string(), "2020-01-09");
        assert_eq!(batch.metadata().symbol, "ACME");
    }

    #[test]
    fn new_rejects_empty() {
        assert_eq!(SymbolBatch::<PriceBar>::new(vec![]), Err(BatchError::Empty));
    }

    #[test]
    fn new_rejects_mixed_partitions() {
        let err = SymbolBatch::new(vec![bar("ACME", 1), bar("WIDGE", 1)]).unwrap_err();
        assert!(matches!(err, BatchError::MixedPartition { .. }));
        assert!(err.to_string().contains("NYSE-WIDGE"));
    }

    fn runs_strategy() -> impl Strategy<Value = Vec<(String, usize)>> {
        prop::collection::vec(("[A-E]{1,3}", 1usize..6), 0..20)
    }

    proptest! {
        #[test]
        fn batches_partition_contiguous_runs(runs in runs_strategy()) {
            // Merge adjacent runs with equal symbols; those form a single run.
            let mut merged: Vec<(String, usize)> = Vec::new();
            for (symbol, len) in runs {
                match merged.last_mut() {
                    Some((last, n)) if *last == symbol => *n += len,
                    _ => merged.push((symbol, len)),
                }
            }

            let records: Vec<PriceBar> = merged
                .iter()
                .flat_map(|(symbol, len)| (0..*len).map(move |d| bar(symbol, (d % 28) as u32 + 1)))
                .collect();
            let total = records.len();

            let batches = batch_records(records);

            prop_assert_eq!(batches.len(), merged.len());
            prop_assert_eq!(batches.iter().map(SymbolBatch::len).sum::<usize>(), total);
            for (batch, (symbol, len)) in batches.iter().zip(&merged) {
                prop_assert_eq!(batch.symbol(), symbol.as_str());
                prop_assert_eq!(batch.len(), *len);
                prop_assert!(batch.records().iter().all(|r| r.symbol == *symbol));
            }
        }
    }
}
