//! In-Memory Reference Store
//!
//! A `ReferenceStorePort` backed by ordered maps. Used for dry runs
//! (`REFDATA_STORE_BACKEND=memory`) and as the store in tests.
//!
//! Writes keep the store's upsert semantics: a second write with the same
//! primary key replaces the first, and metadata is last-writer-wins.
//!
//! # Fault Injection
//!
//! - [`pause_writes`](InMemoryReferenceStore::pause_writes) holds every write
//!   until [`resume_writes`](InMemoryReferenceStore::resume_writes)
//! - [`fail_next_writes`](InMemoryReferenceStore::fail_next_writes) answers
//!   the next writes with a transport error
//! - [`reject_symbol`](InMemoryReferenceStore::reject_symbol) rejects every
//!   write for one symbol

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::application::ports::{
    PriceBarStream, ReferenceStorePort, StoreError, WriteError,
};
use crate::domain::reference_data::{
    DividendEvent, ExchangeSymbol, PriceBar, SymbolMetadata, SymbolRecord,
};

type RowKey = (ExchangeSymbol, NaiveDate);

#[derive(Debug, Default)]
struct Tables {
    historic_data: BTreeMap<RowKey, PriceBar>,
    dividends: BTreeMap<RowKey, DividendEvent>,
    exchange_metadata: BTreeMap<ExchangeSymbol, SymbolMetadata>,
}

/// Thread-safe in-process store.
#[derive(Debug)]
pub struct InMemoryReferenceStore {
    tables: RwLock<Tables>,
    write_latency: Option<Duration>,
    paused: watch::Sender<bool>,
    transient_failures: AtomicU32,
    rejected_symbols: RwLock<HashSet<String>>,
    write_attempts: AtomicU64,
}

impl Default for InMemoryReferenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReferenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            write_latency: None,
            paused: watch::Sender::new(false),
            transient_failures: AtomicU32::new(0),
            rejected_symbols: RwLock::new(HashSet::new()),
            write_attempts: AtomicU64::new(0),
        }
    }

    /// Delay every write by `latency`.
    #[must_use]
    pub const fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = Some(latency);
        self
    }

    /// Hold every write until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.paused.send_replace(true);
    }

    /// Release held writes.
    pub fn resume_writes(&self) {
        self.paused.send_replace(false);
    }

    /// Answer the next `count` writes with a transport error.
    pub fn fail_next_writes(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Reject every write for `symbol`.
    pub fn reject_symbol(&self, symbol: impl Into<String>) {
        self.rejected_symbols.write().insert(symbol.into());
    }

    /// Write attempts seen so far, failed ones included.
    #[must_use]
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Stored price bars ordered by `(exchange, symbol, date)`.
    #[must_use]
    pub fn price_bars(&self) -> Vec<PriceBar> {
        self.tables.read().historic_data.values().cloned().collect()
    }

    /// Stored dividends ordered by `(exchange, symbol, date)`.
    #[must_use]
    pub fn dividends(&self) -> Vec<DividendEvent> {
        self.tables.read().dividends.values().cloned().collect()
    }

    /// Metadata row for one instrument.
    #[must_use]
    pub fn metadata(&self, key: &ExchangeSymbol) -> Option<SymbolMetadata> {
        self.tables.read().exchange_metadata.get(key).cloned()
    }

    /// Every metadata row ordered by key.
    #[must_use]
    pub fn all_metadata(&self) -> Vec<SymbolMetadata> {
        self.tables.read().exchange_metadata.values().cloned().collect()
    }

    async fn admit(&self, symbol: &str) -> Result<(), WriteError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        let mut paused = self.paused.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = paused.wait_for(|held| !*held).await;

        if let Some(latency) = self.write_latency {
            tokio::time::sleep(latency).await;
        }

        if self.rejected_symbols.read().contains(symbol) {
            return Err(WriteError::Rejected {
                message: format!("writes for {symbol} are rejected"),
            });
        }

        let took_failure = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took_failure {
            return Err(WriteError::Transport {
                message: "injected transport failure".to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ReferenceStorePort for InMemoryReferenceStore {
    async fn insert_price_bar(&self, bar: &PriceBar) -> Result<(), WriteError> {
        self.admit(&bar.symbol).await?;
        self.tables
            .write()
            .historic_data
            .insert((bar.key(), bar.date), bar.clone());
        Ok(())
    }

    async fn insert_dividend(&self, dividend: &DividendEvent) -> Result<(), WriteError> {
        self.admit(&dividend.symbol).await?;
        self.tables
            .write()
            .dividends
            .insert((dividend.key(), dividend.date), dividend.clone());
        Ok(())
    }

    async fn upsert_metadata(&self, metadata: &SymbolMetadata) -> Result<(), WriteError> {
        self.admit(&metadata.symbol).await?;
        self.tables
            .write()
            .exchange_metadata
            .insert(metadata.key(), metadata.clone());
        Ok(())
    }

    async fn scan_price_bars(&self, page_size: i32) -> Result<PriceBarStream, StoreError> {
        if page_size <= 0 {
            return Err(StoreError::Read {
                message: format!("page size must be positive, got {page_size}"),
            });
        }
        Ok(futures::stream::iter(self.price_bars().into_iter().map(Ok)).boxed())
    }

    async fn price_bars_for(&self, key: &ExchangeSymbol) -> Result<PriceBarStream, StoreError> {
        let rows: Vec<PriceBar> = self
            .tables
            .read()
            .historic_data
            .range((key.clone(), NaiveDate::MIN)..=(key.clone(), NaiveDate::MAX))
            .map(|(_, bar)| bar.clone())
            .collect();
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}
