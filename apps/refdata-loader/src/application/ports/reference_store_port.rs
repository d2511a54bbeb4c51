//! Reference Store Port
//!
//! Asynchronous single-row writes plus streaming reads. Every write is an
//! idempotent upsert keyed by the table's primary key, so retrying a write
//! that may already have landed is safe.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::reference_data::{DividendEvent, ExchangeSymbol, PriceBar, SymbolMetadata};

/// Stream of price bars read back from the store.
pub type PriceBarStream = BoxStream<'static, Result<PriceBar, StoreError>>;

/// A single write that the store did not acknowledge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Connection or coordinator failure; the write may succeed on retry.
    #[error("store transport error: {message}")]
    Transport {
        /// Driver error details.
        message: String,
    },

    /// The coordinator timed out waiting for replicas.
    #[error("store write timed out: {message}")]
    Timeout {
        /// Driver error details.
        message: String,
    },

    /// The statement was rejected (bad schema, bad value, auth).
    #[error("store rejected write: {message}")]
    Rejected {
        /// Driver error details.
        message: String,
    },

    /// The task driving the write panicked or was aborted.
    #[error("write task aborted: {message}")]
    Aborted {
        /// Runtime error details.
        message: String,
    },
}

impl WriteError {
    /// Whether the same write is worth attempting again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

/// Store-level failures outside of individual writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached at startup.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Connection error details.
        message: String,
    },

    /// A read query failed.
    #[error("store read failed: {message}")]
    Read {
        /// Driver error details.
        message: String,
    },
}

/// Port for the replicated reference data store.
#[async_trait]
pub trait ReferenceStorePort: Send + Sync + 'static {
    /// Upsert one row into `historic_data`.
    async fn insert_price_bar(&self, bar: &PriceBar) -> Result<(), WriteError>;

    /// Upsert one row into `dividends`.
    async fn insert_dividend(&self, dividend: &DividendEvent) -> Result<(), WriteError>;

    /// Upsert the last-updated row for one instrument.
    async fn upsert_metadata(&self, metadata: &SymbolMetadata) -> Result<(), WriteError>;

    /// Stream every stored price bar, fetching `page_size` rows at a time.
    async fn scan_price_bars(&self, page_size: i32) -> Result<PriceBarStream, StoreError>;

    /// Stream all price bars stored for one instrument.
    async fn price_bars_for(&self, key: &ExchangeSymbol) -> Result<PriceBarStream, StoreError>;
}
