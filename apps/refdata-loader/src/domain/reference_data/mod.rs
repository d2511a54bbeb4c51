//! Reference Data Types
//!
//! Immutable records loaded from flat files: daily price bars and dividend
//! events, plus the per-symbol metadata derived from them.
//!
//! Every record is keyed by `(exchange, symbol, date)`. The pipeline only
//! relies on the `(exchange, symbol)` part for batching; the date is used to
//! derive the "last updated" metadata.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// =============================================================================
// Keys
// =============================================================================

/// Partition key shared by every record of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeSymbol {
    /// Listing exchange (e.g. "NYSE").
    pub exchange: String,
    /// Ticker symbol (e.g. "ACME").
    pub symbol: String,
}

impl ExchangeSymbol {
    /// Create a new key.
    #[must_use]
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for ExchangeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.exchange, self.symbol)
    }
}

/// A record that belongs to one `(exchange, symbol)` partition on one date.
pub trait SymbolRecord: Send + Sync + 'static {
    /// Listing exchange.
    fn exchange(&self) -> &str;

    /// Ticker symbol.
    fn symbol(&self) -> &str;

    /// Trading date of the record.
    fn date(&self) -> NaiveDate;

    /// Whether two records share the same `(exchange, symbol)` partition.
    fn same_partition(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        self.exchange() == other.exchange() && self.symbol() == other.symbol()
    }

    /// Owned partition key.
    fn key(&self) -> ExchangeSymbol {
        ExchangeSymbol::new(self.exchange(), self.symbol())
    }
}

// =============================================================================
// Price Bars
// =============================================================================

/// One daily OHLCV bar with split/dividend adjusted close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Listing exchange.
    pub exchange: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Trading date.
    pub date: NaiveDate,
    /// Opening price.
    pub open: f64,
    /// Session high.
    pub high: f64,
    /// Session low.
    pub low: f64,
    /// Closing price.
    pub close: f64,
    /// Shares traded. Matches the store's 32-bit `int` column.
    pub volume: i32,
    /// Adjusted closing price.
    pub adj_close: f64,
}

impl SymbolRecord for PriceBar {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}

// =============================================================================
// Dividends
// =============================================================================

/// A cash dividend paid on a given date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DividendEvent {
    /// Listing exchange.
    pub exchange: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Ex-dividend date.
    pub date: NaiveDate,
    /// Dividend per share.
    pub amount: f64,
}

impl SymbolRecord for DividendEvent {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn date(&self) -> NaiveDate {
        self.date
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Most recent date loaded for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    /// Listing exchange.
    pub exchange: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Latest date present in the batch that produced this metadata.
    pub last_updated_date: NaiveDate,
}

impl SymbolMetadata {
    /// Derive metadata from the record carrying the latest date.
    #[must_use]
    pub fn from_record<T: SymbolRecord>(record: &T) -> Self {
        Self {
            exchange: record.exchange().to_string(),
            symbol: record.symbol().to_string(),
            last_updated_date: record.date(),
        }
    }

    /// Partition key of this metadata row.
    #[must_use]
    pub fn key(&self) -> ExchangeSymbol {
        ExchangeSymbol::new(self.exchange.clone(), self.symbol.clone())
    }
}

// =============================================================================
// Record Kind
// =============================================================================

/// Which pipeline a record or file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Daily price bars.
    PriceBar,
    /// Dividend events.
    Dividend,
}

impl RecordKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceBar => "price_bar",
            Self::Dividend => "dividend",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(exchange: &str, symbol: &str, date: &str) -> PriceBar {
        PriceBar {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 100,
            adj_close: 1.0,
        }
    }

    #[test]
    fn same_partition_requires_exchange_and_symbol() {
        let a = bar("NYSE", "ACME", "2020-01-01");
        let b = bar("NYSE", "ACME", "2020-01-02");
        let c = bar("NASDAQ", "ACME", "2020-01-01");
        let d = bar("NYSE", "WIDGE", "2020-01-01");

        assert!(a.same_partition(&b));
        assert!(!a.same_partition(&c));
        assert!(!a.same_partition(&d));
    }

    #[test]
    fn metadata_from_record() {
        let meta = SymbolMetadata::from_record(&bar("NYSE", "ACME", "2020-01-02"));
        assert_eq!(meta.exchange, "NYSE");
        assert_eq!(meta.symbol, "ACME");
        assert_eq!(meta.last_updated_date.to_string(), "2020-01-02");
        assert_eq!(meta.key(), ExchangeSymbol::new("NYSE", "ACME"));
    }

    #[test]
    fn exchange_symbol_display() {
        assert_eq!(ExchangeSymbol::new("NYSE", "ACME").to_string(), "NYSE-ACME");
    }

    #[test]
    fn record_kind_labels() {
        assert_eq!(RecordKind::PriceBar.as_str(), "price_bar");
        assert_eq!(RecordKind::Dividend.to_string(), "dividend");
    }
}
