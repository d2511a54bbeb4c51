//! CSV Record Files
//!
//! Reads price and dividend flat files. Each file has one header line
//! followed by comma-separated rows in a fixed column order:
//!
//! | File | Columns |
//! |------|---------|
//! | `*daily_prices*` | exchange, symbol, date, open, high, low, close, volume, adj_close |
//! | `*dividends*` | exchange, symbol, date, dividend |
//!
//! Columns are matched by position, not by header name. Dates are
//! `YYYY-MM-DD`. Fields are trimmed before parsing.

mod discovery;

use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub use discovery::{FileKind, classify, discover_files};

use crate::application::ports::{FileAccessError, ParseError, RecordFileSource};
use crate::domain::reference_data::{DividendEvent, PriceBar};

const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// Row Decoding
// =============================================================================

/// A record type that can be decoded from one CSV row.
pub trait CsvRecord: Sized + Send + 'static {
    /// Decode `record`, found on `line`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for a bad date or a malformed row.
    fn from_csv(record: &StringRecord, line: u64) -> Result<Self, ParseError>;
}

#[derive(Debug, Deserialize)]
struct PriceRow {
    exchange: String,
    symbol: String,
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i32,
    adj_close: f64,
}

#[derive(Debug, Deserialize)]
struct DividendRow {
    exchange: String,
    symbol: String,
    date: String,
    dividend: f64,
}

impl CsvRecord for PriceBar {
    fn from_csv(record: &StringRecord, line: u64) -> Result<Self, ParseError> {
        let row: PriceRow = decode(record, line, 9)?;
        Ok(Self {
            date: parse_date(&row.date, record, line)?,
            exchange: row.exchange,
            symbol: row.symbol,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            adj_close: row.adj_close,
        })
    }
}

impl CsvRecord for DividendEvent {
    fn from_csv(record: &StringRecord, line: u64) -> Result<Self, ParseError> {
        let row: DividendRow = decode(record, line, 4)?;
        Ok(Self {
            date: parse_date(&row.date, record, line)?,
            exchange: row.exchange,
            symbol: row.symbol,
            amount: row.dividend,
        })
    }
}

fn decode<R: DeserializeOwned>(
    record: &StringRecord,
    line: u64,
    columns: usize,
) -> Result<R, ParseError> {
    if record.len() != columns {
        return Err(ParseError::Malformed {
            line,
            message: format!("expected {columns} columns, found {}", record.len()),
            raw: raw_row(record),
        });
    }

    record.deserialize(None).map_err(|e| ParseError::Malformed {
        line,
        message: e.to_string(),
        raw: raw_row(record),
    })
}

fn parse_date(value: &str, record: &StringRecord, line: u64) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| ParseError::InvalidDate {
        line,
        value: value.to_string(),
        raw: raw_row(record),
    })
}

fn raw_row(record: &StringRecord) -> String {
    record.iter().collect::<Vec<_>>().join(",")
}

// =============================================================================
// File Source
// =============================================================================

/// Opens CSV files and yields decoded records.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvRecordSource;

impl CsvRecordSource {
    /// Create a source.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<T: CsvRecord> RecordFileSource<T> for CsvRecordSource {
    type Rows = CsvRows<T>;

    fn open(&self, path: &Path) -> Result<Self::Rows, FileAccessError> {
        let reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_path(path)
            .map_err(|e| FileAccessError::new(path, e.to_string()))?;

        Ok(CsvRows {
            records: reader.into_records(),
            finished: false,
            _record: PhantomData,
        })
    }
}

/// Rows of one open file. Stops after the first I/O error.
pub struct CsvRows<T> {
    records: StringRecordsIntoIter<File>,
    finished: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for CsvRows<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvRows")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<T: CsvRecord> Iterator for CsvRows<T> {
    type Item = Result<T, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map_or(0, csv::Position::line);
                if e.is_io_error() {
                    self.finished = true;
                }
                return Some(Err(ParseError::Malformed {
                    line,
                    message: e.to_string(),
                    raw: String::new(),
                }));
            }
        };

        let line = record.position().map_or(0, csv::Position::line);
        Some(T::from_csv(&record, line))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    fn read_dividends(path: &Path) -> Vec<Result<DividendEvent, ParseError>> {
        RecordFileSource::<DividendEvent>::open(&CsvRecordSource::new(), path)
            .unwrap()
            .collect()
    }

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn decodes_price_row() {
        let bar = PriceBar::from_csv(
            &record(&["NYSE", "ACME", "2020-01-02", "10", "11", "9.5", "10.5", "1000", "10.4"]),
            2,
        )
        .unwrap();
        assert_eq!(bar.symbol, "ACME");
        assert_eq!(bar.date, NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(bar.volume, 1000);
        assert!((bar.adj_close - 10.4).abs() < f64::EPSILON);
    }

    #[test]
    fn decodes_dividend_row() {
        let dividend =
            DividendEvent::from_csv(&record(&["NYSE", "ACME", "2020-03-02", "0.25"]), 2).unwrap();
        assert!((dividend.amount - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_date_is_reported_with_line_and_raw() {
        let err = DividendEvent::from_csv(&record(&["NYSE", "ACME", "2020-13-45", "0.25"]), 7)
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidDate {
                line: 7,
                value: "2020-13-45".to_string(),
                raw: "NYSE,ACME,2020-13-45,0.25".to_string(),
            }
        );
    }

    #[test]
    fn wrong_column_count_is_malformed() {
        let err = DividendEvent::from_csv(&record(&["NYSE", "ACME", "2020-03-02"]), 4).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { line: 4, .. }));
    }

    #[test]
    fn non_numeric_value_is_malformed() {
        let err = PriceBar::from_csv(
            &record(&["NYSE", "ACME", "2020-01-02", "x", "11", "9", "10", "1", "10"]),
            3,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }

    #[test]
    fn reads_file_skipping_header_and_trimming() {
        let file = write_file(
            "exchange,symbol,date,dividend\n\
             NYSE, ACME ,2020-03-02,0.25\n\
             NYSE,ACME,bad-date,0.30\n\
             NYSE,WIDGE,2020-03-03, 0.10\n",
        );

        let rows = read_dividends(file.path());

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].as_ref().unwrap().symbol, "ACME");
        assert_eq!(rows[1].as_ref().unwrap_err().line(), 3);
        assert_eq!(rows[2].as_ref().unwrap().symbol, "WIDGE");
    }

    #[test]
    fn missing_file_is_file_access_error() {
        let err = RecordFileSource::<PriceBar>::open(
            &CsvRecordSource::new(),
            Path::new("/nonexistent/daily_prices.csv"),
        )
        .unwrap_err();
        assert_eq!(err.path, Path::new("/nonexistent/daily_prices.csv"));
    }

    #[test]
    fn header_only_file_has_no_rows() {
        let file = write_file("exchange,symbol,date,dividend\n");
        assert!(read_dividends(file.path()).is_empty());
    }
}
