//! CQL Store Adapter
//!
//! `ReferenceStorePort` over a Cassandra-compatible cluster using the
//! `scylla` driver. All writes are prepared once at connect time, run at
//! consistency ONE and are marked idempotent so the driver may retry them
//! on another node.
//!
//! # Tables
//!
//! | Table | Primary key | Written by |
//! |-------|-------------|------------|
//! | `historic_data` | `((exchange, symbol), date)` | price bar batches |
//! | `dividends` | `((exchange, symbol), date)` | dividend batches |
//! | `exchange_metadata` | `((exchange, symbol))` | price bar batches |
//!
//! The schema itself is not created here; see `schema/refdata.cql`.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use scylla::client::pager::QueryPager;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::errors::{DbError, ExecutionError, RequestAttemptError};
use scylla::statement::Consistency;
use scylla::statement::prepared::PreparedStatement;
use scylla::statement::unprepared::Statement;

use crate::application::ports::{PriceBarStream, ReferenceStorePort, StoreError, WriteError};
use crate::domain::reference_data::{DividendEvent, ExchangeSymbol, PriceBar, SymbolMetadata};
use crate::infrastructure::config::StoreSettings;

const PRICE_COLUMNS: &str = "exchange, symbol, date, open, high, low, close, volume, adj_close";

type PriceBarRow = (String, String, NaiveDate, f64, f64, f64, f64, i32, f64);

fn bar_from_row(row: PriceBarRow) -> PriceBar {
    let (exchange, symbol, date, open, high, low, close, volume, adj_close) = row;
    PriceBar {
        exchange,
        symbol,
        date,
        open,
        high,
        low,
        close,
        volume,
        adj_close,
    }
}

/// CQL text for every statement the adapter uses, qualified by keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Statements {
    insert_price_bar: String,
    insert_dividend: String,
    upsert_metadata: String,
    select_all: String,
    select_by_key: String,
}

impl Statements {
    fn for_keyspace(keyspace: &str) -> Self {
        Self {
            insert_price_bar: format!(
                "INSERT INTO {keyspace}.historic_data ({PRICE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            insert_dividend: format!(
                "INSERT INTO {keyspace}.dividends (exchange, symbol, date, dividend) VALUES (?, ?, ?, ?)"
            ),
            upsert_metadata: format!(
                "INSERT INTO {keyspace}.exchange_metadata (exchange, symbol, last_updated_date) VALUES (?, ?, ?)"
            ),
            select_all: format!("SELECT {PRICE_COLUMNS} FROM {keyspace}.historic_data"),
            select_by_key: format!(
                "SELECT {PRICE_COLUMNS} FROM {keyspace}.historic_data WHERE exchange = ? AND symbol = ?"
            ),
        }
    }
}

/// Connected CQL store.
pub struct ScyllaReferenceStore {
    session: Session,
    insert_price_bar: PreparedStatement,
    insert_dividend: PreparedStatement,
    upsert_metadata: PreparedStatement,
    select_by_key: PreparedStatement,
    select_all: String,
}

impl std::fmt::Debug for ScyllaReferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScyllaReferenceStore")
            .field("select_all", &self.select_all)
            .finish_non_exhaustive()
    }
}

impl ScyllaReferenceStore {
    /// Connect to the cluster and prepare every statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no contact point answers or a
    /// statement cannot be prepared (missing keyspace or table).
    pub async fn connect(settings: &StoreSettings) -> Result<Self, StoreError> {
        let nodes = settings.known_nodes();
        tracing::info!(nodes = ?nodes, keyspace = %settings.keyspace, "Connecting to store");

        let session = SessionBuilder::new()
            .known_nodes(&nodes)
            .connection_timeout(settings.connect_timeout)
            .build()
            .await
            .map_err(|e| StoreError::Unavailable {
                message: e.to_string(),
            })?;

        let statements = Statements::for_keyspace(&settings.keyspace);
        let insert_price_bar = prepare_write(&session, &statements.insert_price_bar).await?;
        let insert_dividend = prepare_write(&session, &statements.insert_dividend).await?;
        let upsert_metadata = prepare_write(&session, &statements.upsert_metadata).await?;
        let select_by_key = prepare(&session, &statements.select_by_key).await?;

        tracing::info!("Store connected, statements prepared");

        Ok(Self {
            session,
            insert_price_bar,
            insert_dividend,
            upsert_metadata,
            select_by_key,
            select_all: statements.select_all,
        })
    }
}

async fn prepare(session: &Session, cql: &str) -> Result<PreparedStatement, StoreError> {
    session
        .prepare(cql)
        .await
        .map_err(|e| StoreError::Unavailable {
            message: format!("could not prepare `{cql}`: {e}"),
        })
}

async fn prepare_write(session: &Session, cql: &str) -> Result<PreparedStatement, StoreError> {
    let mut prepared = prepare(session, cql).await?;
    prepared.set_consistency(Consistency::One);
    prepared.set_is_idempotent(true);
    Ok(prepared)
}

fn write_error(error: &ExecutionError) -> WriteError {
    let message = error.to_string();
    match error {
        ExecutionError::BadQuery(_) => WriteError::Rejected { message },
        ExecutionError::RequestTimeout(_) => WriteError::Timeout { message },
        ExecutionError::LastAttemptError(RequestAttemptError::DbError(db_error, _)) => {
            match db_error {
                DbError::WriteTimeout { .. } | DbError::ReadTimeout { .. } => {
                    WriteError::Timeout { message }
                }
                DbError::Unavailable { .. }
                | DbError::Overloaded
                | DbError::IsBootstrapping
                | DbError::ServerError => WriteError::Transport { message },
                _ => WriteError::Rejected { message },
            }
        }
        _ => WriteError::Transport { message },
    }
}

fn read_error(error: impl std::fmt::Display) -> StoreError {
    StoreError::Read {
        message: error.to_string(),
    }
}

fn price_bar_stream(pager: QueryPager) -> Result<PriceBarStream, StoreError> {
    let rows = pager.rows_stream::<PriceBarRow>().map_err(read_error)?;
    Ok(rows
        .map(|row| row.map(bar_from_row).map_err(read_error))
        .boxed())
}

#[async_trait]
impl ReferenceStorePort for ScyllaReferenceStore {
    async fn insert_price_bar(&self, bar: &PriceBar) -> Result<(), WriteError> {
        let values = (
            bar.exchange.as_str(),
            bar.symbol.as_str(),
            bar.date,
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            bar.adj_close,
        );
        self.session
            .execute_unpaged(&self.insert_price_bar, values)
            .await
            .map(|_| ())
            .map_err(|e| write_error(&e))
    }

    async fn insert_dividend(&self, dividend: &DividendEvent) -> Result<(), WriteError> {
        let values = (
            dividend.exchange.as_str(),
            dividend.symbol.as_str(),
            dividend.date,
            dividend.amount,
        );
        self.session
            .execute_unpaged(&self.insert_dividend, values)
            .await
            .map(|_| ())
            .map_err(|e| write_error(&e))
    }

    async fn upsert_metadata(&self, metadata: &SymbolMetadata) -> Result<(), WriteError> {
        let values = (
            metadata.exchange.as_str(),
            metadata.symbol.as_str(),
            metadata.last_updated_date,
        );
        self.session
            .execute_unpaged(&self.upsert_metadata, values)
            .await
            .map(|_| ())
            .map_err(|e| write_error(&e))
    }

    async fn scan_price_bars(&self, page_size: i32) -> Result<PriceBarStream, StoreError> {
        if page_size <= 0 {
            return Err(StoreError::Read {
                message: format!("page size must be positive, got {page_size}"),
            });
        }

        let mut statement = Statement::new(self.select_all.clone());
        statement.set_page_size(page_size);

        let pager = self
            .session
            .query_iter(statement, ())
            .await
            .map_err(read_error)?;
        price_bar_stream(pager)
    }

    async fn price_bars_for(&self, key: &ExchangeSymbol) -> Result<PriceBarStream, StoreError> {
        let pager = self
            .session
            .execute_iter(
                self.select_by_key.clone(),
                (key.exchange.as_str(), key.symbol.as_str()),
            )
            .await
            .map_err(read_error)?;
        price_bar_stream(pager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_keyspace_qualified() {
        let statements = Statements::for_keyspace("refdata_test");
        assert!(
            statements
                .insert_price_bar
                .starts_with("INSERT INTO refdata_test.historic_data (exchange, symbol, date,")
        );
        assert!(statements.insert_dividend.contains("refdata_test.dividends"));
        assert!(
            statements
                .upsert_metadata
                .contains("refdata_test.exchange_metadata (exchange, symbol, last_updated_date)")
        );
        assert!(statements.select_by_key.ends_with("WHERE exchange = ? AND symbol = ?"));
        assert!(!statements.select_all.contains('*'));
    }

    #[test]
    fn insert_placeholders_match_columns() {
        let statements = Statements::for_keyspace("ks");
        assert_eq!(statements.insert_price_bar.matches('?').count(), 9);
        assert_eq!(statements.insert_dividend.matches('?').count(), 4);
        assert_eq!(statements.upsert_metadata.matches('?').count(), 3);
    }

    #[test]
    fn row_maps_to_bar() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let bar = bar_from_row((
            "NYSE".to_string(),
            "ACME".to_string(),
            date,
            1.0,
            2.0,
            0.5,
            1.5,
            100,
            1.4,
        ));
        assert_eq!(bar.symbol, "ACME");
        assert_eq!(bar.date, date);
        assert_eq!(bar.volume, 100);
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_unavailable() {
        let settings = StoreSettings {
            contact_points: vec!["127.0.0.1".to_string()],
            port: 1,
            connect_timeout: std::time::Duration::from_millis(200),
            ..StoreSettings::default()
        };
        let err = ScyllaReferenceStore::connect(&settings).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }
}
