#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::cast_possible_truncation,
        clippy::items_after_statements
    )
)]

//! Reference Data Loader - Bulk Price and Dividend Ingestion
//!
//! Streams daily price bars and dividend events from CSV files into a
//! Cassandra-compatible store. Records are cut into per-symbol batches,
//! passed through a bounded channel to a pool of writers, and each batch
//! is written with one asynchronous write per record plus a metadata
//! upsert carrying the latest date loaded for that symbol.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Record types and batching rules
//!   - `reference_data`: Price bars, dividends, symbol metadata
//!   - `batching`: Per-symbol batch construction
//!
//! - **Application**: Pipeline services and port definitions
//!   - `ports`: Store and record file interfaces
//!   - `services`: Producer, channel, writer pool, gateway, loader
//!
//! - **Infrastructure**: Adapters and process concerns
//!   - `csv`: CSV decoding and input discovery
//!   - `scylla`: CQL store adapter
//!   - `memory`: In-process store
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! *_daily_prices*.csv ─▶ producer ─▶ [bounded channel] ─▶ writers ─┐
//!                                                                  ├─▶ gateway ─▶ store
//! *_dividends*.csv ────▶ producer ─▶ [bounded channel] ─▶ writers ─┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Record types and batching with no I/O.
pub mod domain;

/// Application layer - Pipeline services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::batching::{BatchAccumulator, BatchError, SymbolBatch, batch_records};
pub use domain::reference_data::{
    DividendEvent, ExchangeSymbol, PriceBar, RecordKind, SymbolMetadata, SymbolRecord,
};

// Ports
pub use application::ports::{
    FileAccessError, ParseError, PriceBarStream, RecordFileSource, ReferenceStorePort, StoreError,
    WriteError,
};

// Pipeline
pub use application::services::{
    BulkLoader, GatewayError, GatewaySettings, LoadPlan, LoadSummary, PipelineSettings,
    StoreGateway, SubmissionHandle, SubmissionReport, WriteRetryPolicy,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, LoaderConfig, StoreBackend, StoreSettings};

// Adapters
pub use infrastructure::csv::{CsvRecordSource, discover_files};
pub use infrastructure::memory::InMemoryReferenceStore;
pub use infrastructure::scylla::ScyllaReferenceStore;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
