//! Prometheus Metrics Module
//!
//! Exposes loader progress in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Records**: Rows written, rows skipped, files skipped
//! - **Batches**: Batch completions and their write latency
//! - **Failures**: Individual writes that were never acknowledged
//! - **Backpressure**: Batches waiting in each bounded channel
//!
//! # Integration
//!
//! When `REFDATA_METRICS_PORT` is non-zero the exporter serves `/metrics`
//! on that port for the lifetime of the process. Without an installed
//! recorder every `record_*` call is a no-op.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::reference_data::RecordKind;

// =============================================================================
// Exporter
// =============================================================================

static EXPORTER_PORT: OnceLock<u16> = OnceLock::new();

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Calling this again after a successful install is a no-op.
///
/// # Errors
///
/// Returns [`BuildError`] if the listener cannot be bound or another
/// recorder is already installed.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    if EXPORTER_PORT.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        .install()?;

    register_metrics();
    let _ = EXPORTER_PORT.set(port);
    tracing::info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Port of the running exporter, if one was installed.
#[must_use]
pub fn exporter_port() -> Option<u16> {
    EXPORTER_PORT.get().copied()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "refdata_loader_records_written_total",
        "Records issued to the store"
    );
    describe_counter!(
        "refdata_loader_batches_total",
        "Per-symbol batches that completed"
    );
    describe_counter!(
        "refdata_loader_write_failures_total",
        "Writes that failed after all retries"
    );
    describe_counter!(
        "refdata_loader_records_skipped_total",
        "Rows dropped because they could not be parsed"
    );
    describe_counter!(
        "refdata_loader_files_skipped_total",
        "Input files that could not be read"
    );

    describe_histogram!(
        "refdata_loader_batch_write_seconds",
        "Time from batch submission to completion"
    );

    describe_gauge!(
        "refdata_loader_channel_depth",
        "Batches waiting in the bounded channel"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record records handed to the store.
pub fn record_records_written(kind: RecordKind, count: u64) {
    counter!(
        "refdata_loader_records_written_total",
        "kind" => kind.as_str()
    )
    .increment(count);
}

/// Record a completed batch and how long its writes took.
pub fn record_batch_completed(kind: RecordKind, elapsed: Duration) {
    counter!("refdata_loader_batches_total", "kind" => kind.as_str()).increment(1);
    histogram!(
        "refdata_loader_batch_write_seconds",
        "kind" => kind.as_str()
    )
    .record(elapsed.as_secs_f64());
}

/// Record a write that was never acknowledged.
pub fn record_write_failure(kind: RecordKind) {
    counter!(
        "refdata_loader_write_failures_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record rows dropped by the parser.
pub fn record_records_skipped(kind: RecordKind, count: u64) {
    counter!(
        "refdata_loader_records_skipped_total",
        "kind" => kind.as_str()
    )
    .increment(count);
}

/// Record an unreadable input file.
pub fn record_file_skipped(kind: RecordKind) {
    counter!(
        "refdata_loader_files_skipped_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Update the number of batches waiting in a channel.
#[allow(clippy::cast_precision_loss)]
pub fn set_channel_depth(kind: RecordKind, depth: usize) {
    gauge!("refdata_loader_channel_depth", "kind" => kind.as_str()).set(depth as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_records_written(RecordKind::PriceBar, 10);
        record_batch_completed(RecordKind::Dividend, Duration::from_millis(5));
        record_write_failure(RecordKind::PriceBar);
        record_records_skipped(RecordKind::PriceBar, 1);
        record_file_skipped(RecordKind::Dividend);
        set_channel_depth(RecordKind::PriceBar, 3);
    }

    #[test]
    fn exporter_port_unset_by_default() {
        assert!(exporter_port().is_none());
    }
}
