//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus process-level concerns.

/// Configuration loaded from the environment.
pub mod config;

/// CSV record files and input discovery.
pub mod csv;

/// In-process store for dry runs and tests.
pub mod memory;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// CQL store adapter.
pub mod scylla;

/// Logging and OpenTelemetry tracing setup.
pub mod telemetry;
