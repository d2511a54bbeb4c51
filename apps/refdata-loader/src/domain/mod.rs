//! Domain Layer - Reference data records and batching rules.
//!
//! This layer contains the core record types and the per-symbol batching
//! logic with no I/O. Everything here is synchronous and deterministic.

/// Price bar, dividend and metadata record types.
pub mod reference_data;

/// Per-symbol batch construction.
pub mod batching;
