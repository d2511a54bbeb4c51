//! Port Interfaces
//!
//! Contracts between the loading pipeline and the outside world, following
//! the Hexagonal Architecture pattern. Infrastructure adapters implement
//! these; application services depend only on the traits.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ReferenceStorePort`: Writes and reads against the replicated store
//! - `RecordFileSource`: Opens a flat file and yields parsed records

mod record_source_port;
mod reference_store_port;

pub use record_source_port::{FileAccessError, ParseError, RecordFileSource};
pub use reference_store_port::{PriceBarStream, ReferenceStorePort, StoreError, WriteError};
