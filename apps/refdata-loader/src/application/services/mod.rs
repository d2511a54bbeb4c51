//! Application Services
//!
//! The loading pipeline, built from the domain batching rules and the
//! store port.
//!
//! - `BatchProducer`: Reads files and feeds per-symbol batches into a channel
//! - `batch_channel`: Bounded hand-off that applies backpressure
//! - `WriterPool`: Workers that submit batches and wait for completion
//! - `StoreGateway`: Issues writes and exposes the completion barrier
//! - `BulkLoader`: Runs both pipelines and produces the load summary

/// Bounded batch channel.
pub mod channel;
/// Unacknowledged write reporting.
pub mod failures;
/// Store gateway and submission handles.
pub mod gateway;
/// Pipeline orchestration.
pub mod loader;
/// File-to-channel producer.
pub mod producer;
/// Write retry policy.
pub mod retry;
/// Issued write counter.
pub mod throughput;
/// Writer workers.
pub mod writer_pool;

pub use channel::{BatchReceiver, BatchSender, ChannelClosed, ChannelDepth, batch_channel};
pub use failures::{FailureCollector, FailureReporter, FailureSummary, failure_channel};
pub use gateway::{
    BatchSubmitter, GatewayError, GatewaySettings, StoreGateway, SubmissionHandle,
    SubmissionReport, WriteFailure, WriteTarget,
};
pub use loader::{BulkLoader, LoadPlan, LoadSummary, PipelineReport, PipelineSettings};
pub use producer::{BatchProducer, ProducerReport};
pub use retry::{ExponentialBackoff, WriteRetryPolicy};
pub use throughput::ThroughputCounter;
pub use writer_pool::{PoolReport, WriterPool};
