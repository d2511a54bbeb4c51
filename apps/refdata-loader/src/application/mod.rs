//! Application Layer - Pipeline services and port definitions.
//!
//! This layer contains the loading pipeline and the port interfaces that
//! define how it reaches files and the store.

/// Port interfaces for the store and record files.
pub mod ports;

/// Producer, channel, writer pool, gateway and orchestration.
pub mod services;
