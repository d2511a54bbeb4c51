//! Configuration Module
//!
//! Configuration loading for the loader binary.

mod settings;

pub use settings::{
    ConfigError, InputSettings, LoaderConfig, StoreBackend, StoreSettings, WriteSettings,
};
