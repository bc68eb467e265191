//! Configuration management for versegraph.
//!
//! Settings live in a TOML file with one table per subsystem. Every field has a
//! default, so a missing file or a partial file is valid.

pub mod config;

pub use config::{
    CacheConfig, ConfigError, LoggingConfig, OrchestratorConfig, SyncConfig, VerseGraphConfig,
    CONFIG_ENV_VAR,
};
