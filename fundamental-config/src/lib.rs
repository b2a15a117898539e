//! Shared configuration library for Fundamental.
//!
//! Centralizes environment-driven config loading and validation for the
//! task runtime, the message broker, the scan pipeline, and the ingest
//! watcher, plus the tracing bootstrap. Every process embedding the core
//! goes through this crate so defaults live in exactly one place.

pub mod loader;
pub mod models;
pub mod telemetry;

pub use loader::{ConfigError, load};
pub use models::{
    Config, DatabaseConfig, RedisConfig, RunnerBackend, RunnerConfig,
    ScanConfig, WatcherSettings,
};
pub use telemetry::init_tracing;
