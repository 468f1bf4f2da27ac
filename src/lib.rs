//! # acsflow
//!
//! Mirrors a ledger's Active Contract Set into local storage and keeps the
//! mirror current with incremental updates.
//!
//! ## Module Organization
//!
//! - `ledger` - Query client, epoch prober, full and incremental fetchers
//! - `storage` - Blob stores, chunked artifact codec, SQLite run metadata
//! - `sync` - Run state, scheduler, reconciler, aggregator, burn, engine
//! - `config` - Environment-driven configuration
//! - `error` - Error taxonomy shared by every module

pub mod config;
pub mod error;
pub mod ledger;
pub mod storage;
pub mod sync;

pub use config::SyncConfig;
pub use error::{ConfigError, Result, SyncError};
pub use sync::engine::{SyncEngine, SyncSummary};
