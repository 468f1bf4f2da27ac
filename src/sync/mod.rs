//! Synchronization engine
//!
//! - `state` - Per-run cursors and the cancel flag
//! - `progress` - Observer interface for page-level progress
//! - `scheduler` - Bounded concurrency for downloads
//! - `payload` - Extractor chains and typed contract payloads
//! - `reconciler` - Contract map baseline and delta application
//! - `aggregator` - Template aggregates, streaming sums, circulating supply
//! - `burn` - Fee burn accounting with a non-fatal cross-check
//! - `materialize` - Per-template artifact writing for a snapshot
//! - `engine` - Run orchestration

pub mod aggregator;
pub mod burn;
pub mod engine;
pub mod materialize;
pub mod payload;
pub mod progress;
pub mod reconciler;
pub mod scheduler;
pub mod state;

pub use aggregator::{Aggregator, SumResult, SupplyTotals, TemplateAggregate};
pub use engine::{SyncEngine, SyncSummary};
pub use progress::{LogProgress, Phase, ProgressObserver};
pub use reconciler::{normalize_contract_id, ContractMap};
pub use scheduler::BoundedScheduler;
pub use state::{CancelFlag, RunMode, SyncRunState};
