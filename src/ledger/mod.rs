//! Ledger query surface
//!
//! - `types` - Wire shapes and the typed `LedgerUpdate`
//! - `client` - `LedgerClient` trait and the reqwest implementation
//! - `backoff` - Retry delays for transient failures
//! - `prober` - Migration/epoch discovery and snapshot time verification
//! - `acs_fetcher` - Full snapshot pagination with range-error recovery
//! - `updates_fetcher` - Incremental update pagination and classification
//! - `template` - Template id matching and sanitizing

pub mod acs_fetcher;
pub mod backoff;
pub mod client;
pub mod prober;
pub mod template;
pub mod types;
pub mod updates_fetcher;

pub use acs_fetcher::AcsFetcher;
pub use client::{HttpLedgerClient, LedgerClient, RetryPolicy};
pub use prober::EpochProber;
pub use types::{Contract, Epoch, LedgerUpdate};
pub use updates_fetcher::{ClassifiedUpdate, ContractEvent, UpdatesFetcher};
