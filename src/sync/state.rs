//! Per-run synchronization state
//!
//! One `SyncRunState` is owned by each run and threaded through epoch
//! discovery, fetching and reconciliation. Cursors live here instead of in
//! module-level globals.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::ledger::types::{format_record_time, Epoch};

/// Cooperative cancellation flag, checked at loop boundaries
///
/// Setting it stops new pages from being scheduled; requests already in
/// flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is set
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Computed from scratch via ACS pagination
    Full,
    /// Derived from a prior completed snapshot plus applied updates
    Delta,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Delta => "delta",
        }
    }
}

/// Watermark for incremental fetching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCursor {
    pub migration_id: u64,
    pub record_time: DateTime<Utc>,
    /// Last applied update; `None` when resuming from a full snapshot time
    pub update_id: Option<String>,
}

impl std::fmt::Display for UpdateCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "m{}@{}",
            self.migration_id,
            format_record_time(&self.record_time)
        )?;
        if let Some(ref id) = self.update_id {
            write!(f, "#{}", id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SyncRunState {
    pub snapshot_id: String,
    pub mode: RunMode,
    pub epoch: Epoch,
    /// ACS offset for full fetches (`after` parameter)
    pub acs_cursor: Option<u64>,
    /// Watermark for incremental fetches
    pub update_cursor: Option<UpdateCursor>,
    pub pages_done: u64,
    pub events_done: u64,
    pub cancel: CancelFlag,
}

impl SyncRunState {
    pub fn new(snapshot_id: impl Into<String>, mode: RunMode, epoch: Epoch, cancel: CancelFlag) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            mode,
            epoch,
            acs_cursor: None,
            update_cursor: None,
            pages_done: 0,
            events_done: 0,
            cancel,
        }
    }

    pub fn record_page(&mut self, events: usize) {
        self.pages_done += 1;
        self.events_done += events as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());

        other.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(SyncError::Cancelled)));
    }

    #[test]
    fn test_cursor_display() {
        let cursor = UpdateCursor {
            migration_id: 4,
            record_time: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            update_id: Some("1220ab".into()),
        };
        assert_eq!(cursor.to_string(), "m4@2026-01-02T03:04:05.000000Z#1220ab");
    }
}
