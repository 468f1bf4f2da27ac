//! Migration/epoch discovery
//!
//! Migrations are probed linearly from 1 upward; the last id that answers a
//! snapshot-timestamp query is the current one. The snapshot time is then
//! verified with a second query bounded by the first answer, since a lagging
//! read replica can hand out a record time the primary has moved past.

use super::client::LedgerClient;
use super::types::{format_record_time, Epoch};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};

pub struct EpochProber<'a> {
    client: &'a dyn LedgerClient,
    max_probe: u64,
}

impl<'a> EpochProber<'a> {
    pub fn new(client: &'a dyn LedgerClient, max_probe: u64) -> Self {
        Self {
            client,
            max_probe: max_probe.max(1),
        }
    }

    /// Highest migration id whose snapshot-timestamp query succeeds
    ///
    /// Stops at the first id that errors or returns no record time.
    /// `max_probe` bounds the walk against an endpoint that answers for every id.
    pub async fn discover_latest_epoch(&self, now: DateTime<Utc>) -> Result<Epoch> {
        let mut latest: Option<Epoch> = None;

        for migration_id in 1..=self.max_probe {
            match self.client.snapshot_timestamp(migration_id, now).await {
                Ok(Some(record_time)) => {
                    log::debug!(
                        "   ├─ migration {} answers at {}",
                        migration_id,
                        format_record_time(&record_time)
                    );
                    latest = Some(Epoch {
                        migration_id,
                        record_time,
                    });
                }
                Ok(None) => {
                    log::debug!("   └─ migration {} has no record time", migration_id);
                    break;
                }
                Err(e) => {
                    log::debug!("   └─ migration {} probe failed: {}", migration_id, e);
                    break;
                }
            }

            if migration_id == self.max_probe {
                log::warn!(
                    "⚠️  Migration probe hit ceiling {}; using it as current",
                    self.max_probe
                );
            }
        }

        match latest {
            Some(epoch) => {
                log::info!(
                    "🔎 Current migration: {} (record time {})",
                    epoch.migration_id,
                    format_record_time(&epoch.record_time)
                );
                Ok(epoch)
            }
            None => Err(SyncError::NoEpochFound),
        }
    }

    /// Verified snapshot time for a migration
    ///
    /// Queries once at `now`, then again with the first answer as the bound.
    /// When the answers differ the second one wins.
    pub async fn resolve_snapshot_time(
        &self,
        migration_id: u64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let first = self
            .client
            .snapshot_timestamp(migration_id, now)
            .await?
            .ok_or(SyncError::NoSnapshotTime(migration_id))?;

        let second = self.client.snapshot_timestamp(migration_id, first).await?;

        match second {
            Some(verified) if verified != first => {
                log::warn!(
                    "⚠️  Snapshot time moved on verification: {} -> {}",
                    format_record_time(&first),
                    format_record_time(&verified)
                );
                Ok(verified)
            }
            _ => Ok(first),
        }
    }
}
