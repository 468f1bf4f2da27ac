//! Sync Engine - one snapshot run from epoch discovery to completion
//!
//! ## Flow
//!
//! ```text
//! EpochProber::discover_latest_epoch()
//!     ↓
//! latest completed run on the same migration?
//!     ├─ no  → resolve snapshot time → AcsFetcher pages → SnapshotWriter
//!     └─ yes → load base artifacts → ContractMap
//!                  ↓
//!              UpdatesFetcher pages → apply_delta + burn → write_datasets
//!     ↓
//! Aggregator::circulating_supply() → complete_run()
//! ```
//!
//! Exactly one run owns the cursor state at a time. A `processing` record
//! that has not moved for `stale_run_after` is marked `timeout` and
//! superseded; a fresher one refuses the new run.
//!
//! Failures after the run record exists mark it `failed` with the error
//! text. Artifacts already written stay in storage until purged.
//!
//! Per-page progress (`last_update_id`, `last_record_time`, entry count,
//! burn) is a diagnostic checkpoint only. A later run never resumes from a
//! failed or timed-out record; it starts again from the latest completed
//! snapshot.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::ledger::acs_fetcher::AcsFetcher;
use crate::ledger::client::LedgerClient;
use crate::ledger::prober::EpochProber;
use crate::ledger::types::{format_record_time, Epoch};
use crate::ledger::updates_fetcher::UpdatesFetcher;
use crate::storage::blob::BlobStore;
use crate::storage::metadata::{MetadataStore, RunProgress, RunStatus, RunTotals, SnapshotRecord};
use crate::sync::aggregator::{Aggregator, SupplyTotals};
use crate::sync::burn::{update_burn, BurnReport};
use crate::sync::materialize::{write_datasets, SnapshotWriter};
use crate::sync::progress::{LogProgress, Phase, ProgressObserver};
use crate::sync::reconciler::{ContractMap, DeltaStats};
use crate::sync::scheduler::BoundedScheduler;
use crate::sync::state::{CancelFlag, RunMode, SyncRunState, UpdateCursor};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Outcome of one `run_sync` call
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSummary {
    pub snapshot_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub epoch: Epoch,
    pub base_snapshot_id: Option<String>,
    pub entry_count: u64,
    pub pages: u64,
    pub supply: Option<SupplyTotals>,
    pub burn: BurnReport,
    pub delta: DeltaStats,
    pub error_message: Option<String>,
}

impl SyncSummary {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// What a full or delta pass produced before supply is computed
#[derive(Debug, Default)]
struct PassOutcome {
    entry_count: u64,
    burn: BurnReport,
    delta: DeltaStats,
    last_update_id: Option<String>,
    last_record_time: Option<DateTime<Utc>>,
}

pub struct SyncEngine {
    config: SyncConfig,
    client: Arc<dyn LedgerClient>,
    blobs: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
    observer: Arc<dyn ProgressObserver>,
    cancel: CancelFlag,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        client: Arc<dyn LedgerClient>,
        blobs: Arc<dyn BlobStore>,
        meta: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            client,
            blobs,
            meta,
            observer: Arc::new(LogProgress::default()),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn scheduler(&self) -> BoundedScheduler {
        BoundedScheduler::new(self.config.download_concurrency)
    }

    /// Run one synchronization
    ///
    /// Returns `Err` only for failures before a run record exists (another
    /// run in progress, no epoch found, metadata store errors). Everything
    /// after that is reported through the summary's status.
    pub async fn run_sync(&self) -> Result<SyncSummary> {
        let now = Utc::now();
        self.supersede_stale_run(now).await?;

        log::info!("🚀 Starting snapshot sync");
        log::info!("   ├─ Ledger: {}", self.config.scan_url);
        log::info!("   ├─ Blob store: {}", self.blobs.backend_type());
        log::info!("   └─ Metadata: {}", self.meta.backend_type());

        let prober = EpochProber::new(&*self.client, self.config.max_migration_probe);
        let current = prober.discover_latest_epoch(now).await?;

        let base = if self.config.force_full {
            log::info!("🔁 FORCE_FULL_SNAPSHOT set; ignoring prior runs");
            None
        } else {
            self.meta.latest_completed().await?
        };
        let base = match base {
            Some(b) if b.migration_id == current.migration_id => Some(b),
            Some(b) => {
                log::info!(
                    "🔀 Migration changed ({} -> {}); taking a full snapshot",
                    b.migration_id,
                    current.migration_id
                );
                None
            }
            None => None,
        };

        let (mode, epoch) = match base {
            Some(ref b) => (
                RunMode::Delta,
                Epoch {
                    migration_id: b.migration_id,
                    record_time: b.last_record_time.unwrap_or(b.record_time),
                },
            ),
            None => {
                let record_time = prober
                    .resolve_snapshot_time(current.migration_id, now)
                    .await?;
                (
                    RunMode::Full,
                    Epoch {
                        migration_id: current.migration_id,
                        record_time,
                    },
                )
            }
        };

        let snapshot_id = snapshot_id_for(epoch.migration_id, now);
        let base_id = base.as_ref().map(|b| b.id.clone());
        self.meta
            .create_run(&SnapshotRecord::processing(&snapshot_id, epoch, base_id.clone(), now))
            .await?;

        log::info!("📸 Run {} ({})", snapshot_id, mode.as_str());
        log::info!("   ├─ Migration: {}", epoch.migration_id);
        log::info!("   ├─ Record time: {}", format_record_time(&epoch.record_time));
        if let Some(ref id) = base_id {
            log::info!("   ├─ Base snapshot: {}", id);
        }
        log::info!("   └─ Page sizes: acs={} updates={}", self.config.acs_page_size, self.config.updates_page_size);

        let mut state = SyncRunState::new(&snapshot_id, mode, epoch, self.cancel.clone());
        let outcome = match base {
            Some(ref b) => self.run_delta(&mut state, b).await,
            None => self.run_full(&mut state).await,
        };
        let outcome = match outcome {
            Ok(o) => self.finish_run(&state, o).await,
            Err(e) => Err(e),
        };

        let mut summary = SyncSummary {
            snapshot_id: snapshot_id.clone(),
            mode,
            status: RunStatus::Completed,
            epoch,
            base_snapshot_id: base_id,
            entry_count: 0,
            pages: state.pages_done,
            supply: None,
            burn: BurnReport::default(),
            delta: DeltaStats::default(),
            error_message: None,
        };

        match outcome {
            Ok((o, supply)) => {
                summary.entry_count = o.entry_count;
                summary.supply = Some(supply);
                summary.burn = o.burn;
                summary.delta = o.delta;
                log::info!("✅ Run {} completed: {} contracts", snapshot_id, o.entry_count);
            }
            Err(e) => {
                let message = match e {
                    SyncError::Cancelled => "cancelled".to_string(),
                    ref other => other.to_string(),
                };
                log::error!("❌ Run {} failed: {}", snapshot_id, message);
                self.meta
                    .mark_run(&snapshot_id, RunStatus::Failed, Some(&message))
                    .await?;
                summary.status = RunStatus::Failed;
                summary.error_message = Some(message);
            }
        }

        Ok(summary)
    }

    /// Refuse to start while a fresh run is processing; time out a stale one
    async fn supersede_stale_run(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(active) = self.meta.find_processing().await? else {
            return Ok(());
        };

        let idle = now.signed_duration_since(active.updated_at);
        let stale_after = chrono::Duration::from_std(self.config.stale_run_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));

        if idle < stale_after {
            return Err(SyncError::AlreadyInProgress(active.id));
        }

        log::warn!(
            "⚠️  Run {} idle for {} minutes; marking timeout",
            active.id,
            idle.num_minutes()
        );
        self.meta
            .mark_run(
                &active.id,
                RunStatus::Timeout,
                Some("superseded: no progress within the staleness window"),
            )
            .await
    }

    async fn run_full(&self, state: &mut SyncRunState) -> Result<PassOutcome> {
        let mut fetcher = AcsFetcher::new(
            &*self.client,
            &*self.observer,
            self.config.acs_page_size,
            self.config.max_acs_pages,
        );
        let mut writer = SnapshotWriter::new(&state.snapshot_id, self.config.chunk_entries);

        while let Some(page) = fetcher.next_page(state).await? {
            writer.push_all(&*self.blobs, page).await?;
            self.meta
                .record_progress(
                    &state.snapshot_id,
                    &RunProgress {
                        entry_count: state.events_done,
                        ..RunProgress::default()
                    },
                )
                .await?;
        }

        let stats = fetcher.stats();
        log::info!(
            "📥 ACS fetch done: {} pages, {} contracts, {} range recoveries ({} re-served records dropped)",
            stats.pages,
            stats.contracts,
            stats.range_recoveries,
            stats.replayed
        );

        state.cancel.check()?;
        let written = writer.finish(&*self.blobs, &*self.meta).await?;

        Ok(PassOutcome {
            entry_count: written.entry_count,
            last_record_time: Some(state.epoch.record_time),
            ..PassOutcome::default()
        })
    }

    async fn load_baseline(&self, base: &SnapshotRecord) -> Result<ContractMap> {
        let aggregator = Aggregator::new(self.blobs.clone(), self.meta.clone(), self.scheduler());
        let templates = aggregator.snapshot_templates(&base.id).await?;
        let mut map = ContractMap::new();

        for (i, template) in templates.iter().enumerate() {
            self.cancel.check()?;
            let loaded = aggregator
                .reader()
                .for_each_chunk(&template.storage_path, |chunk| {
                    map.extend(chunk);
                    Ok(())
                })
                .await;
            match loaded {
                Ok(_) => {}
                Err(SyncError::NotFound(path)) => {
                    log::warn!("⚠️  Base artifact missing for {}: {}", template.template_id, path);
                }
                Err(e) => return Err(e),
            }
            self.observer
                .on_progress(Phase::Baseline, i as u64 + 1, map.len() as u64);
        }

        log::info!(
            "🧱 Baseline from {}: {} contracts across {} templates",
            base.id,
            map.len(),
            templates.len()
        );
        Ok(map)
    }

    async fn run_delta(&self, state: &mut SyncRunState, base: &SnapshotRecord) -> Result<PassOutcome> {
        let mut map = self.load_baseline(base).await?;

        state.update_cursor = Some(UpdateCursor {
            migration_id: base.migration_id,
            record_time: base.last_record_time.unwrap_or(base.record_time),
            update_id: base.last_update_id.clone(),
        });
        if let Some(ref cursor) = state.update_cursor {
            log::info!("⏩ Applying updates after {}", cursor);
        }

        let mut fetcher = UpdatesFetcher::new(
            &*self.client,
            &*self.observer,
            self.config.updates_page_size,
            self.config.max_update_pages,
        );
        let mut outcome = PassOutcome::default();

        while let Some(batch) = fetcher.next_page(state).await? {
            for update in &batch.updates {
                outcome.delta.merge(&map.apply_delta(update));
                outcome.burn.merge(&update_burn(update));
            }
            for (template_id, tally) in &batch.tallies {
                log::debug!(
                    "   ├─ {}: +{} / -{}",
                    template_id,
                    tally.created,
                    tally.archived
                );
            }

            let cursor = state.update_cursor.as_ref();
            outcome.last_update_id = cursor.and_then(|c| c.update_id.clone());
            outcome.last_record_time = cursor.map(|c| c.record_time);
            self.meta
                .record_progress(
                    &state.snapshot_id,
                    &RunProgress {
                        last_update_id: outcome.last_update_id.clone(),
                        last_record_time: outcome.last_record_time,
                        entry_count: map.len() as u64,
                        burn_total: outcome.burn.burn_total,
                        balance_mismatches: outcome.burn.mismatches,
                    },
                )
                .await?;
        }

        // no updates since the base: keep its watermark
        if outcome.last_record_time.is_none() {
            outcome.last_update_id = base.last_update_id.clone();
            outcome.last_record_time = Some(base.last_record_time.unwrap_or(base.record_time));
        }

        log::info!(
            "🔄 Applied {} pages: +{} created, {} replaced, -{} archived ({} unknown), burn {}",
            fetcher.pages(),
            outcome.delta.created,
            outcome.delta.replaced,
            outcome.delta.archived,
            outcome.delta.archived_missing,
            outcome.burn.burn_total
        );

        state.cancel.check()?;
        let datasets = map.into_templates();
        let written = write_datasets(
            &state.snapshot_id,
            &datasets,
            self.config.chunk_entries,
            &*self.blobs,
            &*self.meta,
        )
        .await?;
        self.observer.on_progress(
            Phase::Artifacts,
            written.templates.len() as u64,
            written.entry_count,
        );
        outcome.entry_count = written.entry_count;

        Ok(outcome)
    }

    async fn finish_run(
        &self,
        state: &SyncRunState,
        outcome: PassOutcome,
    ) -> Result<(PassOutcome, SupplyTotals)> {
        let aggregator = Aggregator::new(self.blobs.clone(), self.meta.clone(), self.scheduler());
        let supply = aggregator.circulating_supply(&state.snapshot_id).await?;

        self.meta
            .complete_run(
                &state.snapshot_id,
                &RunTotals {
                    amulet_total: supply.amulet_total,
                    locked_total: supply.locked_total,
                    circulating_supply: supply.circulating_supply,
                    entry_count: outcome.entry_count,
                    burn_total: outcome.burn.burn_total,
                    balance_mismatches: outcome.burn.mismatches,
                    last_update_id: outcome.last_update_id.clone(),
                    last_record_time: outcome.last_record_time,
                },
            )
            .await?;

        Ok((outcome, supply))
    }

    /// Delete a snapshot's artifacts and metadata; returns blobs removed
    pub async fn purge_snapshot(&self, snapshot_id: &str) -> Result<usize> {
        if let Some(run) = self.meta.get_run(snapshot_id).await? {
            if run.status == RunStatus::Processing {
                return Err(SyncError::AlreadyInProgress(run.id));
            }
        }

        let prefix = format!("{}/", snapshot_id);
        let entries = self.blobs.list(&prefix).await?;
        for entry in &entries {
            self.blobs.delete(&entry.path).await?;
        }
        self.meta.delete_run(snapshot_id).await?;

        log::info!("🗑️  Purged {}: {} blobs", snapshot_id, entries.len());
        Ok(entries.len())
    }
}

/// `snap-{migration}-{start time}`; unique per run start
pub fn snapshot_id_for(migration_id: u64, started_at: DateTime<Utc>) -> String {
    format!(
        "snap-{}-{}",
        migration_id,
        started_at.format("%Y%m%dT%H%M%S%6fZ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_id_format() {
        let t = Utc.with_ymd_and_hms(2025, 7, 4, 9, 30, 5).unwrap();
        assert_eq!(snapshot_id_for(4, t), "snap-4-20250704T093005000000Z");
    }
}
