//! Snapshot run metadata
//!
//! One row per synchronization run plus one row per (snapshot, template).
//! The SQLite backend follows the single-connection writer pattern: an
//! `Arc<Mutex<Connection>>` in WAL mode, schema applied idempotently from
//! the embedded `sql/` files on open.

use crate::error::{Result, SyncError};
use crate::ledger::types::{format_record_time, Epoch};
use crate::sync::aggregator::TemplateAggregate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA_FILES: [(&str, &str); 2] = [
    ("01_snapshots.sql", include_str!("../../sql/01_snapshots.sql")),
    ("02_template_stats.sql", include_str!("../../sql/02_template_stats.sql")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "processing" => Some(RunStatus::Processing),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "timeout" => Some(RunStatus::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub id: String,
    pub migration_id: u64,
    pub record_time: DateTime<Utc>,
    pub status: RunStatus,
    pub is_delta: bool,
    pub base_snapshot_id: Option<String>,
    pub last_update_id: Option<String>,
    pub last_record_time: Option<DateTime<Utc>>,
    pub amulet_total: Option<f64>,
    pub locked_total: Option<f64>,
    pub circulating_supply: Option<f64>,
    pub burn_total: f64,
    pub balance_mismatches: u64,
    pub entry_count: u64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SnapshotRecord {
    /// Fresh `processing` record for a run starting now
    pub fn processing(
        id: impl Into<String>,
        epoch: Epoch,
        base_snapshot_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            migration_id: epoch.migration_id,
            record_time: epoch.record_time,
            status: RunStatus::Processing,
            is_delta: base_snapshot_id.is_some(),
            base_snapshot_id,
            last_update_id: None,
            last_record_time: None,
            amulet_total: None,
            locked_total: None,
            circulating_supply: None,
            burn_total: 0.0,
            balance_mismatches: 0,
            entry_count: 0,
            error_message: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Incremental checkpoint written after every applied page
///
/// Diagnostic only: it shows how far an unfinished run got and refreshes
/// `updated_at` for staleness checks. Nothing resumes from it; the next run
/// bases itself on the latest completed record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunProgress {
    pub last_update_id: Option<String>,
    pub last_record_time: Option<DateTime<Utc>>,
    pub entry_count: u64,
    pub burn_total: f64,
    pub balance_mismatches: u64,
}

/// Final figures recorded when a run completes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTotals {
    pub amulet_total: f64,
    pub locked_total: f64,
    pub circulating_supply: f64,
    pub entry_count: u64,
    pub burn_total: f64,
    pub balance_mismatches: u64,
    pub last_update_id: Option<String>,
    pub last_record_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateStatsRecord {
    pub snapshot_id: String,
    pub template_id: String,
    pub storage_path: String,
    pub aggregate: TemplateAggregate,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_run(&self, record: &SnapshotRecord) -> Result<()>;

    async fn get_run(&self, id: &str) -> Result<Option<SnapshotRecord>>;

    /// Most recently started run still marked `processing`
    async fn find_processing(&self) -> Result<Option<SnapshotRecord>>;

    /// Most recently completed run, the base for the next delta
    async fn latest_completed(&self) -> Result<Option<SnapshotRecord>>;

    /// Store a diagnostic checkpoint and refresh `updated_at`
    async fn record_progress(&self, id: &str, progress: &RunProgress) -> Result<()>;

    async fn complete_run(&self, id: &str, totals: &RunTotals) -> Result<()>;

    /// Move a run to a terminal non-completed status
    async fn mark_run(&self, id: &str, status: RunStatus, error_message: Option<&str>) -> Result<()>;

    async fn upsert_template_stats(&self, stats: &TemplateStatsRecord) -> Result<()>;

    async fn template_stats(&self, snapshot_id: &str) -> Result<Vec<TemplateStatsRecord>>;

    /// Remove the run and its template rows
    async fn delete_run(&self, id: &str) -> Result<()>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Apply the embedded schema; every statement is `IF NOT EXISTS`
pub fn run_schema_migrations(conn: &Connection) -> Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::info!("📊 SQLite journal mode: {}", mode);

    log::info!("🔧 Running schema migrations");
    for (name, sql) in SCHEMA_FILES {
        log::info!("   ├─ Executing: {}", name);
        conn.execute_batch(sql)?;
    }
    log::info!("   └─ ✅ Schema ready");
    Ok(())
}

const SNAPSHOT_COLUMNS: &str = "id, migration_id, record_time, status, is_delta, base_snapshot_id, \
     last_update_id, last_record_time, amulet_total, locked_total, circulating_supply, \
     burn_total, balance_mismatches, entry_count, error_message, started_at, updated_at, completed_at";

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(_) => time_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    let status_raw: String = row.get(3)?;
    let status = RunStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown run status {}", status_raw).into(),
        )
    })?;

    Ok(SnapshotRecord {
        id: row.get(0)?,
        migration_id: row.get::<_, i64>(1)? as u64,
        record_time: time_column(row, 2)?,
        status,
        is_delta: row.get(4)?,
        base_snapshot_id: row.get(5)?,
        last_update_id: row.get(6)?,
        last_record_time: optional_time_column(row, 7)?,
        amulet_total: row.get(8)?,
        locked_total: row.get(9)?,
        circulating_supply: row.get(10)?,
        burn_total: row.get(11)?,
        balance_mismatches: row.get::<_, i64>(12)? as u64,
        entry_count: row.get::<_, i64>(13)? as u64,
        error_message: row.get(14)?,
        started_at: time_column(row, 15)?,
        updated_at: time_column(row, 16)?,
        completed_at: optional_time_column(row, 17)?,
    })
}

fn stats_from_row(row: &Row<'_>) -> rusqlite::Result<TemplateStatsRecord> {
    let sums_json: String = row.get(3)?;
    let tallies_json: String = row.get(4)?;
    let decode_err = |idx: usize, e: serde_json::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(TemplateStatsRecord {
        snapshot_id: row.get(0)?,
        template_id: row.get(1)?,
        aggregate: TemplateAggregate {
            contract_count: row.get::<_, i64>(2)? as u64,
            field_sums: serde_json::from_str(&sums_json).map_err(|e| decode_err(3, e))?,
            status_tallies: serde_json::from_str(&tallies_json).map_err(|e| decode_err(4, e))?,
        },
        storage_path: row.get(5)?,
    })
}

fn time_text(t: &DateTime<Utc>) -> String {
    format_record_time(t)
}

/// SQLite-backed metadata store
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        run_schema_migrations(&conn)?;
        log::info!("✅ Metadata store ready: {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_schema_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Storage("metadata connection lock poisoned".to_string()))
    }

    fn expect_row(changed: usize, id: &str) -> Result<()> {
        if changed == 0 {
            return Err(SyncError::NotFound(format!("snapshot run {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create_run(&self, record: &SnapshotRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO snapshots ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                SNAPSHOT_COLUMNS
            ),
            params![
                record.id,
                record.migration_id as i64,
                time_text(&record.record_time),
                record.status.as_str(),
                record.is_delta,
                record.base_snapshot_id,
                record.last_update_id,
                record.last_record_time.as_ref().map(time_text),
                record.amulet_total,
                record.locked_total,
                record.circulating_supply,
                record.burn_total,
                record.balance_mismatches as i64,
                record.entry_count as i64,
                record.error_message,
                time_text(&record.started_at),
                time_text(&record.updated_at),
                record.completed_at.as_ref().map(time_text),
            ],
        )?;
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<Option<SnapshotRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM snapshots WHERE id = ?1", SNAPSHOT_COLUMNS),
                params![id],
                snapshot_from_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn find_processing(&self) -> Result<Option<SnapshotRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM snapshots WHERE status = 'processing' \
                     ORDER BY started_at DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                [],
                snapshot_from_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn latest_completed(&self) -> Result<Option<SnapshotRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM snapshots WHERE status = 'completed' \
                     ORDER BY completed_at DESC, started_at DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                [],
                snapshot_from_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn record_progress(&self, id: &str, progress: &RunProgress) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE snapshots SET last_update_id = ?1, last_record_time = ?2, entry_count = ?3, \
             burn_total = ?4, balance_mismatches = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                progress.last_update_id,
                progress.last_record_time.as_ref().map(time_text),
                progress.entry_count as i64,
                progress.burn_total,
                progress.balance_mismatches as i64,
                time_text(&Utc::now()),
                id,
            ],
        )?;
        Self::expect_row(changed, id)
    }

    async fn complete_run(&self, id: &str, totals: &RunTotals) -> Result<()> {
        let conn = self.lock()?;
        let now = time_text(&Utc::now());
        let changed = conn.execute(
            "UPDATE snapshots SET status = 'completed', amulet_total = ?1, locked_total = ?2, \
             circulating_supply = ?3, entry_count = ?4, burn_total = ?5, balance_mismatches = ?6, \
             last_update_id = ?7, last_record_time = ?8, error_message = NULL, \
             updated_at = ?9, completed_at = ?9 WHERE id = ?10",
            params![
                totals.amulet_total,
                totals.locked_total,
                totals.circulating_supply,
                totals.entry_count as i64,
                totals.burn_total,
                totals.balance_mismatches as i64,
                totals.last_update_id,
                totals.last_record_time.as_ref().map(time_text),
                now,
                id,
            ],
        )?;
        Self::expect_row(changed, id)
    }

    async fn mark_run(&self, id: &str, status: RunStatus, error_message: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let now = time_text(&Utc::now());
        let changed = conn.execute(
            "UPDATE snapshots SET status = ?1, error_message = ?2, updated_at = ?3, completed_at = ?3 \
             WHERE id = ?4",
            params![status.as_str(), error_message, now, id],
        )?;
        Self::expect_row(changed, id)
    }

    async fn upsert_template_stats(&self, stats: &TemplateStatsRecord) -> Result<()> {
        let sums_json = serde_json::to_string(&stats.aggregate.field_sums)?;
        let tallies_json = serde_json::to_string(&stats.aggregate.status_tallies)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO template_stats \
             (snapshot_id, template_id, contract_count, field_sums_json, status_tallies_json, storage_path) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(snapshot_id, template_id) DO UPDATE SET \
             contract_count = excluded.contract_count, \
             field_sums_json = excluded.field_sums_json, \
             status_tallies_json = excluded.status_tallies_json, \
             storage_path = excluded.storage_path",
            params![
                stats.snapshot_id,
                stats.template_id,
                stats.aggregate.contract_count as i64,
                sums_json,
                tallies_json,
                stats.storage_path,
            ],
        )?;
        Ok(())
    }

    async fn template_stats(&self, snapshot_id: &str) -> Result<Vec<TemplateStatsRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT snapshot_id, template_id, contract_count, field_sums_json, status_tallies_json, storage_path \
             FROM template_stats WHERE snapshot_id = ?1 ORDER BY template_id",
        )?;
        let rows = stmt
            .query_map(params![snapshot_id], stats_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn delete_run(&self, id: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM template_stats WHERE snapshot_id = ?1", params![id])?;
        tx.execute("DELETE FROM snapshots WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
