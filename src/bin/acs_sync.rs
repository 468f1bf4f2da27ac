//! ACS Sync - one snapshot synchronization run per invocation
//!
//! Usage:
//!   cargo run --release --bin acs_sync
//!   cargo run --release --bin acs_sync -- --purge <snapshot_id>
//!
//! Environment variables (see `SyncConfig::from_env`):
//!   LEDGER_SCAN_URL - Ledger query endpoint (required)
//!   LEDGER_AUTH_TOKEN - Bearer token
//!   ACSFLOW_DB_PATH - SQLite metadata path (default: data/acsflow.db)
//!   ACSFLOW_BLOB_ROOT - Artifact directory (default: data/snapshots)
//!   RUST_LOG - Log filter (default: info)
//!
//! Exit codes: 0 completed, 1 run failed, 2 another run in progress,
//! 3 configuration error.

use acsflow::ledger::HttpLedgerClient;
use acsflow::storage::{FsBlobStore, SqliteMetadataStore};
use acsflow::sync::CancelFlag;
use acsflow::{SyncConfig, SyncEngine, SyncError};
use dotenv::dotenv;
use log::{error, info, warn};
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_FAILED: u8 = 1;
const EXIT_IN_PROGRESS: u8 = 2;
const EXIT_CONFIG: u8 = 3;

enum Command {
    Sync,
    Purge(String),
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(Command::Sync),
        [flag, id] if flag == "--purge" => Ok(Command::Purge(id.clone())),
        _ => Err(format!(
            "unrecognised arguments {:?}; usage: acs_sync [--purge <snapshot_id>]",
            args
        )),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("⚠️  SIGTERM handler unavailable: {}", e),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

fn exit_code_for(e: &SyncError) -> u8 {
    match e {
        SyncError::Config(_) => EXIT_CONFIG,
        SyncError::AlreadyInProgress(_) => EXIT_IN_PROGRESS,
        _ => EXIT_FAILED,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let command = match parse_args() {
        Ok(c) => c,
        Err(msg) => {
            error!("❌ {}", msg);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let config = match SyncConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    info!("🚀 ACS Sync");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Artifacts: {}", config.blob_root);
    info!("   └─ Download concurrency: {}", config.download_concurrency);

    let client = match HttpLedgerClient::from_config(&config) {
        Ok(c) => c,
        Err(e) => {
            error!("❌ Failed to build ledger client: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let meta = match SqliteMetadataStore::open(&config.db_path) {
        Ok(m) => m,
        Err(e) => {
            error!("❌ Failed to open metadata store: {}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };
    let blobs = FsBlobStore::new(&config.blob_root);

    let cancel = CancelFlag::new();
    let engine = SyncEngine::new(config, Arc::new(client), Arc::new(blobs), Arc::new(meta))
        .with_cancel_flag(cancel.clone());

    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("🛑 Shutdown requested; stopping after the current page");
        cancel.cancel();
    });

    match command {
        Command::Purge(id) => match engine.purge_snapshot(&id).await {
            Ok(n) => {
                info!("✅ Purged {} ({} blobs)", id, n);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("❌ Purge of {} failed: {}", id, e);
                ExitCode::from(exit_code_for(&e))
            }
        },
        Command::Sync => match engine.run_sync().await {
            Ok(summary) if summary.is_completed() => {
                info!("✅ Snapshot {} ({})", summary.snapshot_id, summary.mode.as_str());
                info!("   ├─ Contracts: {}", summary.entry_count);
                if let Some(supply) = summary.supply {
                    info!("   ├─ Circulating supply: {}", supply.circulating_supply);
                }
                info!(
                    "   └─ Burn: {} ({} mismatches)",
                    summary.burn.burn_total, summary.burn.mismatches
                );
                ExitCode::SUCCESS
            }
            Ok(summary) => {
                error!(
                    "❌ Snapshot {} failed: {}",
                    summary.snapshot_id,
                    summary.error_message.as_deref().unwrap_or("unknown error")
                );
                ExitCode::from(EXIT_FAILED)
            }
            Err(e) => {
                error!("❌ Sync did not start: {}", e);
                ExitCode::from(exit_code_for(&e))
            }
        },
    }
}
