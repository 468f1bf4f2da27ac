//! Sync runtime configuration from environment variables

use crate::error::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a synchronization run
///
/// Loaded from environment variables with sensible defaults. Only the ledger
/// endpoint (and the token, when `LEDGER_AUTH_REQUIRED=true`) is mandatory.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the ledger query surface
    pub scan_url: String,

    /// Bearer token sent with every ledger request
    pub auth_token: Option<String>,

    /// Path to SQLite metadata database
    pub db_path: String,

    /// Root directory for the filesystem blob store
    pub blob_root: String,

    /// Contracts requested per full snapshot page
    pub acs_page_size: usize,

    /// Updates requested per incremental page
    pub updates_page_size: usize,

    /// Entries per chunk artifact; larger datasets are written as manifests
    pub chunk_entries: usize,

    /// Simultaneous downloads admitted by the bounded scheduler
    pub download_concurrency: usize,

    pub max_acs_pages: u64,
    pub max_update_pages: u64,
    pub max_migration_probe: u64,

    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// Age after which a `processing` run record is treated as abandoned
    pub stale_run_after: Duration,

    /// Ignore prior completed runs and rebuild from a full snapshot
    pub force_full: bool,

    pub rust_log: String,
}

impl SyncConfig {
    /// Load configuration from the process environment
    ///
    /// Environment variables:
    /// - `LEDGER_SCAN_URL` (required)
    /// - `LEDGER_AUTH_TOKEN` (optional unless `LEDGER_AUTH_REQUIRED=true`)
    /// - `ACSFLOW_DB_PATH` (default: data/acsflow.db)
    /// - `ACSFLOW_BLOB_ROOT` (default: data/snapshots)
    /// - `ACS_PAGE_SIZE` (default: 1000)
    /// - `UPDATES_PAGE_SIZE` (default: 500)
    /// - `ARTIFACT_CHUNK_ENTRIES` (default: 5000)
    /// - `DOWNLOAD_CONCURRENCY` (default: 5)
    /// - `MAX_ACS_PAGES` / `MAX_UPDATE_PAGES` (default: 100000)
    /// - `MAX_MIGRATION_PROBE` (default: 64)
    /// - `REQUEST_TIMEOUT_SECS` (default: 60)
    /// - `REQUEST_MAX_RETRIES` (default: 3)
    /// - `RETRY_INITIAL_DELAY_MS` / `RETRY_MAX_DELAY_MS` (default: 500 / 10000)
    /// - `STALE_RUN_MINUTES` (default: 30)
    /// - `FORCE_FULL_SNAPSHOT` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let scan_url = lookup("LEDGER_SCAN_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingVariable("LEDGER_SCAN_URL".to_string()))?;

        if !scan_url.starts_with("http://") && !scan_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "LEDGER_SCAN_URL must start with http:// or https://".to_string(),
            ));
        }

        let auth_token = lookup("LEDGER_AUTH_TOKEN").filter(|s| !s.trim().is_empty());
        let auth_required: bool = parse_or(&lookup, "LEDGER_AUTH_REQUIRED", false);
        if auth_required && auth_token.is_none() {
            return Err(ConfigError::MissingVariable("LEDGER_AUTH_TOKEN".to_string()));
        }

        let acs_page_size: usize = parse_or(&lookup, "ACS_PAGE_SIZE", 1000);
        let updates_page_size: usize = parse_or(&lookup, "UPDATES_PAGE_SIZE", 500);
        let chunk_entries: usize = parse_or(&lookup, "ARTIFACT_CHUNK_ENTRIES", 5000);
        let download_concurrency: usize = parse_or(&lookup, "DOWNLOAD_CONCURRENCY", 5);

        Ok(Self {
            scan_url,
            auth_token,
            db_path: lookup("ACSFLOW_DB_PATH").unwrap_or_else(|| "data/acsflow.db".to_string()),
            blob_root: lookup("ACSFLOW_BLOB_ROOT")
                .unwrap_or_else(|| "data/snapshots".to_string()),
            acs_page_size: acs_page_size.clamp(1, 5000),
            updates_page_size: updates_page_size.clamp(1, 1000),
            chunk_entries: chunk_entries.max(1),
            download_concurrency: download_concurrency.clamp(1, 32),
            max_acs_pages: parse_or(&lookup, "MAX_ACS_PAGES", 100_000),
            max_update_pages: parse_or(&lookup, "MAX_UPDATE_PAGES", 100_000),
            max_migration_probe: parse_or(&lookup, "MAX_MIGRATION_PROBE", 64),
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 60)),
            max_retries: parse_or(&lookup, "REQUEST_MAX_RETRIES", 3),
            retry_initial_delay_ms: parse_or(&lookup, "RETRY_INITIAL_DELAY_MS", 500),
            retry_max_delay_ms: parse_or(&lookup, "RETRY_MAX_DELAY_MS", 10_000),
            stale_run_after: Duration::from_secs(
                parse_or::<u64, _>(&lookup, "STALE_RUN_MINUTES", 30) * 60,
            ),
            force_full: parse_or(&lookup, "FORCE_FULL_SNAPSHOT", false),
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => match raw.trim().to_lowercase().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid {} '{}', defaulting to {}", key, raw, default);
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config =
            SyncConfig::from_lookup(lookup_from(&[("LEDGER_SCAN_URL", "https://scan.example/api/scan/")]))
                .unwrap();

        assert_eq!(config.scan_url, "https://scan.example/api/scan");
        assert_eq!(config.auth_token, None);
        assert_eq!(config.db_path, "data/acsflow.db");
        assert_eq!(config.acs_page_size, 1000);
        assert_eq!(config.updates_page_size, 500);
        assert_eq!(config.chunk_entries, 5000);
        assert_eq!(config.download_concurrency, 5);
        assert_eq!(config.stale_run_after, Duration::from_secs(30 * 60));
        assert!(!config.force_full);
    }

    #[test]
    fn test_custom_config() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("LEDGER_SCAN_URL", "http://localhost:5012"),
            ("LEDGER_AUTH_TOKEN", "secret"),
            ("ACS_PAGE_SIZE", "250"),
            ("DOWNLOAD_CONCURRENCY", "100"),
            ("FORCE_FULL_SNAPSHOT", "TRUE"),
            ("UPDATES_PAGE_SIZE", "lots"),
        ]))
        .unwrap();

        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.acs_page_size, 250);
        assert_eq!(config.download_concurrency, 32);
        assert!(config.force_full);
        assert_eq!(config.updates_page_size, 500);
    }

    #[test]
    fn test_missing_url_is_fatal() {
        let err = SyncConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(ref v) if v == "LEDGER_SCAN_URL"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let err = SyncConfig::from_lookup(lookup_from(&[("LEDGER_SCAN_URL", "scan.example")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_required_token_missing() {
        let err = SyncConfig::from_lookup(lookup_from(&[
            ("LEDGER_SCAN_URL", "https://scan.example"),
            ("LEDGER_AUTH_REQUIRED", "true"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(ref v) if v == "LEDGER_AUTH_TOKEN"));
    }
}
