//! Ledger query client
//!
//! `LedgerClient` is the seam between the sync engine and the ledger's
//! HTTP query surface; tests substitute scripted implementations.
//!
//! ## Endpoints
//!
//! - `GET  {base}/v0/state/acs/snapshot-timestamp?before=..&migration_id=..`
//! - `POST {base}/v0/state/acs`
//! - `POST {base}/v2/updates`

use super::backoff::ExponentialBackoff;
use super::types::{
    format_record_time, AcsPage, AcsRequest, SnapshotTimestampResponse, UpdatesPage,
    UpdatesRequest,
};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

/// Longest response body kept in an HTTP error message
const MAX_ERROR_BODY: usize = 2048;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Latest snapshot record time at or before `before` for a migration
    async fn snapshot_timestamp(
        &self,
        migration_id: u64,
        before: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// One page of the active contract set at a fixed record time
    async fn acs_page(&self, request: &AcsRequest) -> Result<AcsPage>;

    /// One page of updates after a cursor
    async fn updates_page(&self, request: &UpdatesRequest) -> Result<UpdatesPage>;
}

/// Retry settings applied per request
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// reqwest-backed client for the ledger query surface
#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    base_url: String,
    http: reqwest::Client,
    auth_token: Option<String>,
    retry: RetryPolicy,
}

impl HttpLedgerClient {
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            auth_token,
            retry,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(
            config.scan_url.clone(),
            config.auth_token.clone(),
            config.request_timeout,
            RetryPolicy {
                max_retries: config.max_retries,
                initial_delay_ms: config.retry_initial_delay_ms,
                max_delay_ms: config.retry_max_delay_ms,
            },
        )
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref token) = self.auth_token {
            req.bearer_auth(token)
        } else {
            req
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget is spent
    async fn with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff::new(
            self.retry.initial_delay_ms,
            self.retry.max_delay_ms,
            self.retry.max_retries,
        );

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    log::warn!("⚠️  {} failed (transient): {}", what, e);
                    if backoff.sleep().await.is_err() {
                        log::error!("❌ {} gave up after {} retries", what, backoff.attempts());
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let mut message = resp.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        return Err(SyncError::Http {
            status: status.as_u16(),
            message,
        });
    }
    Ok(resp.json::<T>().await?)
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn snapshot_timestamp(
        &self,
        migration_id: u64,
        before: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let url = format!(
            "{}/v0/state/acs/snapshot-timestamp?before={}&migration_id={}",
            self.base_url,
            format_record_time(&before),
            migration_id
        );

        let (this, url) = (self, url.as_str());
        let body: SnapshotTimestampResponse = self
            .with_retry("snapshot-timestamp", move || async move {
                let resp = this.add_auth(this.http.get(url)).send().await?;
                read_json(resp).await
            })
            .await?;

        Ok(body.record_time)
    }

    async fn acs_page(&self, request: &AcsRequest) -> Result<AcsPage> {
        let url = format!("{}/v0/state/acs", self.base_url);
        let (this, url) = (self, url.as_str());
        self.with_retry("acs page", move || async move {
            let resp = this.add_auth(this.http.post(url)).json(request).send().await?;
            read_json(resp).await
        })
        .await
    }

    async fn updates_page(&self, request: &UpdatesRequest) -> Result<UpdatesPage> {
        let url = format!("{}/v2/updates", self.base_url);
        let (this, url) = (self, url.as_str());
        self.with_retry("updates page", move || async move {
            let resp = this.add_auth(this.http.post(url)).json(request).send().await?;
            read_json(resp).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpLedgerClient::new(
            "https://scan.example/api/scan/",
            None,
            Duration::from_secs(5),
            RetryPolicy::default(),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://scan.example/api/scan");
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let client = HttpLedgerClient::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(1),
            RetryPolicy { max_retries: 5, initial_delay_ms: 1, max_delay_ms: 1 },
        )
        .unwrap();

        let counter = std::sync::atomic::AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = client
            .with_retry("test", move || async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(SyncError::Http { status: 400, message: "bad".into() })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_spends_budget_on_transient_error() {
        let client = HttpLedgerClient::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(1),
            RetryPolicy { max_retries: 2, initial_delay_ms: 1, max_delay_ms: 2 },
        )
        .unwrap();

        let counter = std::sync::atomic::AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = client
            .with_retry("test", move || async move {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err(SyncError::Http { status: 503, message: "busy".into() })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
