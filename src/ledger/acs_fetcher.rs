//! Full snapshot pagination
//!
//! Pages through the active contract set at a fixed record time. The cursor
//! moves to each page's declared range end (or `offset + page length` when
//! the page declares none) and must strictly advance; a short page ends the
//! fetch.
//!
//! Some deployments reject a page with a message like
//! `range (500 to 1000)` when the requested offset is stale. That names a
//! valid contiguous range, so the fetch resumes from its start instead of
//! failing. When that start lies behind offsets already returned, the
//! re-served records up to the previous high-water offset are dropped, so
//! every contract position is handed out once.

use super::client::LedgerClient;
use super::types::{format_record_time, AcsRequest, Contract};
use crate::error::{Result, SyncError};
use crate::sync::progress::{Phase, ProgressObserver};
use crate::sync::state::SyncRunState;
use regex::Regex;
use std::sync::OnceLock;

fn range_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"range \((\d+) to (\d+)\)").ok())
        .as_ref()
}

/// Resume offset encoded in a vendor range error, if any
pub fn recoverable_range_start(error: &SyncError) -> Option<u64> {
    let message = error.to_string();
    let caps = range_pattern()?.captures(&message)?;
    let start: u64 = caps.get(1)?.as_str().parse().ok()?;
    let end: u64 = caps.get(2)?.as_str().parse().ok()?;
    (start <= end).then_some(start)
}

/// Totals for one completed full fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcsFetchStats {
    pub pages: u64,
    pub contracts: u64,
    pub range_recoveries: u64,
    /// Records re-served after a backwards range recovery and dropped
    pub replayed: u64,
}

pub struct AcsFetcher<'a> {
    client: &'a dyn LedgerClient,
    observer: &'a dyn ProgressObserver,
    page_size: usize,
    max_pages: u64,
    finished: bool,
    last_recovery: Option<u64>,
    /// Highest offset already handed out
    high_water: u64,
    stats: AcsFetchStats,
}

impl<'a> AcsFetcher<'a> {
    pub fn new(
        client: &'a dyn LedgerClient,
        observer: &'a dyn ProgressObserver,
        page_size: usize,
        max_pages: u64,
    ) -> Self {
        Self {
            client,
            observer,
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
            finished: false,
            last_recovery: None,
            high_water: 0,
            stats: AcsFetchStats::default(),
        }
    }

    pub fn stats(&self) -> &AcsFetchStats {
        &self.stats
    }

    fn stalled(state: &SyncRunState, cursor: u64) -> SyncError {
        SyncError::StalledPagination {
            cursor: cursor.to_string(),
            pages: state.pages_done,
        }
    }

    /// Next page of contracts, or `None` once the set is exhausted
    ///
    /// Advances `state.acs_cursor`. The cancel flag is checked before each
    /// request; a stalled cursor or the page ceiling ends the fetch with an
    /// error.
    pub async fn next_page(&mut self, state: &mut SyncRunState) -> Result<Option<Vec<Contract>>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            state.cancel.check()?;

            let attempts = self.stats.pages + self.stats.range_recoveries;
            if attempts >= self.max_pages {
                return Err(SyncError::PageLimitExceeded(self.max_pages));
            }

            let request = AcsRequest {
                migration_id: state.epoch.migration_id,
                record_time: format_record_time(&state.epoch.record_time),
                page_size: self.page_size,
                after: state.acs_cursor,
            };

            let page = match self.client.acs_page(&request).await {
                Ok(page) => page,
                Err(e) => match recoverable_range_start(&e) {
                    Some(start) => {
                        if self.last_recovery == Some(start) {
                            // the same recovery twice in a row makes no progress
                            return Err(Self::stalled(state, start));
                        }
                        log::warn!(
                            "⚠️  ACS range error at {:?}; resuming from {}",
                            state.acs_cursor,
                            start
                        );
                        self.last_recovery = Some(start);
                        self.stats.range_recoveries += 1;
                        state.acs_cursor = Some(start);
                        continue;
                    }
                    None => return Err(e),
                },
            };
            self.last_recovery = None;

            let count = page.created_events.len();
            let offset = state.acs_cursor.unwrap_or(0);
            let next = page.declared_end().unwrap_or(offset + count as u64);

            if count < self.page_size {
                self.finished = true;
            } else if state.acs_cursor == Some(next) || next < offset {
                return Err(Self::stalled(state, next));
            }

            let mut contracts = page.created_events;
            let overlap = self.high_water.saturating_sub(offset).min(count as u64) as usize;
            if overlap > 0 {
                log::debug!(
                    "   ├─ dropping {} records below high-water offset {}",
                    overlap,
                    self.high_water
                );
                contracts.drain(..overlap);
                self.stats.replayed += overlap as u64;
            }
            self.high_water = self.high_water.max(next).max(offset + count as u64);

            state.acs_cursor = Some(next);
            state.record_page(contracts.len());
            self.stats.pages += 1;
            self.stats.contracts += contracts.len() as u64;
            self.observer
                .on_progress(Phase::FullSnapshot, state.pages_done, state.events_done);

            if count == 0 {
                return Ok(None);
            }
            return Ok(Some(contracts));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{AcsPage, Epoch, PageRange, UpdatesPage, UpdatesRequest};
    use crate::sync::progress::CountingProgress;
    use crate::sync::state::{CancelFlag, RunMode};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Reply {
        Page { count: usize, to: Option<u64> },
        Fail(SyncError),
    }

    /// Replays scripted ACS replies and records each `after` it was asked for
    struct ScriptedAcs {
        replies: Mutex<VecDeque<Reply>>,
        requested: Mutex<Vec<Option<u64>>>,
    }

    impl ScriptedAcs {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<Option<u64>> {
            self.requested.lock().unwrap().clone()
        }
    }

    fn contracts(start: u64, count: usize) -> Vec<Contract> {
        (0..count as u64)
            .map(|i| Contract {
                contract_id: format!("{:08x}", start + i),
                template_id: "pkg:Splice.Amulet:Amulet".to_string(),
                payload: json!({"amount": {"initialAmount": "1.0"}}),
                created_at: None,
            })
            .collect()
    }

    #[async_trait]
    impl LedgerClient for ScriptedAcs {
        async fn snapshot_timestamp(&self, _: u64, _: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn acs_page(&self, request: &AcsRequest) -> Result<AcsPage> {
            self.requested.lock().unwrap().push(request.after);
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Page { count, to }) => Ok(AcsPage {
                    created_events: contracts(request.after.unwrap_or(0), count),
                    range: to.map(|to| PageRange { from: request.after, to: Some(to) }),
                    next_page_token: None,
                }),
                Some(Reply::Fail(e)) => Err(e),
                None => Ok(AcsPage::default()),
            }
        }

        async fn updates_page(&self, _: &UpdatesRequest) -> Result<UpdatesPage> {
            Ok(UpdatesPage::default())
        }
    }

    fn run_state() -> SyncRunState {
        let epoch = Epoch {
            migration_id: 3,
            record_time: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        };
        SyncRunState::new("snap-test", RunMode::Full, epoch, CancelFlag::new())
    }

    async fn drain(fetcher: &mut AcsFetcher<'_>, state: &mut SyncRunState) -> Result<u64> {
        let mut total = 0u64;
        while let Some(page) = fetcher.next_page(state).await? {
            total += page.len() as u64;
        }
        Ok(total)
    }

    #[tokio::test]
    async fn test_pages_until_short_page() {
        let client = ScriptedAcs::new(vec![
            Reply::Page { count: 4, to: Some(4) },
            Reply::Page { count: 4, to: None },
            Reply::Page { count: 1, to: Some(9) },
        ]);
        let progress = CountingProgress::default();
        let mut fetcher = AcsFetcher::new(&client, &progress, 4, 100);
        let mut state = run_state();

        let total = drain(&mut fetcher, &mut state).await.unwrap();

        assert_eq!(total, 9);
        assert_eq!(client.requested(), vec![None, Some(4), Some(8)]);
        assert_eq!(state.acs_cursor, Some(9));
        assert_eq!(fetcher.stats().pages, 3);
        assert_eq!(progress.last_events.load(std::sync::atomic::Ordering::Relaxed), 9);
    }

    #[tokio::test]
    async fn test_range_error_resumes_from_start() {
        let client = ScriptedAcs::new(vec![
            Reply::Page { count: 500, to: Some(500) },
            Reply::Fail(SyncError::Http {
                status: 400,
                message: "requested offset outside range (500 to 1000)".to_string(),
            }),
            Reply::Page { count: 200, to: Some(700) },
        ]);
        let progress = CountingProgress::default();
        let mut fetcher = AcsFetcher::new(&client, &progress, 500, 100);
        let mut state = run_state();

        let total = drain(&mut fetcher, &mut state).await.unwrap();

        assert_eq!(total, 700);
        assert_eq!(client.requested(), vec![None, Some(500), Some(500)]);
        assert_eq!(fetcher.stats().range_recoveries, 1);
    }

    #[tokio::test]
    async fn test_backwards_range_recovery_skips_served_records() {
        let client = ScriptedAcs::new(vec![
            Reply::Page { count: 4, to: Some(4) },
            Reply::Page { count: 4, to: Some(8) },
            Reply::Fail(SyncError::Http {
                status: 400,
                message: "range (4 to 13)".to_string(),
            }),
            Reply::Page { count: 4, to: Some(8) },
            Reply::Page { count: 4, to: Some(12) },
            Reply::Page { count: 1, to: Some(13) },
        ]);
        let progress = CountingProgress::default();
        let mut fetcher = AcsFetcher::new(&client, &progress, 4, 100);
        let mut state = run_state();

        let mut ids = Vec::new();
        while let Some(page) = fetcher.next_page(&mut state).await.unwrap() {
            ids.extend(page.into_iter().map(|c| c.contract_id));
        }

        assert_eq!(client.requested(), vec![None, Some(4), Some(8), Some(4), Some(8), Some(12)]);
        assert_eq!(ids.len(), 13);
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 13);
        assert_eq!(fetcher.stats().replayed, 4);
        assert_eq!(fetcher.stats().contracts, 13);
        assert_eq!(state.events_done, 13);
    }

    #[tokio::test]
    async fn test_identical_cursor_aborts() {
        let client = ScriptedAcs::new(vec![
            Reply::Page { count: 2, to: Some(1000) },
            Reply::Page { count: 2, to: Some(1000) },
            Reply::Page { count: 2, to: Some(1000) },
        ]);
        let progress = CountingProgress::default();
        let mut fetcher = AcsFetcher::new(&client, &progress, 2, 100);
        let mut state = run_state();

        let first = fetcher.next_page(&mut state).await.unwrap();
        assert_eq!(first.map(|p| p.len()), Some(2));

        let err = fetcher.next_page(&mut state).await.unwrap_err();
        assert!(matches!(err, SyncError::StalledPagination { .. }));
        assert_eq!(client.requested().len(), 2);
        assert_eq!(state.events_done, 2);
    }

    #[tokio::test]
    async fn test_repeated_range_error_aborts() {
        let range_err = || SyncError::Http {
            status: 400,
            message: "range (10 to 20)".to_string(),
        };
        let client = ScriptedAcs::new(vec![Reply::Fail(range_err()), Reply::Fail(range_err())]);
        let progress = CountingProgress::default();
        let mut fetcher = AcsFetcher::new(&client, &progress, 5, 100);
        let mut state = run_state();

        let err = fetcher.next_page(&mut state).await.unwrap_err();
        assert!(matches!(err, SyncError::StalledPagination { .. }));
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let client = ScriptedAcs::new(vec![Reply::Fail(SyncError::Http {
            status: 503,
            message: "unavailable".to_string(),
        })]);
        let progress = CountingProgress::default();
        let mut fetcher = AcsFetcher::new(&client, &progress, 5, 100);
        let mut state = run_state();

        let err = fetcher.next_page(&mut state).await.unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_page_ceiling_and_cancel() {
        let client = ScriptedAcs::new(vec![
            Reply::Page { count: 1, to: Some(1) },
            Reply::Page { count: 1, to: Some(2) },
        ]);
        let progress = CountingProgress::default();
        let mut fetcher = AcsFetcher::new(&client, &progress, 1, 1);
        let mut state = run_state();

        assert!(fetcher.next_page(&mut state).await.unwrap().is_some());
        let err = fetcher.next_page(&mut state).await.unwrap_err();
        assert!(matches!(err, SyncError::PageLimitExceeded(1)));

        let mut fetcher = AcsFetcher::new(&client, &progress, 1, 10);
        let mut state = run_state();
        state.cancel.cancel();
        assert!(matches!(
            fetcher.next_page(&mut state).await,
            Err(SyncError::Cancelled)
        ));
    }

    #[test]
    fn test_range_start_parsing() {
        let err = SyncError::Transport {
            message: "bad request: range (42 to 99)".into(),
            transient: false,
        };
        assert_eq!(recoverable_range_start(&err), Some(42));
        assert_eq!(recoverable_range_start(&SyncError::NoEpochFound), None);
    }
}
