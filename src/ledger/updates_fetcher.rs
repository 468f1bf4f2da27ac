//! Incremental update pagination
//!
//! Walks updates after a watermark until an empty page. Each update is
//! classified into created/archived contract events (payloads kept whole for
//! reconciliation) plus the exercised events burn accounting looks at.
//!
//! Updates sharing the watermark's record time are told apart by id. Within
//! one fetch every id applied at the current watermark time is remembered,
//! so a server that re-serves earlier same-timestamp updates does not get
//! them applied (or their burn counted) twice. Across runs only the
//! persisted `last_update_id` is known.

use super::client::LedgerClient;
use super::types::{
    format_record_time, Contract, ExercisedEvent, LedgerUpdate, TreeEvent, UpdatesAfter,
    UpdatesRequest,
};
use crate::error::{Result, SyncError};
use crate::sync::progress::{Phase, ProgressObserver};
use crate::sync::state::{SyncRunState, UpdateCursor};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub enum ContractEvent {
    Created(Contract),
    Archived {
        contract_id: String,
        template_id: String,
    },
}

impl ContractEvent {
    pub fn contract_id(&self) -> &str {
        match self {
            ContractEvent::Created(c) => &c.contract_id,
            ContractEvent::Archived { contract_id, .. } => contract_id,
        }
    }

    pub fn template_id(&self) -> &str {
        match self {
            ContractEvent::Created(c) => &c.template_id,
            ContractEvent::Archived { template_id, .. } => template_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateTally {
    pub created: u64,
    pub archived: u64,
}

/// An update reduced to what reconciliation and burn accounting need
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedUpdate {
    pub update_id: String,
    pub record_time: DateTime<Utc>,
    pub migration_id: Option<u64>,
    pub is_reassignment: bool,
    /// Contract events in arrival order
    pub events: Vec<ContractEvent>,
    pub exercised: Vec<ExercisedEvent>,
}

impl ClassifiedUpdate {
    pub fn classify(update: LedgerUpdate) -> Self {
        match update {
            LedgerUpdate::Transaction {
                update_id,
                record_time,
                migration_id,
                events,
            } => {
                let mut contract_events = Vec::with_capacity(events.len());
                let mut exercised = Vec::new();
                for (_, event) in events {
                    match event {
                        TreeEvent::CreatedEvent(contract) => {
                            contract_events.push(ContractEvent::Created(contract));
                        }
                        TreeEvent::ArchivedEvent(archived) => {
                            contract_events.push(ContractEvent::Archived {
                                contract_id: archived.contract_id,
                                template_id: archived.template_id,
                            });
                        }
                        TreeEvent::ExercisedEvent(ex) => {
                            if ex.consuming {
                                contract_events.push(ContractEvent::Archived {
                                    contract_id: ex.contract_id.clone(),
                                    template_id: ex.template_id.clone(),
                                });
                            }
                            exercised.push(ex);
                        }
                    }
                }
                Self {
                    update_id,
                    record_time,
                    migration_id,
                    is_reassignment: false,
                    events: contract_events,
                    exercised,
                }
            }
            LedgerUpdate::Reassignment {
                update_id,
                record_time,
                migration_id,
                created,
            } => Self {
                update_id,
                record_time,
                migration_id,
                is_reassignment: true,
                events: created.into_iter().map(ContractEvent::Created).collect(),
                exercised: Vec::new(),
            },
        }
    }

    /// Created/archived counts per template
    pub fn tally_into(&self, tallies: &mut BTreeMap<String, TemplateTally>) {
        for event in &self.events {
            let tally = tallies.entry(event.template_id().to_string()).or_default();
            match event {
                ContractEvent::Created(_) => tally.created += 1,
                ContractEvent::Archived { .. } => tally.archived += 1,
            }
        }
    }
}

/// One fetched page, classified
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    pub updates: Vec<ClassifiedUpdate>,
    pub tallies: BTreeMap<String, TemplateTally>,
}

pub struct UpdatesFetcher<'a> {
    client: &'a dyn LedgerClient,
    observer: &'a dyn ProgressObserver,
    page_size: usize,
    max_pages: u64,
    pages: u64,
    finished: bool,
    watermark_time: Option<DateTime<Utc>>,
    /// Update ids already applied at `watermark_time`
    seen_at_watermark: HashSet<String>,
}

impl<'a> UpdatesFetcher<'a> {
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
            pages: 0,
            finished: false,
            watermark_time: None,
            seen_at_watermark: HashSet::new(),
        }
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    fn seen_before(&self, update: &LedgerUpdate) -> bool {
        self.watermark_time == Some(update.record_time())
            && self.seen_at_watermark.contains(update.update_id())
    }

    fn remember(&mut self, update_id: &str, record_time: DateTime<Utc>) {
        if self.watermark_time.map_or(true, |t| record_time > t) {
            self.seen_at_watermark.clear();
            self.watermark_time = Some(record_time);
        }
        if self.watermark_time == Some(record_time) {
            self.seen_at_watermark.insert(update_id.to_string());
        }
    }

    /// Next page of updates after `state.update_cursor`, or `None` once a
    /// page comes back empty
    ///
    /// Updates at or before the watermark are dropped. A non-empty page that
    /// leaves the watermark where it was is a stalled loop and ends the fetch.
    pub async fn next_page(&mut self, state: &mut SyncRunState) -> Result<Option<UpdateBatch>> {
        if self.finished {
            return Ok(None);
        }
        state.cancel.check()?;
        if self.pages >= self.max_pages {
            return Err(SyncError::PageLimitExceeded(self.max_pages));
        }

        let cursor = state.update_cursor.clone();
        if self.watermark_time.is_none() {
            if let Some(UpdateCursor { record_time, update_id: Some(ref id), .. }) = cursor {
                self.remember(id, record_time);
            }
        }
        let request = UpdatesRequest {
            after: cursor.as_ref().map(|c| UpdatesAfter {
                after_migration_id: c.migration_id,
                after_record_time: format_record_time(&c.record_time),
            }),
            page_size: self.page_size,
        };

        let page = self.client.updates_page(&request).await?;
        self.pages += 1;

        if page.updates.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        let raw_count = page.updates.len();

        let mut batch = UpdateBatch::default();
        for raw in page.updates {
            let Some(update) = LedgerUpdate::from_raw(raw) else {
                continue;
            };
            let replayed = self.seen_before(&update)
                || cursor.as_ref().is_some_and(|c| !is_after(&update, c));
            if replayed {
                log::debug!("   ├─ dropping replayed update {}", update.update_id());
                continue;
            }
            self.remember(update.update_id(), update.record_time());
            let classified = ClassifiedUpdate::classify(update);
            classified.tally_into(&mut batch.tallies);
            batch.updates.push(classified);
        }

        let next = match batch.updates.last() {
            Some(last) => UpdateCursor {
                migration_id: last
                    .migration_id
                    .or(cursor.as_ref().map(|c| c.migration_id))
                    .unwrap_or(state.epoch.migration_id),
                record_time: last.record_time,
                update_id: Some(last.update_id.clone()),
            },
            None if raw_count > 0 && cursor.is_some() => {
                return Err(SyncError::StalledPagination {
                    cursor: cursor.map(|c| c.to_string()).unwrap_or_default(),
                    pages: self.pages,
                });
            }
            None => {
                // nothing usable on the page and no watermark to compare
                self.finished = true;
                return Ok(None);
            }
        };

        let events: usize = batch.updates.iter().map(|u| u.events.len()).sum();
        state.update_cursor = Some(next);
        state.record_page(events);
        self.observer
            .on_progress(Phase::Updates, state.pages_done, state.events_done);

        Ok(Some(batch))
    }
}

/// Whether an update lies strictly after the watermark
///
/// An update at exactly the watermark time counts as new when its id
/// differs from the watermark's; ids seen earlier in the same fetch are
/// filtered separately.
fn is_after(update: &LedgerUpdate, cursor: &UpdateCursor) -> bool {
    if cursor.update_id.as_deref() == Some(update.update_id()) {
        return false;
    }
    let migration = update.migration_id().unwrap_or(cursor.migration_id);
    (migration, update.record_time()) > (cursor.migration_id, cursor.record_time)
        || (migration == cursor.migration_id
            && update.record_time() == cursor.record_time
            && cursor.update_id.is_some())
}
