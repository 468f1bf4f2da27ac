//! Wire types for the ledger query surface
//!
//! Request/response shapes for the snapshot-timestamp, ACS and updates
//! endpoints, plus the typed `LedgerUpdate` the rest of the engine consumes.
//! Update payloads are parsed leniently: a malformed event or update is
//! logged and skipped instead of failing the whole page.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Ledger migration identifier plus its logical snapshot time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    pub migration_id: u64,
    pub record_time: DateTime<Utc>,
}

/// A live contract as returned by the ACS endpoint and stored in artifacts
///
/// `payload` holds the create-arguments untouched; typed access goes through
/// `sync::payload::ContractPayload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: String,
    pub template_id: String,
    #[serde(rename = "create_arguments", alias = "payload", default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Exercise of a choice on a contract; consuming exercises archive it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExercisedEvent {
    pub contract_id: String,
    #[serde(default)]
    pub template_id: String,
    pub choice: String,
    #[serde(default)]
    pub consuming: bool,
    #[serde(default)]
    pub choice_argument: Value,
    #[serde(default)]
    pub exercise_result: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArchivedEvent {
    pub contract_id: String,
    #[serde(default)]
    pub template_id: String,
}

/// One entry of a transaction's `events_by_id` map
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TreeEvent {
    CreatedEvent(Contract),
    ExercisedEvent(ExercisedEvent),
    ArchivedEvent(ArchivedEvent),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotTimestampResponse {
    #[serde(default)]
    pub record_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcsRequest {
    pub migration_id: u64,
    pub record_time: String,
    pub page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageRange {
    #[serde(default)]
    pub from: Option<u64>,
    #[serde(default)]
    pub to: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AcsPage {
    #[serde(default)]
    pub created_events: Vec<Contract>,
    #[serde(default)]
    pub range: Option<PageRange>,
    #[serde(default)]
    pub next_page_token: Option<u64>,
}

impl AcsPage {
    /// Cursor the page declares for the next request, if any
    pub fn declared_end(&self) -> Option<u64> {
        self.range
            .as_ref()
            .and_then(|r| r.to)
            .or(self.next_page_token)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatesAfter {
    pub after_migration_id: u64,
    pub after_record_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<UpdatesAfter>,
    pub page_size: usize,
}

/// Update as it appears on the wire, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUpdate {
    #[serde(default)]
    pub update_id: Option<String>,
    #[serde(default)]
    pub record_time: Option<String>,
    #[serde(default)]
    pub migration_id: Option<u64>,
    #[serde(default)]
    pub events_by_id: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub root_event_ids: Vec<String>,
    #[serde(default)]
    pub event: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatesPage {
    #[serde(default, alias = "transactions")]
    pub updates: Vec<RawUpdate>,
}

/// Validated ledger update
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerUpdate {
    /// Events in arrival order (ordered by their index within the update)
    Transaction {
        update_id: String,
        record_time: DateTime<Utc>,
        migration_id: Option<u64>,
        events: Vec<(String, TreeEvent)>,
    },
    /// Contract moving custody across domains
    Reassignment {
        update_id: String,
        record_time: DateTime<Utc>,
        migration_id: Option<u64>,
        created: Option<Contract>,
    },
}

impl LedgerUpdate {
    pub fn update_id(&self) -> &str {
        match self {
            LedgerUpdate::Transaction { update_id, .. } => update_id,
            LedgerUpdate::Reassignment { update_id, .. } => update_id,
        }
    }

    pub fn record_time(&self) -> DateTime<Utc> {
        match self {
            LedgerUpdate::Transaction { record_time, .. } => *record_time,
            LedgerUpdate::Reassignment { record_time, .. } => *record_time,
        }
    }

    pub fn migration_id(&self) -> Option<u64> {
        match self {
            LedgerUpdate::Transaction { migration_id, .. } => *migration_id,
            LedgerUpdate::Reassignment { migration_id, .. } => *migration_id,
        }
    }

    /// Validate a wire update; returns `None` (after logging) for shapes
    /// that carry neither a transaction nor a reassignment.
    pub fn from_raw(raw: RawUpdate) -> Option<Self> {
        let update_id = match raw.update_id {
            Some(id) if !id.is_empty() => id,
            _ => {
                log::warn!("⚠️  Skipping update without update_id");
                return None;
            }
        };

        let record_time = match raw.record_time.as_deref().map(parse_record_time) {
            Some(Some(t)) => t,
            _ => {
                log::warn!("⚠️  Skipping update {}: missing or invalid record_time", update_id);
                return None;
            }
        };

        if let Some(events_by_id) = raw.events_by_id {
            let mut events: Vec<(String, TreeEvent)> = Vec::with_capacity(events_by_id.len());
            for (event_id, value) in events_by_id {
                match serde_json::from_value::<TreeEvent>(value) {
                    Ok(event) => events.push((event_id, event)),
                    Err(e) => {
                        log::warn!("⚠️  Skipping event {} in update {}: {}", event_id, update_id, e);
                    }
                }
            }
            events.sort_by(|(a, _), (b, _)| event_order_key(a).cmp(&event_order_key(b)));

            return Some(LedgerUpdate::Transaction {
                update_id,
                record_time,
                migration_id: raw.migration_id,
                events,
            });
        }

        if let Some(event) = raw.event {
            let created_value = if let Some(inner) = event.get("created_event") {
                Some(inner.clone())
            } else if event.get("contract_id").is_some() && event.get("template_id").is_some() {
                Some(event)
            } else {
                None
            };

            let created = match created_value.map(serde_json::from_value::<Contract>) {
                Some(Ok(contract)) => Some(contract),
                Some(Err(e)) => {
                    log::warn!("⚠️  Unparseable reassignment payload in {}: {}", update_id, e);
                    None
                }
                None => None,
            };

            return Some(LedgerUpdate::Reassignment {
                update_id,
                record_time,
                migration_id: raw.migration_id,
                created,
            });
        }

        log::warn!("⚠️  Skipping update {}: neither events_by_id nor event present", update_id);
        None
    }
}

/// Sort key for event ids shaped like `#<update>:<index>`
///
/// Numeric suffixes order numerically so `:10` follows `:9`.
pub fn event_order_key(event_id: &str) -> (String, u64) {
    match event_id.rsplit_once(':') {
        Some((prefix, idx)) => match idx.parse::<u64>() {
            Ok(n) => (prefix.to_string(), n),
            Err(_) => (event_id.to_string(), 0),
        },
        None => (event_id.to_string(), 0),
    }
}

pub fn format_record_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_record_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
