//! Contract map reconciliation
//!
//! The baseline contract set is keyed by normalized contract id; updates are
//! applied in arrival order. Creates overwrite and archives of absent ids are
//! no-ops, so replaying an update leaves the map unchanged.

use crate::ledger::types::Contract;
use crate::ledger::updates_fetcher::{ClassifiedUpdate, ContractEvent};
use std::collections::{BTreeMap, HashSet};

/// Canonical contract id: trimmed, leading `#` dropped, anything after the
/// first `:` (domain or package suffix) dropped, lowercased
pub fn normalize_contract_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('#').unwrap_or(trimmed);
    let base = match trimmed.split_once(':') {
        Some((head, _)) => head,
        None => trimmed,
    };
    base.to_ascii_lowercase()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    pub created: u64,
    pub replaced: u64,
    pub archived: u64,
    /// Archives naming an id the map did not hold
    pub archived_missing: u64,
}

impl DeltaStats {
    pub fn merge(&mut self, other: &DeltaStats) {
        self.created += other.created;
        self.replaced += other.replaced;
        self.archived += other.archived;
        self.archived_missing += other.archived_missing;
    }
}

/// Live contracts keyed by normalized id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractMap {
    contracts: BTreeMap<String, Contract>,
}

impl ContractMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline from a full snapshot; later duplicates win
    pub fn build_baseline(contracts: impl IntoIterator<Item = Contract>) -> Self {
        let mut map = Self::new();
        map.extend(contracts);
        map
    }

    pub fn extend(&mut self, contracts: impl IntoIterator<Item = Contract>) {
        for contract in contracts {
            self.insert(contract);
        }
    }

    /// Returns whether an existing entry was replaced
    pub fn insert(&mut self, contract: Contract) -> bool {
        let key = normalize_contract_id(&contract.contract_id);
        self.contracts.insert(key, contract).is_some()
    }

    pub fn remove(&mut self, contract_id: &str) -> Option<Contract> {
        self.contracts.remove(&normalize_contract_id(contract_id))
    }

    pub fn get(&self, contract_id: &str) -> Option<&Contract> {
        self.contracts.get(&normalize_contract_id(contract_id))
    }

    pub fn contains(&self, contract_id: &str) -> bool {
        self.get(contract_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Apply one update's events
    ///
    /// Events apply in arrival order, except that an archive of an id this
    /// same update also creates is held back until the update's creates are
    /// in, so the pair nets out to "gone".
    pub fn apply_delta(&mut self, update: &ClassifiedUpdate) -> DeltaStats {
        let created_here: HashSet<String> = update
            .events
            .iter()
            .filter_map(|e| match e {
                ContractEvent::Created(c) => Some(normalize_contract_id(&c.contract_id)),
                ContractEvent::Archived { .. } => None,
            })
            .collect();

        let mut stats = DeltaStats::default();
        let mut deferred: Vec<&str> = Vec::new();

        for event in &update.events {
            match event {
                ContractEvent::Created(contract) => {
                    if self.insert(contract.clone()) {
                        stats.replaced += 1;
                    } else {
                        stats.created += 1;
                    }
                }
                ContractEvent::Archived { contract_id, .. } => {
                    if created_here.contains(&normalize_contract_id(contract_id)) {
                        deferred.push(contract_id);
                    } else {
                        self.archive(contract_id, &mut stats);
                    }
                }
            }
        }

        for contract_id in deferred {
            self.archive(contract_id, &mut stats);
        }

        stats
    }

    fn archive(&mut self, contract_id: &str, stats: &mut DeltaStats) {
        if self.remove(contract_id).is_some() {
            stats.archived += 1;
        } else {
            stats.archived_missing += 1;
        }
    }

    /// Consume the map into per-template datasets, for artifact
    /// materialisation
    pub fn into_templates(self) -> BTreeMap<String, Vec<Contract>> {
        let mut grouped: BTreeMap<String, Vec<Contract>> = BTreeMap::new();
        for contract in self.contracts.into_values() {
            grouped
                .entry(contract.template_id.clone())
                .or_default()
                .push(contract);
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn contract(id: &str, amount: &str) -> Contract {
        Contract {
            contract_id: id.to_string(),
            template_id: "pkg:Splice.Amulet:Amulet".to_string(),
            payload: json!({"amount": {"initialAmount": amount}}),
            created_at: None,
        }
    }

    fn archived(id: &str) -> ContractEvent {
        ContractEvent::Archived {
            contract_id: id.to_string(),
            template_id: "pkg:Splice.Amulet:Amulet".to_string(),
        }
    }

    fn update(events: Vec<ContractEvent>) -> ClassifiedUpdate {
        ClassifiedUpdate {
            update_id: "u1".to_string(),
            record_time: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            migration_id: Some(1),
            is_reassignment: false,
            events,
            exercised: Vec::new(),
        }
    }

    #[test]
    fn test_normalize_contract_id() {
        assert_eq!(normalize_contract_id("#00ABcd:domain::1220"), "00abcd");
        assert_eq!(normalize_contract_id("  00abcd "), "00abcd");
        assert_eq!(normalize_contract_id("00ABCD"), "00abcd");
    }

    #[test]
    fn test_baseline_last_write_wins() {
        let map = ContractMap::build_baseline(vec![
            contract("00AA", "1.0"),
            contract("#00aa", "2.0"),
            contract("00bb", "3.0"),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("00aa").unwrap().payload["amount"]["initialAmount"], "2.0");
    }

    #[test]
    fn test_apply_delta_is_idempotent() {
        let mut map = ContractMap::build_baseline(vec![contract("00aa", "1.0"), contract("00bb", "2.0")]);
        let delta = update(vec![
            ContractEvent::Created(contract("00cc", "3.0")),
            archived("#00AA"),
        ]);

        let first = map.apply_delta(&delta);
        assert_eq!(first.created, 1);
        assert_eq!(first.archived, 1);
        let after_once = map.clone();

        let second = map.apply_delta(&delta);
        assert_eq!(map, after_once);
        assert_eq!(second.replaced, 1);
        assert_eq!(second.archived_missing, 1);
        assert!(!map.contains("00aa"));
        assert!(map.contains("00CC"));
    }

    #[test]
    fn test_create_and_archive_in_same_update_nets_out() {
        let mut map = ContractMap::new();
        // archive arrives before the create of the same id
        let delta = update(vec![archived("00dd"), ContractEvent::Created(contract("00dd", "1.0"))]);

        let stats = map.apply_delta(&delta);
        assert!(map.is_empty());
        assert_eq!(stats.created, 1);
        assert_eq!(stats.archived, 1);
    }

    #[test]
    fn test_group_by_template() {
        let mut locked = contract("00ee", "4.0");
        locked.template_id = "pkg:Splice.Amulet:LockedAmulet".to_string();
        let map = ContractMap::build_baseline(vec![contract("00aa", "1.0"), locked]);

        let grouped = map.into_templates();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["pkg:Splice.Amulet:Amulet"].len(), 1);
        assert_eq!(grouped["pkg:Splice.Amulet:LockedAmulet"][0].contract_id, "00ee");
    }
}
