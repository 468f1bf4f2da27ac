//! Streaming aggregation over stored artifacts
//!
//! `TemplateAggregate` is a monoid: aggregates of disjoint record sets add
//! up to the aggregate of their union, so chunks and pages can be folded in
//! any order and resumed runs can merge partial results.

use crate::error::{Result, SyncError};
use crate::ledger::template::{template_matches_suffix, AMULET_TEMPLATE, LOCKED_AMULET_TEMPLATE};
use crate::ledger::types::Contract;
use crate::storage::blob::BlobStore;
use crate::storage::codec::{is_chunk_path, ArtifactReader};
use crate::storage::metadata::MetadataStore;
use crate::sync::payload::{amulet_amount, locked_amount, status_chain, ContractPayload};
use crate::sync::scheduler::BoundedScheduler;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::Arc;

/// Field name under which holding amounts are summed
pub const AMOUNT_FIELD: &str = "amount";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateAggregate {
    pub contract_count: u64,
    pub field_sums: BTreeMap<String, f64>,
    pub status_tallies: BTreeMap<String, u64>,
}

impl TemplateAggregate {
    pub fn observe(&mut self, contract: &Contract) {
        self.contract_count += 1;
        if let Some(amount) = ContractPayload::classify(contract).amount() {
            *self.field_sums.entry(AMOUNT_FIELD.to_string()).or_insert(0.0) += amount;
        }
        if let Some(status) = status_chain().extract(&contract.payload) {
            *self.status_tallies.entry(status).or_insert(0) += 1;
        }
    }

    pub fn from_contracts<'a>(contracts: impl IntoIterator<Item = &'a Contract>) -> Self {
        let mut agg = Self::default();
        for contract in contracts {
            agg.observe(contract);
        }
        agg
    }

    pub fn merge(&mut self, other: &TemplateAggregate) {
        self.contract_count += other.contract_count;
        for (field, sum) in &other.field_sums {
            *self.field_sums.entry(field.clone()).or_insert(0.0) += sum;
        }
        for (status, n) in &other.status_tallies {
            *self.status_tallies.entry(status.clone()).or_insert(0) += n;
        }
    }

    pub fn field_sum(&self, field: &str) -> f64 {
        self.field_sums.get(field).copied().unwrap_or(0.0)
    }
}

impl AddAssign<&TemplateAggregate> for TemplateAggregate {
    fn add_assign(&mut self, rhs: &TemplateAggregate) {
        self.merge(rhs);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SumResult {
    pub sum: f64,
    pub count: u64,
    pub template_count: usize,
}

impl SumResult {
    /// Fold `pick` over one batch of records
    pub fn absorb<P>(&mut self, contracts: &[Contract], pick: &P)
    where
        P: Fn(&Contract) -> Option<f64>,
    {
        for contract in contracts {
            self.count += 1;
            if let Some(value) = pick(contract) {
                self.sum += value;
            }
        }
    }

    pub fn merge(&mut self, other: &SumResult) {
        self.sum += other.sum;
        self.count += other.count;
        self.template_count += other.template_count;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SupplyTotals {
    pub amulet_total: f64,
    pub locked_total: f64,
    pub circulating_supply: f64,
}

impl SupplyTotals {
    pub fn new(amulet_total: f64, locked_total: f64) -> Self {
        Self {
            amulet_total,
            locked_total,
            circulating_supply: amulet_total - locked_total,
        }
    }
}

/// A template matched for aggregation and where its artifact lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub template_id: String,
    pub storage_path: String,
}

pub struct Aggregator {
    blobs: Arc<dyn BlobStore>,
    meta: Arc<dyn MetadataStore>,
    reader: ArtifactReader,
}

impl Aggregator {
    pub fn new(blobs: Arc<dyn BlobStore>, meta: Arc<dyn MetadataStore>, scheduler: BoundedScheduler) -> Self {
        let reader = ArtifactReader::new(blobs.clone(), scheduler);
        Self { blobs, meta, reader }
    }

    /// Every template artifact of a snapshot
    ///
    /// Template stats rows are authoritative; snapshots written without them
    /// fall back to listing top-level artifacts, whose file names carry the
    /// dot-separated template id.
    pub async fn snapshot_templates(&self, snapshot_id: &str) -> Result<Vec<ResolvedTemplate>> {
        let stats = self.meta.template_stats(snapshot_id).await?;
        if !stats.is_empty() {
            return Ok(stats
                .into_iter()
                .map(|s| ResolvedTemplate {
                    template_id: s.template_id,
                    storage_path: s.storage_path,
                })
                .collect());
        }

        let prefix = format!("{}/", snapshot_id);
        let listed = self.blobs.list(&prefix).await?;
        Ok(listed
            .into_iter()
            .filter(|entry| !is_chunk_path(&entry.path))
            .filter_map(|entry| {
                let name = entry.path.strip_prefix(&prefix)?.strip_suffix(".json")?;
                if name.contains('/') {
                    return None;
                }
                Some(ResolvedTemplate {
                    template_id: name.to_string(),
                    storage_path: entry.path.clone(),
                })
            })
            .collect())
    }

    /// Templates of a snapshot whose id ends with `suffix`
    pub async fn resolve_templates(&self, snapshot_id: &str, suffix: &str) -> Result<Vec<ResolvedTemplate>> {
        let mut templates = self.snapshot_templates(snapshot_id).await?;
        templates.retain(|t| template_matches_suffix(&t.template_id, suffix));
        Ok(templates)
    }

    pub fn reader(&self) -> &ArtifactReader {
        &self.reader
    }

    /// Fold `pick` over every record of every matching template
    ///
    /// Records are consumed chunk by chunk; at most the chunks in flight are
    /// held in memory. A missing artifact contributes nothing.
    pub async fn sum<P>(&self, snapshot_id: &str, suffix: &str, pick: P) -> Result<SumResult>
    where
        P: Fn(&Contract) -> Option<f64>,
    {
        let templates = self.resolve_templates(snapshot_id, suffix).await?;
        let mut result = SumResult {
            template_count: templates.len(),
            ..SumResult::default()
        };

        for template in &templates {
            let streamed = self
                .reader
                .for_each_chunk(&template.storage_path, |chunk| {
                    result.absorb(&chunk, &pick);
                    Ok(())
                })
                .await;

            match streamed {
                Ok(_) => {}
                Err(SyncError::NotFound(path)) => {
                    log::warn!("⚠️  Artifact missing for {}: {}", template.template_id, path);
                }
                Err(e) => return Err(e),
            }
        }

        log::debug!(
            "Σ {} over {} templates: {} records, sum {}",
            suffix,
            result.template_count,
            result.count,
            result.sum
        );
        Ok(result)
    }

    pub async fn circulating_supply(&self, snapshot_id: &str) -> Result<SupplyTotals> {
        let amulets = self.sum(snapshot_id, AMULET_TEMPLATE, amulet_amount).await?;
        let locked = self.sum(snapshot_id, LOCKED_AMULET_TEMPLATE, locked_amount).await?;
        let totals = SupplyTotals::new(amulets.sum, locked.sum);

        log::info!("💰 Supply for {}", snapshot_id);
        log::info!("   ├─ Amulet: {} ({} contracts)", totals.amulet_total, amulets.count);
        log::info!("   ├─ Locked: {} ({} contracts)", totals.locked_total, locked.count);
        log::info!("   └─ Circulating: {}", totals.circulating_supply);
        Ok(totals)
    }
}
