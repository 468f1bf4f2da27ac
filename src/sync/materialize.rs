//! Writes a snapshot's contracts as per-template artifacts
//!
//! Contracts are routed to one streaming artifact writer per template while
//! the template's aggregate is folded alongside. `finish` closes every
//! artifact and records one stats row per template.
//!
//! `write_datasets` covers the case where the whole contract set is
//! already in memory (a reconciled delta) and encodes it in one pass.

use crate::error::Result;
use crate::ledger::types::Contract;
use crate::storage::blob::BlobStore;
use crate::storage::codec::{encode_datasets, write_encoded, TemplateArtifactWriter};
use crate::storage::metadata::{MetadataStore, TemplateStatsRecord};
use crate::sync::aggregator::TemplateAggregate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotWriteSummary {
    pub entry_count: u64,
    pub templates: Vec<TemplateStatsRecord>,
}

pub struct SnapshotWriter {
    snapshot_id: String,
    chunk_entries: usize,
    writers: BTreeMap<String, (TemplateArtifactWriter, TemplateAggregate)>,
}

impl SnapshotWriter {
    pub fn new(snapshot_id: impl Into<String>, chunk_entries: usize) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            chunk_entries,
            writers: BTreeMap::new(),
        }
    }

    pub fn template_count(&self) -> usize {
        self.writers.len()
    }

    pub async fn push(&mut self, store: &dyn BlobStore, contract: Contract) -> Result<()> {
        let chunk_entries = self.chunk_entries;
        let snapshot_id = &self.snapshot_id;
        let (writer, aggregate) = self
            .writers
            .entry(contract.template_id.clone())
            .or_insert_with(|| {
                (
                    TemplateArtifactWriter::new(snapshot_id, &contract.template_id, chunk_entries),
                    TemplateAggregate::default(),
                )
            });
        aggregate.observe(&contract);
        writer.push(store, contract).await
    }

    pub async fn push_all(
        &mut self,
        store: &dyn BlobStore,
        contracts: impl IntoIterator<Item = Contract>,
    ) -> Result<()> {
        for contract in contracts {
            self.push(store, contract).await?;
        }
        Ok(())
    }

    /// Close every artifact, then record the per-template stats
    pub async fn finish(
        self,
        store: &dyn BlobStore,
        meta: &dyn MetadataStore,
    ) -> Result<SnapshotWriteSummary> {
        let mut summary = SnapshotWriteSummary::default();

        for (template_id, (writer, aggregate)) in self.writers {
            let artifact = writer.finish(store).await?;
            log::debug!(
                "   ├─ {}: {} entries, {} chunks",
                template_id,
                artifact.entry_count,
                artifact.chunk_count
            );

            let record = TemplateStatsRecord {
                snapshot_id: self.snapshot_id.clone(),
                template_id,
                storage_path: artifact.storage_path,
                aggregate,
            };
            meta.upsert_template_stats(&record).await?;
            summary.entry_count += artifact.entry_count;
            summary.templates.push(record);
        }

        log::info!(
            "📦 Wrote {} templates ({} contracts) for {}",
            summary.templates.len(),
            summary.entry_count,
            self.snapshot_id
        );
        Ok(summary)
    }
}

/// Encode and upload per-template datasets, then record their stats
pub async fn write_datasets(
    snapshot_id: &str,
    datasets: &BTreeMap<String, Vec<Contract>>,
    chunk_entries: usize,
    store: &dyn BlobStore,
    meta: &dyn MetadataStore,
) -> Result<SnapshotWriteSummary> {
    let encoded = encode_datasets(snapshot_id, datasets, chunk_entries)?;
    let mut summary = SnapshotWriteSummary::default();

    for ((template_id, contracts), artifact) in datasets.iter().zip(encoded) {
        let record = TemplateStatsRecord {
            snapshot_id: snapshot_id.to_string(),
            template_id: template_id.clone(),
            storage_path: artifact.storage_path().to_string(),
            aggregate: TemplateAggregate::from_contracts(contracts),
        };
        summary.entry_count += artifact.entry_count();
        write_encoded(store, artifact).await?;
        meta.upsert_template_stats(&record).await?;
        summary.templates.push(record);
    }

    log::info!(
        "📦 Wrote {} templates ({} contracts) for {}",
        summary.templates.len(),
        summary.entry_count,
        snapshot_id
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::blob::MemoryBlobStore;
    use crate::storage::codec::{ArtifactReader, artifact_path};
    use crate::storage::metadata::SqliteMetadataStore;
    use crate::sync::aggregator::AMOUNT_FIELD;
    use crate::sync::scheduler::BoundedScheduler;
    use serde_json::json;
    use std::sync::Arc;

    fn contract(i: usize, template_id: &str) -> Contract {
        Contract {
            contract_id: format!("c{:03}", i),
            template_id: template_id.to_string(),
            payload: json!({"amount": {"initialAmount": "2.0"}}),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_routes_per_template_and_records_stats() {
        let store = Arc::new(MemoryBlobStore::new());
        let meta = SqliteMetadataStore::open_in_memory().unwrap();
        let mut writer = SnapshotWriter::new("snap-w", 3);

        let amulets = (0..7).map(|i| contract(i, "pkg:Splice.Amulet:Amulet"));
        let votes = (0..2).map(|i| contract(100 + i, "pkg:Splice.Dso:Vote"));
        writer.push_all(&*store, amulets.chain(votes)).await.unwrap();
        assert_eq!(writer.template_count(), 2);

        let summary = writer.finish(&*store, &meta).await.unwrap();
        assert_eq!(summary.entry_count, 9);

        let stats = meta.template_stats("snap-w").await.unwrap();
        assert_eq!(stats.len(), 2);
        let amulet = stats
            .iter()
            .find(|s| s.template_id.ends_with("Amulet"))
            .unwrap();
        assert_eq!(amulet.aggregate.contract_count, 7);
        assert!((amulet.aggregate.field_sum(AMOUNT_FIELD) - 14.0).abs() < 1e-9);

        let reader = ArtifactReader::new(store.clone(), BoundedScheduler::new(2));
        let decoded = reader
            .decode(&artifact_path("snap-w", "pkg:Splice.Amulet:Amulet"))
            .await
            .unwrap();
        assert_eq!(decoded.len(), 7);
    }

    #[tokio::test]
    async fn test_write_datasets_round_trips_through_reader() {
        let store = Arc::new(MemoryBlobStore::new());
        let meta = SqliteMetadataStore::open_in_memory().unwrap();
        let amulet_id = "pkg:Splice.Amulet:Amulet";
        let vote_id = "pkg:Splice.Dso:Vote";

        let mut datasets = BTreeMap::new();
        datasets.insert(
            amulet_id.to_string(),
            (0..5).map(|i| contract(i, amulet_id)).collect::<Vec<_>>(),
        );
        datasets.insert(vote_id.to_string(), vec![contract(50, vote_id)]);

        let summary = write_datasets("snap-d", &datasets, 2, &*store, &meta).await.unwrap();
        assert_eq!(summary.entry_count, 6);
        // amulet manifest + 3 chunks, vote direct array
        assert_eq!(store.len(), 5);

        let reader = ArtifactReader::new(store.clone(), BoundedScheduler::new(2));
        for record in meta.template_stats("snap-d").await.unwrap() {
            let decoded = reader.decode(&record.storage_path).await.unwrap();
            assert_eq!(&decoded, &datasets[&record.template_id]);
            assert_eq!(record.aggregate.contract_count, decoded.len() as u64);
        }
    }
}
