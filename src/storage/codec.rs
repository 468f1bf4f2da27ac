//! Chunked artifact codec
//!
//! A per-template dataset is stored either as a direct JSON array at
//! `{snapshot_id}/{template}.json`, or, once it exceeds the chunk size, as a
//! manifest at that same path referencing sibling chunk files:
//!
//! ```text
//! {snapshot_id}/
//! ├── pkg.Splice.Amulet.Amulet.json              # manifest
//! ├── pkg.Splice.Amulet.Amulet.chunk-0001.json   # [ {contract}, ... ]
//! ├── pkg.Splice.Amulet.Amulet.chunk-0002.json
//! └── pkg.Splice.Amulet.LockedAmulet.json        # direct array
//! ```
//!
//! Readers accept every manifest shape that has been written over time:
//! `{path, entryCount}` descriptors, legacy `{storagePath, contractCount}`
//! descriptors, bare path strings, and a separate `chunkPaths` list. Declared
//! counts are advisory; mismatches are logged and never fail a read.

use super::blob::BlobStore;
use crate::error::{Result, SyncError};
use crate::ledger::template::sanitize_template_id;
use crate::ledger::types::Contract;
use crate::sync::scheduler::BoundedScheduler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const MANIFEST_VERSION: u32 = 2;

const CHUNK_MARKER: &str = ".chunk-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    pub path: String,
    pub entry_count: u64,
}

/// Manifest as written by this codec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkManifest {
    pub version: u32,
    pub template_id: String,
    pub total_count: u64,
    pub chunks: Vec<ChunkDescriptor>,
}

/// Output of encoding one template's dataset
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedArtifact {
    Direct {
        path: String,
        bytes: Vec<u8>,
        entry_count: u64,
    },
    Chunked {
        manifest_path: String,
        manifest: ChunkManifest,
        manifest_bytes: Vec<u8>,
        chunks: Vec<(String, Vec<u8>)>,
    },
}

impl EncodedArtifact {
    /// Path consumers read from (the manifest or the direct array)
    pub fn storage_path(&self) -> &str {
        match self {
            EncodedArtifact::Direct { path, .. } => path,
            EncodedArtifact::Chunked { manifest_path, .. } => manifest_path,
        }
    }

    pub fn entry_count(&self) -> u64 {
        match self {
            EncodedArtifact::Direct { entry_count, .. } => *entry_count,
            EncodedArtifact::Chunked { manifest, .. } => manifest.total_count,
        }
    }
}

pub fn artifact_path(snapshot_id: &str, template_id: &str) -> String {
    format!("{}/{}.json", snapshot_id, sanitize_template_id(template_id))
}

/// Chunk indices start at 1
pub fn chunk_path(snapshot_id: &str, template_id: &str, index: usize) -> String {
    format!(
        "{}/{}{}{:04}.json",
        snapshot_id,
        sanitize_template_id(template_id),
        CHUNK_MARKER,
        index
    )
}

pub fn is_chunk_path(path: &str) -> bool {
    path.contains(CHUNK_MARKER)
}

/// Encode one dataset: a direct array up to `chunk_entries` records,
/// otherwise a manifest plus `ceil(len / chunk_entries)` chunks.
pub fn encode_dataset(
    snapshot_id: &str,
    template_id: &str,
    contracts: &[Contract],
    chunk_entries: usize,
) -> Result<EncodedArtifact> {
    let chunk_entries = chunk_entries.max(1);
    let path = artifact_path(snapshot_id, template_id);

    if contracts.len() <= chunk_entries {
        return Ok(EncodedArtifact::Direct {
            path,
            bytes: serde_json::to_vec(contracts)?,
            entry_count: contracts.len() as u64,
        });
    }

    let mut chunks = Vec::new();
    let mut descriptors = Vec::new();
    for (i, slice) in contracts.chunks(chunk_entries).enumerate() {
        let p = chunk_path(snapshot_id, template_id, i + 1);
        descriptors.push(ChunkDescriptor {
            path: p.clone(),
            entry_count: slice.len() as u64,
        });
        chunks.push((p, serde_json::to_vec(slice)?));
    }

    let manifest = ChunkManifest {
        version: MANIFEST_VERSION,
        template_id: template_id.to_string(),
        total_count: contracts.len() as u64,
        chunks: descriptors,
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;

    Ok(EncodedArtifact::Chunked {
        manifest_path: path,
        manifest,
        manifest_bytes,
        chunks,
    })
}

/// Encode every template's dataset
pub fn encode_datasets(
    snapshot_id: &str,
    datasets: &BTreeMap<String, Vec<Contract>>,
    chunk_entries: usize,
) -> Result<Vec<EncodedArtifact>> {
    datasets
        .iter()
        .map(|(template_id, contracts)| encode_dataset(snapshot_id, template_id, contracts, chunk_entries))
        .collect()
}

/// Upload chunks first, then the manifest, so a visible manifest never
/// points at missing chunks.
pub async fn write_encoded(store: &dyn BlobStore, encoded: EncodedArtifact) -> Result<()> {
    match encoded {
        EncodedArtifact::Direct { path, bytes, .. } => store.upload(&path, bytes).await,
        EncodedArtifact::Chunked {
            manifest_path,
            manifest_bytes,
            chunks,
            ..
        } => {
            for (path, bytes) in chunks {
                store.upload(&path, bytes).await?;
            }
            store.upload(&manifest_path, manifest_bytes).await
        }
    }
}

/// Written artifact summary
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSummary {
    pub template_id: String,
    pub storage_path: String,
    pub entry_count: u64,
    pub chunk_count: usize,
}

/// Incremental writer for one template
///
/// Holds at most `chunk_entries` records in memory; full buffers are
/// uploaded as chunks as soon as the dataset is known to need a manifest.
pub struct TemplateArtifactWriter {
    snapshot_id: String,
    template_id: String,
    chunk_entries: usize,
    buffer: Vec<Contract>,
    chunks: Vec<ChunkDescriptor>,
    total: u64,
}

impl TemplateArtifactWriter {
    pub fn new(snapshot_id: &str, template_id: &str, chunk_entries: usize) -> Self {
        let chunk_entries = chunk_entries.max(1);
        Self {
            snapshot_id: snapshot_id.to_string(),
            template_id: template_id.to_string(),
            chunk_entries,
            buffer: Vec::with_capacity(chunk_entries.min(1024)),
            chunks: Vec::new(),
            total: 0,
        }
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn entry_count(&self) -> u64 {
        self.total
    }

    pub async fn push(&mut self, store: &dyn BlobStore, contract: Contract) -> Result<()> {
        if self.buffer.len() >= self.chunk_entries {
            self.flush_chunk(store).await?;
        }
        self.buffer.push(contract);
        self.total += 1;
        Ok(())
    }

    async fn flush_chunk(&mut self, store: &dyn BlobStore) -> Result<()> {
        let index = self.chunks.len() + 1;
        let path = chunk_path(&self.snapshot_id, &self.template_id, index);
        let bytes = serde_json::to_vec(&self.buffer)?;
        store.upload(&path, bytes).await?;
        log::debug!(
            "   ├─ wrote chunk {} ({} entries) for {}",
            index,
            self.buffer.len(),
            self.template_id
        );
        self.chunks.push(ChunkDescriptor {
            path,
            entry_count: self.buffer.len() as u64,
        });
        self.buffer.clear();
        Ok(())
    }

    pub async fn finish(mut self, store: &dyn BlobStore) -> Result<ArtifactSummary> {
        let storage_path = artifact_path(&self.snapshot_id, &self.template_id);

        if self.chunks.is_empty() {
            store
                .upload(&storage_path, serde_json::to_vec(&self.buffer)?)
                .await?;
            return Ok(ArtifactSummary {
                template_id: self.template_id,
                storage_path,
                entry_count: self.total,
                chunk_count: 0,
            });
        }

        if !self.buffer.is_empty() {
            self.flush_chunk(store).await?;
        }

        let manifest = ChunkManifest {
            version: MANIFEST_VERSION,
            template_id: self.template_id.clone(),
            total_count: self.total,
            chunks: self.chunks,
        };
        let chunk_count = manifest.chunks.len();
        store
            .upload(&storage_path, serde_json::to_vec_pretty(&manifest)?)
            .await?;

        Ok(ArtifactSummary {
            template_id: self.template_id,
            storage_path,
            entry_count: self.total,
            chunk_count,
        })
    }
}

/// Chunk reference after normalizing descriptor shapes
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedChunk {
    pub path: String,
    pub entry_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedManifest {
    pub declared_total: Option<u64>,
    pub chunks: Vec<NormalizedChunk>,
}

/// Parsed top-level artifact body
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactBody {
    Manifest(NormalizedManifest),
    Direct(Vec<Contract>),
}

const PATH_KEYS: [&str; 5] = ["path", "storagePath", "storage_path", "key", "file"];
const COUNT_KEYS: [&str; 5] = ["entryCount", "contractCount", "entry_count", "contract_count", "count"];
const TOTAL_KEYS: [&str; 5] = ["totalCount", "totalEntries", "total_count", "contractCount", "entryCount"];
const CHUNK_LIST_KEYS: [&str; 3] = ["chunks", "chunkPaths", "chunk_paths"];

fn first_u64(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| match obj.get(*k) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

/// Chunk paths without a directory are siblings of the manifest
fn resolve_chunk_path(manifest_path: &str, chunk: &str) -> String {
    if chunk.contains('/') {
        return chunk.to_string();
    }
    match manifest_path.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, chunk),
        None => chunk.to_string(),
    }
}

fn normalize_manifest(path: &str, obj: &serde_json::Map<String, Value>) -> NormalizedManifest {
    let mut seen = HashSet::new();
    let mut chunks = Vec::new();

    for key in CHUNK_LIST_KEYS {
        let Some(Value::Array(items)) = obj.get(key) else {
            continue;
        };
        for item in items {
            let chunk = match item {
                Value::String(p) => Some(NormalizedChunk {
                    path: p.clone(),
                    entry_count: None,
                }),
                Value::Object(desc) => PATH_KEYS
                    .iter()
                    .find_map(|k| desc.get(*k).and_then(Value::as_str))
                    .map(|p| NormalizedChunk {
                        path: p.to_string(),
                        entry_count: first_u64(desc, &COUNT_KEYS),
                    }),
                _ => None,
            };

            match chunk {
                Some(mut c) => {
                    c.path = resolve_chunk_path(path, &c.path);
                    if seen.insert(c.path.clone()) {
                        chunks.push(c);
                    } else if let Some(existing) = chunks.iter_mut().find(|e| e.path == c.path) {
                        // merged shapes: keep a count if only one shape carried it
                        if existing.entry_count.is_none() {
                            existing.entry_count = c.entry_count;
                        }
                    }
                }
                None => log::warn!("⚠️  Ignoring unrecognised chunk descriptor in {}: {}", path, item),
            }
        }
    }

    let declared_total = first_u64(obj, &TOTAL_KEYS).or_else(|| {
        chunks
            .iter()
            .map(|c| c.entry_count)
            .sum::<Option<u64>>()
    });

    NormalizedManifest {
        declared_total,
        chunks,
    }
}

/// Parse contract records, skipping (and logging) entries that do not parse
pub fn parse_contracts(path: &str, items: Vec<Value>) -> Vec<Contract> {
    let mut skipped = 0usize;
    let contracts: Vec<Contract> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Contract>(item) {
            Ok(c) => Some(c),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        log::warn!("⚠️  Skipped {} unparseable records in {}", skipped, path);
    }
    contracts
}

/// Interpret an artifact body. Never fails: unusable bodies degrade to an
/// empty direct dataset with a warning.
pub fn parse_artifact(path: &str, bytes: &[u8]) -> ArtifactBody {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("⚠️  Unparseable artifact {}: {}", path, e);
            return ArtifactBody::Direct(Vec::new());
        }
    };

    match value {
        Value::Array(items) => ArtifactBody::Direct(parse_contracts(path, items)),
        Value::Object(obj) => {
            if CHUNK_LIST_KEYS.iter().any(|k| obj.contains_key(*k)) {
                return ArtifactBody::Manifest(normalize_manifest(path, &obj));
            }
            for key in ["contracts", "data", "entries"] {
                if let Some(Value::Array(items)) = obj.get(key) {
                    return ArtifactBody::Direct(parse_contracts(path, items.clone()));
                }
            }
            log::warn!("⚠️  Artifact {} has neither chunks nor records", path);
            ArtifactBody::Direct(Vec::new())
        }
        _ => {
            log::warn!("⚠️  Artifact {} is not an array or object", path);
            ArtifactBody::Direct(Vec::new())
        }
    }
}

fn parse_chunk(path: &str, bytes: &[u8]) -> Vec<Contract> {
    match parse_artifact(path, bytes) {
        ArtifactBody::Direct(contracts) => contracts,
        ArtifactBody::Manifest(_) => {
            log::warn!("⚠️  Chunk {} is itself a manifest; ignoring", path);
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeStats {
    pub chunk_count: usize,
    pub entry_count: u64,
    pub declared_total: Option<u64>,
}

/// Reads artifacts back, downloading chunks under bounded concurrency
#[derive(Clone)]
pub struct ArtifactReader {
    store: Arc<dyn BlobStore>,
    scheduler: BoundedScheduler,
}

impl ArtifactReader {
    pub fn new(store: Arc<dyn BlobStore>, scheduler: BoundedScheduler) -> Self {
        Self { store, scheduler }
    }

    fn check_count(path: &str, stats: &DecodeStats) {
        if let Some(declared) = stats.declared_total {
            if declared != stats.entry_count {
                log::warn!(
                    "⚠️  {}: manifest declares {} entries, chunks hold {}",
                    path,
                    declared,
                    stats.entry_count
                );
            }
        }
    }

    /// Hand each chunk's records to `on_chunk` as soon as it is downloaded
    ///
    /// Chunks arrive in completion order; only the chunks currently in
    /// flight are held in memory. A direct artifact is a single chunk.
    pub async fn for_each_chunk<C>(&self, path: &str, mut on_chunk: C) -> Result<DecodeStats>
    where
        C: FnMut(Vec<Contract>) -> Result<()>,
    {
        let bytes = self.store.download(path).await?;
        let manifest = match parse_artifact(path, &bytes) {
            ArtifactBody::Direct(contracts) => {
                let stats = DecodeStats {
                    chunk_count: 1,
                    entry_count: contracts.len() as u64,
                    declared_total: None,
                };
                on_chunk(contracts)?;
                return Ok(stats);
            }
            ArtifactBody::Manifest(manifest) => manifest,
        };
        drop(bytes);

        let mut stats = DecodeStats {
            chunk_count: manifest.chunks.len(),
            entry_count: 0,
            declared_total: manifest.declared_total,
        };

        let tasks = manifest.chunks.into_iter().map(|chunk| {
            let store = self.store.clone();
            async move {
                let bytes = store.download(&chunk.path).await;
                (chunk, bytes)
            }
        });

        self.scheduler
            .for_each_completed(tasks, |_, (chunk, downloaded)| {
                let bytes = downloaded?;
                let contracts = parse_chunk(&chunk.path, &bytes);
                if let Some(expected) = chunk.entry_count {
                    if expected != contracts.len() as u64 {
                        log::warn!(
                            "⚠️  Chunk {} declares {} entries, holds {}",
                            chunk.path,
                            expected,
                            contracts.len()
                        );
                    }
                }
                stats.entry_count += contracts.len() as u64;
                on_chunk(contracts)
            })
            .await?;

        Self::check_count(path, &stats);
        Ok(stats)
    }

    /// Full dataset in manifest order
    pub async fn decode(&self, path: &str) -> Result<Vec<Contract>> {
        let bytes = self.store.download(path).await?;
        let manifest = match parse_artifact(path, &bytes) {
            ArtifactBody::Direct(contracts) => return Ok(contracts),
            ArtifactBody::Manifest(manifest) => manifest,
        };

        let tasks = manifest.chunks.into_iter().map(|chunk| {
            let store = self.store.clone();
            async move {
                let bytes = store.download(&chunk.path).await;
                (chunk.path, bytes)
            }
        });

        let mut contracts = Vec::new();
        for (chunk_path, downloaded) in self.scheduler.run_all(tasks).await? {
            contracts.extend(parse_chunk(&chunk_path, &downloaded?));
        }

        Self::check_count(
            path,
            &DecodeStats {
                chunk_count: 0,
                entry_count: contracts.len() as u64,
                declared_total: manifest.declared_total,
            },
        );
        Ok(contracts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::blob::MemoryBlobStore;
    use serde_json::json;

    const TEMPLATE: &str = "pkg:Splice.Amulet:Amulet";

    fn contracts(n: usize) -> Vec<Contract> {
        (0..n)
            .map(|i| Contract {
                contract_id: format!("00c{:04}", i),
                template_id: TEMPLATE.to_string(),
                payload: json!({"owner": format!("party-{}", i), "amount": {"initialAmount": format!("{}.0", i)}}),
                created_at: None,
            })
            .collect()
    }

    fn reader(store: Arc<MemoryBlobStore>) -> ArtifactReader {
        ArtifactReader::new(store, BoundedScheduler::new(3))
    }

    #[test]
    fn test_small_dataset_encodes_direct() {
        let encoded = encode_dataset("snap", TEMPLATE, &contracts(5), 5).unwrap();
        match encoded {
            EncodedArtifact::Direct { path, entry_count, .. } => {
                assert_eq!(path, "snap/pkg.Splice.Amulet.Amulet.json");
                assert_eq!(entry_count, 5);
            }
            other => panic!("expected direct, got {:?}", other),
        }
    }

    #[test]
    fn test_large_dataset_encodes_manifest() {
        let encoded = encode_dataset("snap", TEMPLATE, &contracts(12), 5).unwrap();
        match encoded {
            EncodedArtifact::Chunked { manifest, chunks, .. } => {
                assert_eq!(manifest.total_count, 12);
                let counts: Vec<u64> = manifest.chunks.iter().map(|c| c.entry_count).collect();
                assert_eq!(counts, vec![5, 5, 2]);
                assert_eq!(chunks.len(), 3);
                assert_eq!(chunks[0].0, "snap/pkg.Splice.Amulet.Amulet.chunk-0001.json");
                assert!(is_chunk_path(&chunks[2].0));
            }
            other => panic!("expected manifest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_both_forms() {
        let store = Arc::new(MemoryBlobStore::new());
        let small = contracts(3);
        let large = contracts(11);

        write_encoded(&*store, encode_dataset("a", TEMPLATE, &small, 4).unwrap())
            .await
            .unwrap();
        write_encoded(&*store, encode_dataset("b", TEMPLATE, &large, 4).unwrap())
            .await
            .unwrap();

        let r = reader(store);
        assert_eq!(r.decode(&artifact_path("a", TEMPLATE)).await.unwrap(), small);
        assert_eq!(r.decode(&artifact_path("b", TEMPLATE)).await.unwrap(), large);
    }

    #[tokio::test]
    async fn test_decode_legacy_descriptor_names() {
        let store = Arc::new(MemoryBlobStore::new());
        let data = contracts(6);
        store
            .upload("legacy/part-1.json", serde_json::to_vec(&data[..4]).unwrap())
            .await
            .unwrap();
        store
            .upload("legacy/part-2.json", serde_json::to_vec(&data[4..]).unwrap())
            .await
            .unwrap();
        let manifest = json!({
            "templateId": TEMPLATE,
            "chunks": [
                {"storagePath": "legacy/part-1.json", "contractCount": 4},
                {"storagePath": "part-2.json", "contractCount": 2}
            ]
        });
        store
            .upload("legacy/manifest.json", serde_json::to_vec(&manifest).unwrap())
            .await
            .unwrap();

        let decoded = reader(store).decode("legacy/manifest.json").await.unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_manifest_shapes_merge_and_dedupe() {
        let body = json!({
            "chunks": [
                {"path": "s/x.chunk-0001.json", "entryCount": 3},
                "s/x.chunk-0002.json",
                {"storagePath": "s/x.chunk-0001.json", "contractCount": 3}
            ],
            "chunkPaths": ["s/x.chunk-0002.json", "x.chunk-0003.json"]
        });
        let parsed = parse_artifact("s/x.json", &serde_json::to_vec(&body).unwrap());

        match parsed {
            ArtifactBody::Manifest(m) => {
                let paths: Vec<&str> = m.chunks.iter().map(|c| c.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec!["s/x.chunk-0001.json", "s/x.chunk-0002.json", "s/x.chunk-0003.json"]
                );
                // one chunk has no count, so no total can be derived
                assert_eq!(m.declared_total, None);
            }
            other => panic!("expected manifest, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_count_mismatch_is_not_fatal() {
        let store = Arc::new(MemoryBlobStore::new());
        let data = contracts(2);
        store
            .upload("m/c1.json", serde_json::to_vec(&data).unwrap())
            .await
            .unwrap();
        let manifest = json!({"totalCount": 10, "chunks": [{"path": "m/c1.json", "entryCount": 7}]});
        store
            .upload("m/t.json", serde_json::to_vec(&manifest).unwrap())
            .await
            .unwrap();

        let mut seen = 0;
        let stats = reader(store)
            .for_each_chunk("m/t.json", |chunk| {
                seen += chunk.len();
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(seen, 2);
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.declared_total, Some(10));
    }

    #[tokio::test]
    async fn test_unparseable_bodies_degrade_to_empty() {
        let store = Arc::new(MemoryBlobStore::new());
        store.upload("bad/t.json", b"{not json".to_vec()).await.unwrap();
        store.upload("bad/u.json", b"42".to_vec()).await.unwrap();
        store
            .upload("bad/v.json", br#"[{"contract_id": "c1"}, {"nope": true}]"#.to_vec())
            .await
            .unwrap();

        let r = reader(store);
        assert!(r.decode("bad/t.json").await.unwrap().is_empty());
        assert!(r.decode("bad/u.json").await.unwrap().is_empty());
        // missing template_id fails to parse and is skipped
        assert!(r.decode("bad/v.json").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_chunk_is_an_error() {
        let store = Arc::new(MemoryBlobStore::new());
        let manifest = json!({"chunks": [{"path": "gone/c1.json", "entryCount": 1}]});
        store
            .upload("gone/t.json", serde_json::to_vec(&manifest).unwrap())
            .await
            .unwrap();

        let err = reader(store).decode("gone/t.json").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_streaming_writer_matches_encoder() {
        let store = Arc::new(MemoryBlobStore::new());
        let data = contracts(9);

        let mut writer = TemplateArtifactWriter::new("w", TEMPLATE, 4);
        for c in data.clone() {
            writer.push(&*store, c).await.unwrap();
        }
        let summary = writer.finish(&*store).await.unwrap();

        assert_eq!(summary.entry_count, 9);
        assert_eq!(summary.chunk_count, 3);
        assert_eq!(reader(store.clone()).decode(&summary.storage_path).await.unwrap(), data);

        // exactly one chunk's worth stays a direct array
        let mut writer = TemplateArtifactWriter::new("w2", TEMPLATE, 4);
        for c in contracts(4) {
            writer.push(&*store, c).await.unwrap();
        }
        let summary = writer.finish(&*store).await.unwrap();
        assert_eq!(summary.chunk_count, 0);
    }
}
