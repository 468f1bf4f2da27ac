//! Persistence: blob artifacts and run metadata

pub mod blob;
pub mod codec;
pub mod metadata;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use codec::{ArtifactReader, TemplateArtifactWriter};
pub use metadata::{MetadataStore, RunStatus, SnapshotRecord, SqliteMetadataStore};
