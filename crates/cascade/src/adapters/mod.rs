//! External collaborators the cache depends on
//!
//! Each collaborator is a trait with in-crate implementations: blob storage
//! for the warm and cold tiers, the summarizer used by consolidation, and the
//! vector index that receives embeddings.

pub mod blob;
pub mod summarizer;
pub mod vector;

pub use blob::{BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use summarizer::{ExtractiveSummarizer, Summarizer, SummarizerError, Summary};
pub use vector::{InMemoryVectorIndex, NoopVectorIndex, VectorIndex, VectorIndexError};
