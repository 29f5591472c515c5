//! Vector index that receives record embeddings
//!
//! The cache keeps the index in sync with the records it holds but never
//! ranks anything itself; `query` is there for the embedding application.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::memory::RecordId;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Vector index unavailable: {0}")]
    Unavailable(String),
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn index(&self, id: RecordId, embedding: &[f32]) -> Result<(), VectorIndexError>;

    async fn remove(&self, id: RecordId) -> Result<(), VectorIndexError>;

    /// Up to `k` ids, most similar first
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RecordId>, VectorIndexError>;

    fn name(&self) -> &'static str;
}

/// Index that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVectorIndex;

#[async_trait]
impl VectorIndex for NoopVectorIndex {
    async fn index(&self, _id: RecordId, _embedding: &[f32]) -> Result<(), VectorIndexError> {
        Ok(())
    }

    async fn remove(&self, _id: RecordId) -> Result<(), VectorIndexError> {
        Ok(())
    }

    async fn query(&self, _embedding: &[f32], _k: usize) -> Result<Vec<RecordId>, VectorIndexError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Brute-force cosine similarity over every stored embedding.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    vectors: DashMap<RecordId, Vec<f32>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.vectors.contains_key(&id)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn index(&self, id: RecordId, embedding: &[f32]) -> Result<(), VectorIndexError> {
        self.vectors.insert(id, embedding.to_vec());
        Ok(())
    }

    async fn remove(&self, id: RecordId) -> Result<(), VectorIndexError> {
        self.vectors.remove(&id);
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<RecordId>, VectorIndexError> {
        let mut scored = Vec::with_capacity(self.vectors.len());
        for entry in self.vectors.iter() {
            if entry.value().len() != embedding.len() {
                return Err(VectorIndexError::DimensionMismatch {
                    expected: entry.value().len(),
                    actual: embedding.len(),
                });
            }
            scored.push((*entry.key(), cosine_similarity(entry.value(), embedding)));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(id, _)| id).collect())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
