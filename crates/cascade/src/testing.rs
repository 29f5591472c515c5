//! Test utilities for cascade - fakes and record builders
//!
//! This module provides utilities for fast, deterministic tests:
//! - Mock summarizer with failure and latency switches
//! - Vector index that records every call
//! - Hash-seeded embeddings and record builders

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::adapters::{Summarizer, SummarizerError, Summary, VectorIndex, VectorIndexError};
use crate::config::Config;
use crate::memory::{MemoryRecord, Payload, RecordId, RecordKind};

/// Generate a deterministic "embedding" from text using hashing.
/// Values are in range [-1, 1].
pub fn mock_embedding(text: &str, dims: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    let seed = hasher.finish();

    (0..dims)
        .map(|i| {
            // Use seed + index to generate pseudo-random but deterministic values
            let x = seed
                .wrapping_mul(i as u64 + 1)
                .wrapping_add(0x9e3779b97f4a7c15);
            let normalized = (x as f32) / (u64::MAX as f32);
            (normalized * 2.0) - 1.0
        })
        .collect()
}

/// Conversational turn created at `at`
pub fn turn_at(content: &str, conversation: &str, at: DateTime<Utc>) -> MemoryRecord {
    MemoryRecord::new_at(RecordKind::Turn, Payload::new(content), at).with_conversation(conversation)
}

/// Note carrying a mock embedding
pub fn note_with_embedding(content: &str, dims: usize, at: DateTime<Utc>) -> MemoryRecord {
    let payload = Payload::new(content).with_embedding(mock_embedding(content, dims));
    MemoryRecord::new_at(RecordKind::Note, payload, at)
}

/// Config for tests: small shard count, background tasks off
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.cache.shard_count = 8;
    config.cache.io_timeout_ms = 2_000;
    config.consolidation.enabled = false;
    config.maintenance.enabled = false;
    config
}

/// Summarizer joining payload texts, with switchable failure and latency.
#[derive(Debug, Default)]
pub struct MockSummarizer {
    fail: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
    embedding: Option<Vec<f32>>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Attach this embedding to every summary
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, payloads: &[Payload]) -> Result<Summary, SummarizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SummarizerError::Unavailable("mock failure".to_string()));
        }
        if payloads.is_empty() {
            return Err(SummarizerError::EmptyInput);
        }

        let text: Vec<String> = payloads.iter().map(Payload::text).collect();
        Ok(Summary {
            content: text.join(" | ").into_bytes(),
            embedding: self.embedding.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// One call observed by [`RecordingVectorIndex`]
#[derive(Debug, Clone, PartialEq)]
pub enum VectorCall {
    Index(RecordId),
    Remove(RecordId),
}

/// Vector index that logs calls and can be made to fail.
#[derive(Debug, Default)]
pub struct RecordingVectorIndex {
    calls: Mutex<Vec<VectorCall>>,
    fail: AtomicBool,
}

impl RecordingVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<VectorCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: VectorCall) -> Result<(), VectorIndexError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(VectorIndexError::Unavailable("recording index failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for RecordingVectorIndex {
    async fn index(&self, id: RecordId, _embedding: &[f32]) -> Result<(), VectorIndexError> {
        self.record(VectorCall::Index(id))
    }

    async fn remove(&self, id: RecordId) -> Result<(), VectorIndexError> {
        self.record(VectorCall::Remove(id))
    }

    async fn query(&self, _embedding: &[f32], _k: usize) -> Result<Vec<RecordId>, VectorIndexError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
