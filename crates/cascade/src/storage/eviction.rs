//! Retain scoring for demotion and eviction ordering
//!
//! Combines an inverse-decayed recency term with a log-scaled access count
//! (hybrid LRU/LFU). Higher score = keep; lowest score is demoted first.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::config::EvictionConfig;
use crate::memory::RecordMeta;

/// Scores records for demotion. Pure: time is always passed in.
#[derive(Debug, Clone, Copy)]
pub struct EvictionPolicy {
    config: EvictionConfig,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(EvictionConfig::default())
    }
}

impl EvictionPolicy {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// Retain score for a record at `now`.
    ///
    /// Score formula:
    /// - recency: `recency_weight / (1 + idle_secs / half_life)`, so the term
    ///   halves after one half-life of inactivity
    /// - frequency: `frequency_weight * ln(1 + access_count)`
    pub fn score(&self, meta: &RecordMeta, now: DateTime<Utc>) -> f64 {
        let idle_secs = (now - meta.last_accessed_at).num_milliseconds().max(0) as f64 / 1000.0;
        let recency =
            self.config.recency_weight / (1.0 + idle_secs / self.config.recency_half_life_secs);
        let frequency = self.config.frequency_weight * (1.0 + meta.access_count as f64).ln();
        recency + frequency
    }

    /// Eviction order: lowest score first, then oldest, then by id.
    pub fn compare(&self, a: &RecordMeta, b: &RecordMeta, now: DateTime<Utc>) -> Ordering {
        compare_scored(self.score(a, now), a, self.score(b, now), b)
    }
}

/// Eviction order for already-scored entries
pub(crate) fn compare_scored(
    score_a: f64,
    a: &RecordMeta,
    score_b: f64,
    b: &RecordMeta,
) -> Ordering {
    score_a
        .partial_cmp(&score_b)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
