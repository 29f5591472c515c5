//! Candidate selection and grouping for consolidation

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::config::ConsolidationConfig;
use crate::storage::IndexSnapshot;

/// Entries old enough, shallow enough and cold enough to consolidate.
pub fn select_candidates(
    entries: Vec<IndexSnapshot>,
    config: &ConsolidationConfig,
    now: DateTime<Utc>,
) -> Vec<IndexSnapshot> {
    let min_age = config.min_age();
    entries
        .into_iter()
        .filter(|e| e.meta.age(now) >= min_age)
        .filter(|e| e.meta.generation < config.max_generation)
        .filter(|e| e.score < config.score_threshold)
        .collect()
}

/// Split candidates into consolidation groups.
///
/// Records are bucketed by conversation (records without one are never
/// grouped), ordered by creation time, cut into windows no longer than
/// `group_window`, and each window is chunked to at most `max_group_size`.
/// Chunks smaller than `min_group_size` are dropped. Every group comes back
/// in chronological order.
pub fn group_candidates(
    candidates: Vec<IndexSnapshot>,
    config: &ConsolidationConfig,
) -> Vec<Vec<IndexSnapshot>> {
    let mut buckets: BTreeMap<String, Vec<IndexSnapshot>> = BTreeMap::new();
    for candidate in candidates {
        if let Some(conversation) = candidate.meta.conversation_id.clone() {
            buckets.entry(conversation).or_default().push(candidate);
        }
    }

    let window_span = config.group_window();
    let mut groups = Vec::new();
    for (_, mut bucket) in buckets {
        bucket.sort_by(|a, b| {
            a.meta
                .created_at
                .cmp(&b.meta.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut window: Vec<IndexSnapshot> = Vec::new();
        for entry in bucket {
            let outside = window
                .first()
                .is_some_and(|first| entry.meta.created_at - first.meta.created_at > window_span);
            if outside {
                push_chunks(&mut groups, std::mem::take(&mut window), config);
            }
            window.push(entry);
        }
        push_chunks(&mut groups, window, config);
    }
    groups
}

fn push_chunks(
    groups: &mut Vec<Vec<IndexSnapshot>>,
    window: Vec<IndexSnapshot>,
    config: &ConsolidationConfig,
) {
    for chunk in window.chunks(config.max_group_size.max(1)) {
        if chunk.len() >= config.min_group_size {
            groups.push(chunk.to_vec());
        }
    }
}
