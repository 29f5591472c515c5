//! Sharded lock table mapping record ids to their tier and content version
//!
//! Each shard is a `tokio::sync::Mutex` owning its slice of the index plus
//! the Hot-resident records that hash to it. Operations on different shards
//! run in parallel. Only [`ShardedIndex::lock_many`] holds more than one
//! shard at a time, and it always acquires them in ascending order.
//!
//! [`HotQueue`] orders the Hot residents across all shards for eviction.

use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

use super::eviction::{EvictionPolicy, compare_scored};
use crate::memory::{MemoryRecord, RecordId, RecordMeta, Tier};

/// Index entry for one record.
///
/// Hot records live in the owning shard's resident map; Warm and Cold
/// records live in their tier's blob store under `meta.id.blob_key()`.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub tier: Tier,
    /// Bumped by every write of the record's content. Moves between tiers and
    /// access accounting leave it alone.
    pub version: u64,
    pub meta: RecordMeta,
    /// Stale lower-tier copies left behind by promotion. Never contains `tier`.
    pub shadows: Vec<Tier>,
}

impl IndexEntry {
    pub(crate) fn add_shadow(&mut self, tier: Tier) {
        if tier != self.tier && !self.shadows.contains(&tier) {
            self.shadows.push(tier);
        }
    }

    /// Repoint the entry; a shadow in the new tier is overwritten by the move
    pub(crate) fn relocate(&mut self, tier: Tier) {
        self.tier = tier;
        self.shadows.retain(|t| *t != tier);
    }
}

/// One slice of the index
#[derive(Debug, Default)]
pub struct Shard {
    pub entries: HashMap<RecordId, IndexEntry>,
    pub hot: HashMap<RecordId, MemoryRecord>,
}

/// Fixed-size table of independently locked shards.
#[derive(Debug)]
pub struct ShardedIndex {
    shards: Vec<Mutex<Shard>>,
}

impl ShardedIndex {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_of(&self, id: &RecordId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    pub async fn lock(&self, id: &RecordId) -> MutexGuard<'_, Shard> {
        self.shards[self.shard_of(id)].lock().await
    }

    /// Lock every shard touched by `ids`, in ascending shard order.
    pub async fn lock_many<I>(&self, ids: I) -> ShardSet<'_>
    where
        I: IntoIterator<Item = RecordId>,
    {
        let mut indices: Vec<usize> = ids.into_iter().map(|id| self.shard_of(&id)).collect();
        indices.sort_unstable();
        indices.dedup();

        let mut guards = Vec::with_capacity(indices.len());
        for idx in indices {
            guards.push((idx, self.shards[idx].lock().await));
        }

        ShardSet { index: self, guards }
    }

    /// Clone every entry matching `filter`, holding one shard lock at a time
    pub async fn snapshot<F>(&self, mut filter: F) -> Vec<IndexEntry>
    where
        F: FnMut(&IndexEntry) -> bool,
    {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock().await;
            out.extend(guard.entries.values().filter(|e| filter(e)).cloned());
        }
        out
    }

    /// Clone one entry
    pub async fn entry(&self, id: &RecordId) -> Option<IndexEntry> {
        self.lock(id).await.entries.get(id).cloned()
    }
}

/// Hot residents ordered by last access, oldest first.
///
/// The eviction path picks its victims here instead of walking the shards.
/// Always acquired while holding a shard lock or with none held, never the
/// other way round.
#[derive(Debug, Default)]
pub struct HotQueue {
    inner: Mutex<HotOrder>,
}

#[derive(Debug, Default)]
struct HotOrder {
    by_access: BTreeMap<(DateTime<Utc>, RecordId), RecordMeta>,
    keys: HashMap<RecordId, DateTime<Utc>>,
}

impl HotOrder {
    fn remove(&mut self, id: &RecordId) -> Option<RecordMeta> {
        let at = self.keys.remove(id)?;
        self.by_access.remove(&(at, *id))
    }
}

impl HotQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resident or refresh its metadata after an access
    pub async fn admit(&self, meta: &RecordMeta) {
        let mut order = self.inner.lock().await;
        order.remove(&meta.id);
        order.keys.insert(meta.id, meta.last_accessed_at);
        order
            .by_access
            .insert((meta.last_accessed_at, meta.id), meta.clone());
    }

    pub async fn remove(&self, id: &RecordId) {
        self.inner.lock().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.keys.len()
    }

    /// Size of a resident, `None` if it is not in Hot
    pub async fn size_of(&self, id: &RecordId) -> Option<u64> {
        let order = self.inner.lock().await;
        let at = order.keys.get(id)?;
        order.by_access.get(&(*at, *id)).map(|m| m.size_bytes)
    }

    /// Lowest-scoring resident among the `window` least recently accessed
    /// ones not in `exclude`.
    ///
    /// Recency dominates the score, so the exact minimum almost always sits
    /// in this window; a frequently read record can outlive it by scoring
    /// above the rest of the window.
    pub async fn victim(
        &self,
        policy: &EvictionPolicy,
        now: DateTime<Utc>,
        window: usize,
        exclude: &HashSet<RecordId>,
    ) -> Option<RecordMeta> {
        let order = self.inner.lock().await;
        order
            .by_access
            .values()
            .filter(|meta| !exclude.contains(&meta.id))
            .take(window)
            .map(|meta| (policy.score(meta, now), meta))
            .min_by(|a, b| compare_scored(a.0, a.1, b.0, b.1))
            .map(|(_, meta)| meta.clone())
    }
}

/// Several shards held at once; released together on drop.
pub struct ShardSet<'a> {
    index: &'a ShardedIndex,
    guards: Vec<(usize, MutexGuard<'a, Shard>)>,
}

impl ShardSet<'_> {
    fn position(&self, id: &RecordId) -> Option<usize> {
        let idx = self.index.shard_of(id);
        self.guards.binary_search_by_key(&idx, |(i, _)| *i).ok()
    }

    /// The locked shard owning `id`, or `None` if it was not part of the set
    pub fn shard(&self, id: &RecordId) -> Option<&Shard> {
        self.position(id).map(|pos| &*self.guards[pos].1)
    }

    pub fn shard_mut(&mut self, id: &RecordId) -> Option<&mut Shard> {
        self.position(id).map(|pos| &mut *self.guards[pos].1)
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Payload, RecordKind};
    use std::sync::Arc;
    use std::time::Duration;

    fn entry_for(record: &MemoryRecord, tier: Tier) -> IndexEntry {
        IndexEntry {
            tier,
            version: 1,
            meta: record.meta(),
            shadows: Vec::new(),
        }
    }

    #[test]
    fn test_shard_of_is_stable_and_in_range() {
        let index = ShardedIndex::new(64);
        for _ in 0..500 {
            let id = RecordId::new();
            let shard = index.shard_of(&id);
            assert!(shard < 64);
            assert_eq!(shard, index.shard_of(&id));
        }
    }

    #[test]
    fn test_zero_shards_clamped() {
        assert_eq!(ShardedIndex::new(0).shard_count(), 1);
    }

    #[tokio::test]
    async fn test_lock_many_dedups_shards() {
        let index = ShardedIndex::new(1);
        let ids = vec![RecordId::new(), RecordId::new(), RecordId::new()];
        let mut set = index.lock_many(ids.clone()).await;
        assert_eq!(set.len(), 1);
        assert!(set.shard_mut(&ids[2]).is_some());
    }

    #[tokio::test]
    async fn test_shard_set_rejects_unlocked_ids() {
        let index = ShardedIndex::new(1024);
        let locked = RecordId::new();
        let set = index.lock_many([locked]).await;

        let other = (0..10_000)
            .map(|_| RecordId::new())
            .find(|id| index.shard_of(id) != index.shard_of(&locked));
        if let Some(other) = other {
            assert!(set.shard(&other).is_none());
        }
        assert!(set.shard(&locked).is_some());
    }

    #[tokio::test]
    async fn test_snapshot_filters() {
        let index = ShardedIndex::new(8);
        let hot = MemoryRecord::new(RecordKind::Turn, Payload::new("a"));
        let cold = MemoryRecord::new(RecordKind::Turn, Payload::new("b"));
        index.lock(&hot.id).await.entries.insert(hot.id, entry_for(&hot, Tier::Hot));
        index
            .lock(&cold.id)
            .await
            .entries
            .insert(cold.id, entry_for(&cold, Tier::Cold));

        let snap = index.snapshot(|e| e.tier == Tier::Cold).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].meta.id, cold.id);
        assert!(index.entry(&hot.id).await.is_some());
    }

    #[test]
    fn test_relocate_clears_shadow_in_target() {
        let record = MemoryRecord::new(RecordKind::Turn, Payload::new("a"));
        let mut entry = entry_for(&record, Tier::Hot);
        entry.add_shadow(Tier::Warm);
        entry.add_shadow(Tier::Warm);
        entry.add_shadow(Tier::Hot);
        assert_eq!(entry.shadows, vec![Tier::Warm]);

        entry.relocate(Tier::Warm);
        assert!(entry.shadows.is_empty());
    }

    mod hot_queue {
        use super::*;
        use chrono::Duration as ChronoDuration;

        fn meta_at(accessed: DateTime<Utc>, count: u32) -> RecordMeta {
            let mut record = MemoryRecord::new_at(RecordKind::Turn, Payload::new("h"), accessed);
            record.access_count = count;
            record.meta()
        }

        #[tokio::test]
        async fn test_victim_is_least_recent() {
            let queue = HotQueue::new();
            let now = Utc::now();
            let old = meta_at(now - ChronoDuration::hours(3), 0);
            let new = meta_at(now, 0);
            queue.admit(&new).await;
            queue.admit(&old).await;

            let victim = queue
                .victim(&EvictionPolicy::default(), now, 8, &HashSet::new())
                .await
                .unwrap();
            assert_eq!(victim.id, old.id);
        }

        #[tokio::test]
        async fn test_frequency_protects_within_window() {
            let queue = HotQueue::new();
            let now = Utc::now();
            let busy = meta_at(now - ChronoDuration::minutes(20), 500);
            let idle = meta_at(now - ChronoDuration::minutes(10), 0);
            queue.admit(&busy).await;
            queue.admit(&idle).await;

            let victim = queue
                .victim(&EvictionPolicy::default(), now, 8, &HashSet::new())
                .await
                .unwrap();
            assert_eq!(victim.id, idle.id);
        }

        #[tokio::test]
        async fn test_readmit_moves_to_back() {
            let queue = HotQueue::new();
            let now = Utc::now();
            let mut first = meta_at(now - ChronoDuration::hours(2), 0);
            let second = meta_at(now - ChronoDuration::hours(1), 0);
            queue.admit(&first).await;
            queue.admit(&second).await;

            first.mark_accessed(now);
            queue.admit(&first).await;
            assert_eq!(queue.len().await, 2);

            let policy = EvictionPolicy::default();
            let victim = queue.victim(&policy, now, 8, &HashSet::new()).await.unwrap();
            assert_eq!(victim.id, second.id);

            let exclude: HashSet<RecordId> = [second.id].into_iter().collect();
            let victim = queue.victim(&policy, now, 8, &exclude).await.unwrap();
            assert_eq!(victim.id, first.id);
        }

        #[tokio::test]
        async fn test_remove_and_size() {
            let queue = HotQueue::new();
            let meta = meta_at(Utc::now(), 0);
            queue.admit(&meta).await;
            assert_eq!(queue.size_of(&meta.id).await, Some(1));

            queue.remove(&meta.id).await;
            queue.remove(&meta.id).await;
            assert_eq!(queue.size_of(&meta.id).await, None);
            assert_eq!(queue.len().await, 0);
            let none = queue
                .victim(&EvictionPolicy::default(), Utc::now(), 8, &HashSet::new())
                .await;
            assert!(none.is_none());
        }
    }

    #[tokio::test]
    async fn test_opposite_order_lock_many_does_not_deadlock() {
        let index = Arc::new(ShardedIndex::new(16));
        let ids: Vec<RecordId> = (0..32).map(|_| RecordId::new()).collect();
        let reversed: Vec<RecordId> = ids.iter().rev().copied().collect();

        let mut handles = Vec::new();
        for batch in [ids, reversed] {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let _set = index.lock_many(batch.clone()).await;
                    tokio::task::yield_now().await;
                }
            }));
        }

        let all = futures::future::join_all(handles);
        tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("lock_many deadlocked");
    }
}
