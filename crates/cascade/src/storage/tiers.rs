//! Tiered store owning placement across Hot, Warm and Cold
//!
//! Hot records live inside the index shards; Warm and Cold records live in
//! their blob stores under the record's hyphenated id. Every tier-mutating
//! operation performs its blob I/O while holding the record's shard lock and
//! repoints the index only after that I/O succeeded, so the index never
//! names a location that does not exist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::eviction::{EvictionPolicy, compare_scored};
use super::index::{HotQueue, IndexEntry, ShardedIndex};
use super::{
    Deadline, GroupMember, IndexSnapshot, RecoveryReport, SweepReport, TierOps, TierStats,
    TierUsage,
};
use crate::adapters::{BlobStore, VectorIndex};
use crate::clock::Clock;
use crate::config::{Config, HotConfig};
use crate::error::{CacheError, Result};
use crate::memory::{MemoryRecord, RecordId, RecordMeta, Tier, codec};

/// Concurrent blob reads during the recovery scan
const RECOVERY_CONCURRENCY: usize = 16;

/// Least recently accessed Hot residents scored when choosing a victim
const HOT_EVICTION_WINDOW: usize = 32;

/// Blob stores backing the two durable tiers
#[derive(Clone)]
pub struct TierBlobs {
    pub warm: Arc<dyn BlobStore>,
    pub cold: Arc<dyn BlobStore>,
}

impl TierBlobs {
    pub fn new(warm: Arc<dyn BlobStore>, cold: Arc<dyn BlobStore>) -> Self {
        Self { warm, cold }
    }

    pub fn store(&self, tier: Tier) -> Result<&Arc<dyn BlobStore>> {
        match tier {
            Tier::Warm => Ok(&self.warm),
            Tier::Cold => Ok(&self.cold),
            Tier::Hot => Err(CacheError::Invalid(
                "hot tier has no blob store".to_string(),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct TierCounter {
    count: AtomicUsize,
    bytes: AtomicU64,
}

impl TierCounter {
    fn add(&self, bytes: u64) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn sub(&self, bytes: u64) {
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)));
        let _ = self
            .bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| Some(b.saturating_sub(bytes)));
    }

    fn usage(&self) -> TierUsage {
        TierUsage {
            count: self.count.load(Ordering::SeqCst),
            bytes: self.bytes.load(Ordering::SeqCst),
        }
    }
}

/// Three-tier record store.
pub struct TieredStore {
    index: ShardedIndex,
    hot_queue: HotQueue,
    blobs: TierBlobs,
    vectors: Arc<dyn VectorIndex>,
    policy: EvictionPolicy,
    clock: Arc<dyn Clock>,
    hot: HotConfig,
    /// Consolidated records scoring at or above this land in Warm, else Cold
    placement_threshold: f64,
    io_timeout: Duration,
    counters: [TierCounter; 3],
    next_version: AtomicU64,
    generations: DashMap<u32, usize>,
    shadow_copies: AtomicUsize,
    recovery: RecoveryReport,
}

impl TieredStore {
    /// Open the store and rebuild the index from the Warm and Cold blob stores.
    pub async fn open(
        config: &Config,
        blobs: TierBlobs,
        vectors: Arc<dyn VectorIndex>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let mut store = Self {
            index: ShardedIndex::new(config.cache.shard_count),
            hot_queue: HotQueue::new(),
            blobs,
            vectors,
            policy: EvictionPolicy::new(config.eviction),
            clock,
            hot: config.hot.clone(),
            placement_threshold: config.consolidation.score_threshold,
            io_timeout: config.cache.io_timeout(),
            counters: Default::default(),
            next_version: AtomicU64::new(1),
            generations: DashMap::new(),
            shadow_copies: AtomicUsize::new(0),
            recovery: RecoveryReport::default(),
        };
        store.recovery = store.recover().await?;
        Ok(store)
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn shard_count(&self) -> usize {
        self.index.shard_count()
    }

    /// What the recovery scan in `open` found
    pub fn last_recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Deadline used by background operations
    pub fn default_deadline(&self) -> Deadline {
        Deadline::after(self.io_timeout)
    }

    // ---- foreground operations ----

    /// Read a record, recording the access and promoting it on a Warm/Cold hit.
    ///
    /// Returns the record together with the tier it was found in. Promotion
    /// failures are logged and never fail the read.
    pub async fn lookup(
        &self,
        id: RecordId,
        deadline: Deadline,
    ) -> Result<Option<(MemoryRecord, Tier)>> {
        let now = self.clock.now();
        let mut guard = self.index.lock(&id).await;
        let shard = &mut *guard;
        let Some(entry) = shard.entries.get_mut(&id) else {
            return Ok(None);
        };

        let tier = entry.tier;
        let version = entry.version;
        let mut record = match tier {
            Tier::Hot => shard.hot.get(&id).cloned().ok_or(CacheError::NotFound(id))?,
            _ => self.read_blob(tier, &id, deadline).await?,
        };
        entry.meta.mark_accessed(now);
        if tier == Tier::Hot {
            self.hot_queue.admit(&entry.meta).await;
        }
        record.apply_meta(&entry.meta);
        drop(guard);

        if tier != Tier::Hot && self.should_promote(&record, now).await {
            self.promote(record.clone(), tier, version, deadline).await;
        }

        Ok(Some((record, tier)))
    }

    /// Read a record without access accounting or promotion
    pub async fn peek(&self, id: RecordId, deadline: Deadline) -> Result<Option<MemoryRecord>> {
        let guard = self.index.lock(&id).await;
        let Some(entry) = guard.entries.get(&id) else {
            return Ok(None);
        };

        let mut record = match entry.tier {
            Tier::Hot => guard.hot.get(&id).cloned().ok_or(CacheError::NotFound(id))?,
            tier => self.read_blob(tier, &id, deadline).await?,
        };
        record.apply_meta(&entry.meta);
        Ok(Some(record))
    }

    /// Record an access in the index only. Returns false for an unknown id.
    pub async fn touch(&self, id: RecordId) -> bool {
        let now = self.clock.now();
        let mut guard = self.index.lock(&id).await;
        match guard.entries.get_mut(&id) {
            Some(entry) => {
                entry.meta.mark_accessed(now);
                if entry.tier == Tier::Hot {
                    self.hot_queue.admit(&entry.meta).await;
                }
                true
            }
            None => false,
        }
    }

    /// Admit a record into Hot, demoting the lowest-scoring residents to Warm
    /// until it fits.
    pub async fn insert(&self, mut record: MemoryRecord, deadline: Deadline) -> Result<()> {
        record.refresh_size();
        let id = record.id;
        let size = record.size_bytes;
        if size > self.hot.budget_bytes {
            return Err(CacheError::CapacityExceeded {
                size,
                budget: self.hot.budget_bytes,
            });
        }

        if !self.make_room(id, size, deadline).await {
            warn!(id = %id, size, "Hot tier over budget, admitting record with demotion deferred");
        }

        let meta = record.meta();
        let generation = meta.generation;
        let embedding = record.payload.embedding.clone();
        let mut entry = IndexEntry {
            tier: Tier::Hot,
            version: self.next_version(),
            meta: meta.clone(),
            shadows: Vec::new(),
        };

        let mut guard = self.index.lock(&id).await;
        let shard = &mut *guard;
        let previous = shard.entries.remove(&id);
        if let Some(prev) = &previous {
            if prev.tier == Tier::Hot {
                shard.hot.remove(&id);
            }
            for tier in prev.shadows.iter().copied().chain(std::iter::once(prev.tier)) {
                entry.add_shadow(tier);
            }
        }
        let shadows_now = entry.shadows.len();
        shard.hot.insert(id, record);
        shard.entries.insert(id, entry);
        self.hot_queue.admit(&meta).await;
        drop(guard);

        let shadows_before = match &previous {
            Some(prev) => {
                self.counters[prev.tier.index()].sub(prev.meta.size_bytes);
                self.generation_removed(prev.meta.generation);
                prev.shadows.len()
            }
            None => 0,
        };
        self.shadow_delta(shadows_before, shadows_now);
        self.counters[Tier::Hot.index()].add(size);
        self.generation_added(generation);

        match embedding {
            Some(embedding) => self.index_vector(id, &embedding).await,
            None if previous.is_some() => self.remove_vector(id).await,
            None => {}
        }

        debug!(id = %id, size, replaced = previous.is_some(), "Inserted record into hot tier");
        Ok(())
    }

    /// Remove a record and every copy of it. Returns false if it was absent.
    ///
    /// A storage failure leaves the index entry in place so the delete can be
    /// retried.
    pub async fn delete(&self, id: RecordId, deadline: Deadline) -> Result<bool> {
        let mut guard = self.index.lock(&id).await;
        let shard = &mut *guard;
        let Some(entry) = shard.entries.get(&id).cloned() else {
            return Ok(false);
        };

        let key = id.blob_key();
        for tier in &entry.shadows {
            deadline
                .run("shadow delete", self.blobs.store(*tier)?.delete(&key))
                .await?;
        }
        if entry.tier != Tier::Hot {
            deadline
                .run("blob delete", self.blobs.store(entry.tier)?.delete(&key))
                .await?;
        }

        shard.entries.remove(&id);
        if shard.hot.remove(&id).is_some() {
            self.hot_queue.remove(&id).await;
        }
        drop(guard);

        self.counters[entry.tier.index()].sub(entry.meta.size_bytes);
        self.generation_removed(entry.meta.generation);
        self.shadow_delta(entry.shadows.len(), 0);
        self.remove_vector(id).await;

        debug!(id = %id, tier = %entry.tier, "Deleted record");
        Ok(true)
    }

    /// Demote every Hot record to Warm. Returns how many were moved.
    pub async fn flush(&self, deadline: Deadline) -> Result<usize> {
        let residents = self.index.snapshot(|e| e.tier == Tier::Hot).await;
        let mut flushed = 0;
        for entry in residents {
            if self.demote_hot(entry.meta.id, deadline).await?.is_some() {
                flushed += 1;
            }
        }
        info!(flushed, "Flushed hot tier to warm storage");
        Ok(flushed)
    }

    pub async fn locate(&self, id: RecordId) -> Option<Tier> {
        self.index.entry(&id).await.map(|e| e.tier)
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            hot: self.counters[Tier::Hot.index()].usage(),
            warm: self.counters[Tier::Warm.index()].usage(),
            cold: self.counters[Tier::Cold.index()].usage(),
            generations: self
                .generations
                .iter()
                .filter(|e| *e.value() > 0)
                .map(|e| (*e.key(), *e.value()))
                .collect::<BTreeMap<_, _>>(),
            pending_shadows: self.shadow_copies.load(Ordering::SeqCst),
        }
    }

    // ---- background operations ----

    pub async fn scan(&self, tiers: &[Tier]) -> Vec<IndexSnapshot> {
        let now = self.clock.now();
        self.index
            .snapshot(|e| tiers.contains(&e.tier))
            .await
            .into_iter()
            .map(|e| IndexSnapshot {
                id: e.meta.id,
                tier: e.tier,
                version: e.version,
                score: self.policy.score(&e.meta, now),
                meta: e.meta,
            })
            .collect()
    }

    /// Push the lowest-scoring entries of `from` into `to` until `from` holds
    /// at most `budget_bytes`.
    pub async fn demote_sweep(&self, from: Tier, to: Tier, budget_bytes: u64) -> Result<SweepReport> {
        if from == Tier::Hot || to.index() <= from.index() {
            return Err(CacheError::Invalid(format!(
                "cannot sweep {from} into {to}"
            )));
        }

        let mut report = SweepReport::new(from, to);
        let usage = self.counters[from.index()].usage();
        if usage.bytes <= budget_bytes {
            return Ok(report);
        }

        let now = self.clock.now();
        let candidates = self.ranked(from, now).await;
        let mut excess = usage.bytes - budget_bytes;

        for (_, meta) in candidates {
            if excess == 0 {
                break;
            }
            report.examined += 1;
            match self.move_blob(meta.id, from, to, self.default_deadline()).await {
                Ok(Some(size)) => {
                    report.moved += 1;
                    report.bytes_moved += size;
                    excess = excess.saturating_sub(size);
                }
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(id = %meta.id, from = %from, to = %to, error = %e, "Demotion failed, skipping");
                }
            }
        }

        if report.moved > 0 || report.failed > 0 {
            info!(
                from = %from,
                to = %to,
                moved = report.moved,
                bytes = report.bytes_moved,
                failed = report.failed,
                "Demote sweep finished"
            );
        }
        Ok(report)
    }

    /// Replace a group of Warm/Cold records with one consolidated record.
    ///
    /// Holds the shards of every id involved for the whole commit, so readers
    /// observe either all old ids or only the new one. Every member must still
    /// hold the content version it had when it was scanned.
    pub async fn replace_group(&self, members: &[GroupMember], mut new_record: MemoryRecord) -> Result<Tier> {
        let old_ids: Vec<RecordId> = members.iter().map(|m| m.id).collect();
        if old_ids.is_empty() {
            return Err(CacheError::Invalid("empty group".to_string()));
        }
        let mut seen = HashSet::with_capacity(old_ids.len());
        if !old_ids.iter().all(|id| seen.insert(*id)) || seen.contains(&new_record.id) {
            return Err(CacheError::Invalid(
                "group ids must be distinct from each other and from the new record".to_string(),
            ));
        }

        new_record.refresh_size();
        let new_id = new_record.id;
        let now = self.clock.now();
        let meta = new_record.meta();
        let score = self.policy.score(&meta, now);
        let target = if score >= self.placement_threshold {
            Tier::Warm
        } else {
            Tier::Cold
        };
        let key = new_id.blob_key();
        let encoded = codec::encode(&new_record)?;
        let deadline = self.default_deadline();

        let mut set = self
            .index
            .lock_many(old_ids.iter().copied().chain(std::iter::once(new_id)))
            .await;

        for member in members {
            let id = &member.id;
            match set.shard(id).and_then(|s| s.entries.get(id)) {
                Some(entry) if entry.tier == Tier::Hot => {
                    return Err(CacheError::Conflict(format!(
                        "{id} was promoted to the hot tier"
                    )));
                }
                Some(entry) if entry.version != member.version => {
                    return Err(CacheError::Conflict(format!(
                        "{id} was rewritten since it was scanned"
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(CacheError::Conflict(format!("{id} is no longer indexed")));
                }
            }
        }
        if set
            .shard(&new_id)
            .is_some_and(|s| s.entries.contains_key(&new_id))
        {
            return Err(CacheError::Conflict(format!("{new_id} is already indexed")));
        }

        deadline
            .run("consolidated write", self.blobs.store(target)?.put(&key, encoded))
            .await?;

        let shard = set
            .shard_mut(&new_id)
            .ok_or_else(|| CacheError::Conflict(format!("shard for {new_id} not held")))?;
        shard.entries.insert(
            new_id,
            IndexEntry {
                tier: target,
                version: self.next_version(),
                meta: meta.clone(),
                shadows: Vec::new(),
            },
        );

        let mut removed = Vec::with_capacity(old_ids.len());
        for id in &old_ids {
            if let Some(entry) = set.shard_mut(id).and_then(|s| s.entries.remove(id)) {
                removed.push(entry);
            }
        }
        drop(set);

        self.counters[target.index()].add(meta.size_bytes);
        self.generation_added(meta.generation);
        for entry in &removed {
            self.counters[entry.tier.index()].sub(entry.meta.size_bytes);
            self.generation_removed(entry.meta.generation);
            self.shadow_delta(entry.shadows.len(), 0);
        }

        // The index no longer names these blobs; anything left behind here
        // is removed by the next recovery scan.
        for entry in &removed {
            let key = entry.meta.id.blob_key();
            for tier in std::iter::once(entry.tier).chain(entry.shadows.iter().copied()) {
                let Ok(store) = self.blobs.store(tier) else {
                    continue;
                };
                if let Err(e) = self
                    .default_deadline()
                    .run("superseded delete", store.delete(&key))
                    .await
                {
                    warn!(id = %entry.meta.id, tier = %tier, error = %e, "Superseded blob left for recovery");
                }
            }
            self.remove_vector(entry.meta.id).await;
        }
        if let Some(embedding) = new_record.payload.embedding.as_deref() {
            self.index_vector(new_id, embedding).await;
        }

        info!(
            id = %new_id,
            tier = %target,
            replaced = removed.len(),
            generation = meta.generation,
            "Committed consolidated record"
        );
        Ok(target)
    }

    /// Delete up to `limit` stale copies left behind by promotion.
    pub async fn cleanup_shadows(&self, limit: usize) -> usize {
        if limit == 0 {
            return 0;
        }

        let shadowed = self.index.snapshot(|e| !e.shadows.is_empty()).await;
        let mut removed = 0;
        for snapshot in shadowed {
            if removed >= limit {
                break;
            }
            let id = snapshot.meta.id;
            let key = id.blob_key();

            let mut guard = self.index.lock(&id).await;
            let Some(entry) = guard.entries.get_mut(&id) else {
                continue;
            };
            let before = entry.shadows.len();
            let mut remaining = Vec::new();
            for tier in std::mem::take(&mut entry.shadows) {
                if removed >= limit {
                    remaining.push(tier);
                    continue;
                }
                let Ok(store) = self.blobs.store(tier) else {
                    continue;
                };
                match self
                    .default_deadline()
                    .run("shadow delete", store.delete(&key))
                    .await
                {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        debug!(id = %id, tier = %tier, error = %e, "Shadow cleanup failed, will retry");
                        remaining.push(tier);
                    }
                }
            }
            entry.shadows = remaining;
            let after = entry.shadows.len();
            drop(guard);
            self.shadow_delta(before, after);
        }

        if removed > 0 {
            debug!(removed, "Cleaned up shadow copies");
        }
        removed
    }

    // ---- internals ----

    async fn read_blob(&self, tier: Tier, id: &RecordId, deadline: Deadline) -> Result<MemoryRecord> {
        let store = self.blobs.store(tier)?;
        match deadline.run("blob read", store.get(&id.blob_key())).await? {
            Some(bytes) => codec::decode(&bytes),
            None => Err(CacheError::StorageUnavailable(format!(
                "{tier} blob for {id} is missing"
            ))),
        }
    }

    fn hot_fits(&self, count: usize, bytes: u64, incoming: u64) -> bool {
        count < self.hot.max_entries && bytes.saturating_add(incoming) <= self.hot.budget_bytes
    }

    /// Entries of `tier` in eviction order
    async fn ranked(&self, tier: Tier, now: DateTime<Utc>) -> Vec<(f64, RecordMeta)> {
        let mut ranked: Vec<(f64, RecordMeta)> = self
            .index
            .snapshot(|e| e.tier == tier)
            .await
            .into_iter()
            .map(|e| (self.policy.score(&e.meta, now), e.meta))
            .collect();
        ranked.sort_by(|a, b| compare_scored(a.0, &a.1, b.0, &b.1));
        ranked
    }

    /// Demote Hot residents until `incoming` bytes fit. A resident copy of
    /// `incoming_id` counts as freed since it is about to be replaced.
    /// Returns false if demotion had to be deferred.
    ///
    /// Victims come from the hot queue, so only their shards are locked.
    async fn make_room(&self, incoming_id: RecordId, incoming: u64, deadline: Deadline) -> bool {
        let usage = self.counters[Tier::Hot.index()].usage();
        if self.hot_fits(usage.count, usage.bytes, incoming) {
            return true;
        }

        let now = self.clock.now();
        let (mut count, mut bytes) = (usage.count, usage.bytes);
        if let Some(size) = self.hot_queue.size_of(&incoming_id).await {
            count = count.saturating_sub(1);
            bytes = bytes.saturating_sub(size);
        }

        let mut passed_over = HashSet::from([incoming_id]);
        while !self.hot_fits(count, bytes, incoming) {
            let Some(victim) = self
                .hot_queue
                .victim(&self.policy, now, HOT_EVICTION_WINDOW, &passed_over)
                .await
            else {
                return false;
            };
            match self.demote_hot(victim.id, deadline).await {
                Ok(Some(freed)) => {
                    count = count.saturating_sub(1);
                    bytes = bytes.saturating_sub(freed);
                }
                // Moved by someone else since it was picked
                Ok(None) => {
                    passed_over.insert(victim.id);
                }
                Err(e) => {
                    warn!(id = %victim.id, error = %e, "Hot demotion failed, deferring");
                    return false;
                }
            }
        }
        true
    }

    /// Move one Hot record to Warm. `None` if it is no longer in Hot.
    async fn demote_hot(&self, id: RecordId, deadline: Deadline) -> Result<Option<u64>> {
        let mut guard = self.index.lock(&id).await;
        let shard = &mut *guard;
        let Some(entry) = shard.entries.get_mut(&id) else {
            return Ok(None);
        };
        if entry.tier != Tier::Hot {
            return Ok(None);
        }
        let Some(record) = shard.hot.get(&id) else {
            return Ok(None);
        };

        let mut record = record.clone();
        record.apply_meta(&entry.meta);
        let key = id.blob_key();
        deadline
            .run("hot demotion", self.blobs.warm.put(&key, codec::encode(&record)?))
            .await?;

        shard.hot.remove(&id);
        self.hot_queue.remove(&id).await;
        let before = entry.shadows.len();
        entry.relocate(Tier::Warm);
        let after = entry.shadows.len();
        let size = entry.meta.size_bytes;
        drop(guard);

        self.shadow_delta(before, after);
        self.move_counter(Tier::Hot, Tier::Warm, size);
        debug!(id = %id, size, "Demoted record from hot to warm");
        Ok(Some(size))
    }

    /// Copy a blob between durable tiers and repoint the index. The source
    /// copy becomes a shadow if it cannot be deleted.
    async fn move_blob(&self, id: RecordId, from: Tier, to: Tier, deadline: Deadline) -> Result<Option<u64>> {
        let mut guard = self.index.lock(&id).await;
        let Some(entry) = guard.entries.get_mut(&id) else {
            return Ok(None);
        };
        if entry.tier != from {
            return Ok(None);
        }

        let key = id.blob_key();
        let mut record = self.read_blob(from, &id, deadline).await?;
        record.apply_meta(&entry.meta);
        deadline
            .run("blob write", self.blobs.store(to)?.put(&key, codec::encode(&record)?))
            .await?;

        let before = entry.shadows.len();
        entry.relocate(to);
        if let Err(e) = deadline
            .run("blob delete", self.blobs.store(from)?.delete(&key))
            .await
        {
            debug!(id = %id, tier = %from, error = %e, "Source copy kept as shadow");
            entry.add_shadow(from);
        }
        let after = entry.shadows.len();
        let size = entry.meta.size_bytes;
        drop(guard);

        self.shadow_delta(before, after);
        self.move_counter(from, to, size);
        debug!(id = %id, from = %from, to = %to, size, "Moved record");
        Ok(Some(size))
    }

    /// Whether a freshly read Warm/Cold record deserves a Hot slot
    async fn should_promote(&self, record: &MemoryRecord, now: DateTime<Utc>) -> bool {
        if record.size_bytes > self.hot.budget_bytes {
            return false;
        }
        let usage = self.counters[Tier::Hot.index()].usage();
        if self.hot_fits(usage.count, usage.bytes, record.size_bytes) {
            return true;
        }

        let score = self.policy.score(&record.meta(), now);
        self.hot_queue
            .victim(&self.policy, now, HOT_EVICTION_WINDOW, &HashSet::new())
            .await
            .is_none_or(|min| score > self.policy.score(&min, now))
    }

    /// Copy a record read from `from` into Hot, leaving the blob as a shadow.
    /// Skipped if the record moved or was rewritten since it was read.
    async fn promote(&self, record: MemoryRecord, from: Tier, version: u64, deadline: Deadline) -> bool {
        let id = record.id;
        if !self.make_room(id, record.size_bytes, deadline).await {
            debug!(id = %id, "Promotion skipped, hot tier full");
            return false;
        }

        let mut guard = self.index.lock(&id).await;
        let shard = &mut *guard;
        let Some(entry) = shard.entries.get_mut(&id) else {
            return false;
        };
        if entry.tier != from || entry.version != version {
            return false;
        }

        let before = entry.shadows.len();
        entry.relocate(Tier::Hot);
        entry.add_shadow(from);
        self.hot_queue.admit(&entry.meta).await;
        let after = entry.shadows.len();
        let size = entry.meta.size_bytes;
        let mut record = record;
        record.apply_meta(&entry.meta);
        shard.hot.insert(id, record);
        drop(guard);

        self.shadow_delta(before, after);
        self.move_counter(from, Tier::Hot, size);
        debug!(id = %id, from = %from, "Promoted record to hot tier");
        true
    }

    fn next_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn move_counter(&self, from: Tier, to: Tier, bytes: u64) {
        self.counters[from.index()].sub(bytes);
        self.counters[to.index()].add(bytes);
    }

    fn generation_added(&self, generation: u32) {
        *self.generations.entry(generation).or_insert(0) += 1;
    }

    fn generation_removed(&self, generation: u32) {
        if let Entry::Occupied(mut e) = self.generations.entry(generation) {
            let n = e.get_mut();
            *n = n.saturating_sub(1);
            if *n == 0 {
                e.remove();
            }
        }
    }

    fn shadow_delta(&self, before: usize, after: usize) {
        if after > before {
            self.shadow_copies.fetch_add(after - before, Ordering::SeqCst);
        } else if before > after {
            let diff = before - after;
            let _ = self
                .shadow_copies
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(diff)));
        }
    }

    async fn index_vector(&self, id: RecordId, embedding: &[f32]) {
        if let Err(e) = self.vectors.index(id, embedding).await {
            warn!(id = %id, index = self.vectors.name(), error = %e, "Vector index update failed");
        }
    }

    async fn remove_vector(&self, id: RecordId) {
        if let Err(e) = self.vectors.remove(id).await {
            warn!(id = %id, index = self.vectors.name(), error = %e, "Vector index removal failed");
        }
    }

    // ---- recovery ----

    /// Rebuild the index from the durable tiers.
    ///
    /// Finishes interrupted consolidations by deleting blobs that a
    /// consolidated record already supersedes, and keeps only the warmest
    /// copy of any id found in both tiers.
    async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut found: Vec<(Tier, MemoryRecord)> = Vec::new();
        let mut superseded: HashSet<RecordId> = HashSet::new();

        for tier in [Tier::Warm, Tier::Cold] {
            let store = self.blobs.store(tier)?;
            let keys = store.keys().await?;
            let reads: Vec<_> = stream::iter(keys)
                .map(|key| async move {
                    let result = store.get(&key).await;
                    (key, result)
                })
                .buffer_unordered(RECOVERY_CONCURRENCY)
                .collect()
                .await;

            for (key, result) in reads {
                let Some(bytes) = result? else {
                    continue;
                };
                let record = match codec::decode(&bytes) {
                    Ok(record) if record.id.blob_key() == key => record,
                    Ok(record) => {
                        warn!(key = %key, tier = %tier, id = %record.id, "Blob key does not match record id, skipping");
                        report.undecodable += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(key = %key, tier = %tier, error = %e, "Undecodable blob, skipping");
                        report.undecodable += 1;
                        continue;
                    }
                };
                if record.is_consolidated() {
                    superseded.extend(record.source_ids.iter().copied());
                    superseded.extend(record.lineage.iter().copied());
                }
                found.push((tier, record));
            }
        }

        // Warm sorts before Cold so the warmer copy of a duplicate wins
        found.sort_by_key(|(tier, _)| tier.index());

        let mut kept: HashMap<RecordId, Tier> = HashMap::new();
        for (tier, record) in found {
            let id = record.id;
            let key = id.blob_key();
            let store = self.blobs.store(tier)?;

            if superseded.contains(&id) {
                match store.delete(&key).await {
                    Ok(()) => report.superseded_removed += 1,
                    Err(e) => warn!(id = %id, tier = %tier, error = %e, "Could not remove superseded blob"),
                }
                continue;
            }
            if kept.contains_key(&id) {
                match store.delete(&key).await {
                    Ok(()) => report.duplicates_removed += 1,
                    Err(e) => warn!(id = %id, tier = %tier, error = %e, "Could not remove duplicate blob"),
                }
                continue;
            }
            kept.insert(id, tier);

            let meta = record.meta();
            let size = meta.size_bytes;
            let generation = meta.generation;
            let entry = IndexEntry {
                tier,
                version: self.next_version(),
                meta,
                shadows: Vec::new(),
            };
            self.index.lock(&id).await.entries.insert(id, entry);
            self.counters[tier.index()].add(size);
            self.generation_added(generation);
            if let Some(embedding) = record.payload.embedding.as_deref() {
                self.index_vector(id, embedding).await;
            }

            match tier {
                Tier::Warm => report.warm_records += 1,
                _ => report.cold_records += 1,
            }
        }

        info!(
            warm = report.warm_records,
            cold = report.cold_records,
            superseded = report.superseded_removed,
            duplicates = report.duplicates_removed,
            undecodable = report.undecodable,
            "Recovered tier index"
        );
        Ok(report)
    }
}

#[async_trait]
impl TierOps for TieredStore {
    async fn scan(&self, tiers: &[Tier]) -> Vec<IndexSnapshot> {
        TieredStore::scan(self, tiers).await
    }

    async fn fetch(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        self.peek(id, self.default_deadline()).await
    }

    async fn replace_group(&self, members: &[GroupMember], new_record: MemoryRecord) -> Result<Tier> {
        TieredStore::replace_group(self, members, new_record).await
    }

    async fn demote_sweep(&self, from: Tier, to: Tier, budget_bytes: u64) -> Result<SweepReport> {
        TieredStore::demote_sweep(self, from, to, budget_bytes).await
    }

    async fn cleanup_shadows(&self, limit: usize) -> usize {
        TieredStore::cleanup_shadows(self, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryVectorIndex, MemoryBlobStore};
    use crate::clock::ManualClock;
    use crate::memory::{Payload, RecordKind};
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        store: TieredStore,
        warm: Arc<MemoryBlobStore>,
        cold: Arc<MemoryBlobStore>,
        vectors: Arc<InMemoryVectorIndex>,
        clock: Arc<ManualClock>,
    }

    fn config(max_entries: usize, budget_bytes: u64) -> Config {
        let mut config = Config::default();
        config.cache.shard_count = 8;
        config.hot.max_entries = max_entries;
        config.hot.budget_bytes = budget_bytes;
        config
    }

    async fn fixture(config: Config) -> Fixture {
        let warm = Arc::new(MemoryBlobStore::new());
        let cold = Arc::new(MemoryBlobStore::new());
        reopen(config, warm, cold).await
    }

    async fn reopen(config: Config, warm: Arc<MemoryBlobStore>, cold: Arc<MemoryBlobStore>) -> Fixture {
        let vectors = Arc::new(InMemoryVectorIndex::new());
        let clock = Arc::new(ManualClock::starting_now());
        let store = TieredStore::open(
            &config,
            TierBlobs::new(warm.clone(), cold.clone()),
            vectors.clone(),
            clock.clone(),
        )
        .await
        .unwrap();
        Fixture {
            store,
            warm,
            cold,
            vectors,
            clock,
        }
    }

    fn record(f: &Fixture, content: &str) -> MemoryRecord {
        MemoryRecord::new_at(RecordKind::Turn, Payload::new(content), f.clock.now())
    }

    fn deadline() -> Deadline {
        Deadline::after(std::time::Duration::from_secs(5))
    }

    mod insert {
        use super::*;

        #[tokio::test]
        async fn test_insert_then_lookup_hot() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "hello");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();

            let (found, tier) = f.store.lookup(id, deadline()).await.unwrap().unwrap();
            assert_eq!(tier, Tier::Hot);
            assert_eq!(found.access_count, 1);
            assert_eq!(found.payload.content, b"hello".to_vec());
            assert_eq!(f.store.stats().hot, TierUsage { count: 1, bytes: 5 });
        }

        #[tokio::test]
        async fn test_oversized_record_rejected() {
            let f = fixture(config(10, 10)).await;
            let rec = record(&f, "this is far more than ten bytes");

            let result = f.store.insert(rec, deadline()).await;
            assert!(matches!(
                result,
                Err(CacheError::CapacityExceeded { budget: 10, .. })
            ));
            assert_eq!(f.store.stats().hot, TierUsage::default());
        }

        #[tokio::test]
        async fn test_lowest_score_demoted_to_warm() {
            let f = fixture(config(2, 1024)).await;
            let a = record(&f, "a");
            f.clock.advance(ChronoDuration::hours(1));
            let b = record(&f, "b");
            f.clock.advance(ChronoDuration::hours(1));
            let c = record(&f, "c");
            let (a_id, b_id, c_id) = (a.id, b.id, c.id);

            for rec in [a, b, c] {
                f.store.insert(rec, deadline()).await.unwrap();
            }

            assert_eq!(f.store.locate(a_id).await, Some(Tier::Warm));
            assert_eq!(f.store.locate(b_id).await, Some(Tier::Hot));
            assert_eq!(f.store.locate(c_id).await, Some(Tier::Hot));
            assert!(f.warm.contains(&a_id.blob_key()));
            assert_eq!(f.store.stats().hot.count, 2);
            assert_eq!(f.store.stats().warm.count, 1);
        }

        #[tokio::test]
        async fn test_frequently_read_resident_outlives_newer_idle_one() {
            let f = fixture(config(2, 1024)).await;
            let busy = record(&f, "busy");
            let busy_id = busy.id;
            f.store.insert(busy, deadline()).await.unwrap();
            for _ in 0..10 {
                f.store.lookup(busy_id, deadline()).await.unwrap();
            }
            f.clock.advance(ChronoDuration::minutes(10));
            let idle = record(&f, "idle");
            let idle_id = idle.id;
            f.store.insert(idle, deadline()).await.unwrap();
            f.clock.advance(ChronoDuration::minutes(10));

            f.store.insert(record(&f, "new"), deadline()).await.unwrap();
            assert_eq!(f.store.locate(busy_id).await, Some(Tier::Hot));
            assert_eq!(f.store.locate(idle_id).await, Some(Tier::Warm));
            assert_eq!(f.store.hot_queue.len().await, 2);
        }

        #[tokio::test]
        async fn test_byte_budget_respected_after_every_insert() {
            let f = fixture(config(1000, 100)).await;
            for i in 0..20 {
                f.clock.advance(ChronoDuration::seconds(1));
                let rec = record(&f, &format!("{i:030}"));
                f.store.insert(rec, deadline()).await.unwrap();
                assert!(f.store.stats().hot.bytes <= 100);
            }
            assert_eq!(f.store.stats().total_records(), 20);
        }

        #[tokio::test]
        async fn test_unavailable_warm_defers_demotion() {
            let f = fixture(config(1, 1024)).await;
            f.warm.set_unavailable(true);

            f.store.insert(record(&f, "a"), deadline()).await.unwrap();
            f.store.insert(record(&f, "b"), deadline()).await.unwrap();

            assert_eq!(f.store.stats().hot.count, 2);
            assert!(f.warm.is_empty());
        }

        #[tokio::test]
        async fn test_replacing_warm_record_leaves_shadow() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "v1");
            let id = rec.id;
            f.store.insert(rec.clone(), deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();

            let mut updated = rec;
            updated.payload = Payload::new("v2");
            f.store.insert(updated, deadline()).await.unwrap();

            assert_eq!(f.store.locate(id).await, Some(Tier::Hot));
            assert_eq!(f.store.stats().pending_shadows, 1);
            assert_eq!(f.store.stats().total_records(), 1);

            let (found, _) = f.store.lookup(id, deadline()).await.unwrap().unwrap();
            assert_eq!(found.payload.content, b"v2".to_vec());
        }

        #[tokio::test]
        async fn test_embedding_indexed() {
            let f = fixture(config(10, 1024)).await;
            let rec = MemoryRecord::new_at(
                RecordKind::Note,
                Payload::new("n").with_embedding(vec![1.0, 0.0]),
                f.clock.now(),
            );
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();
            assert!(f.vectors.contains(id));

            f.store.delete(id, deadline()).await.unwrap();
            assert!(!f.vectors.contains(id));
        }
    }

    mod lookup {
        use super::*;

        #[tokio::test]
        async fn test_warm_hit_promotes_over_lower_score_resident() {
            let f = fixture(config(2, 1024)).await;
            let a = record(&f, "a");
            f.clock.advance(ChronoDuration::hours(1));
            let b = record(&f, "b");
            f.clock.advance(ChronoDuration::hours(1));
            let c = record(&f, "c");
            let (a_id, b_id) = (a.id, b.id);
            for rec in [a, b, c] {
                f.store.insert(rec, deadline()).await.unwrap();
            }
            assert_eq!(f.store.locate(a_id).await, Some(Tier::Warm));

            let (_, tier) = f.store.lookup(a_id, deadline()).await.unwrap().unwrap();
            assert_eq!(tier, Tier::Warm);
            assert_eq!(f.store.locate(a_id).await, Some(Tier::Hot));
            assert_eq!(f.store.locate(b_id).await, Some(Tier::Warm));
            assert_eq!(f.store.stats().hot.count, 2);
            assert_eq!(f.store.stats().pending_shadows, 1);
        }

        #[tokio::test]
        async fn test_cold_hit_promotes_when_hot_has_room() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "cold");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();
            f.store.demote_sweep(Tier::Warm, Tier::Cold, 0).await.unwrap();
            assert_eq!(f.store.stats().cold.count, 1);

            let (_, tier) = f.store.lookup(id, deadline()).await.unwrap().unwrap();
            assert_eq!(tier, Tier::Cold);
            assert_eq!(f.store.stats().hot.count, 1);
            assert_eq!(f.store.stats().cold.count, 0);
        }

        #[tokio::test]
        async fn test_stale_read_is_not_promoted() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "v1");
            let id = rec.id;
            f.store.insert(rec.clone(), deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();
            let stale = f.store.peek(id, deadline()).await.unwrap().unwrap();
            let read_version = f.store.index.entry(&id).await.unwrap().version;

            let mut updated = rec;
            updated.payload = Payload::new("v2");
            f.store.insert(updated, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();

            assert!(!f.store.promote(stale, Tier::Warm, read_version, deadline()).await);
            assert_eq!(f.store.locate(id).await, Some(Tier::Warm));
            let current = f.store.peek(id, deadline()).await.unwrap().unwrap();
            assert_eq!(current.payload.content, b"v2".to_vec());
        }

        #[tokio::test]
        async fn test_missing_id() {
            let f = fixture(config(10, 1024)).await;
            assert!(f.store.lookup(RecordId::new(), deadline()).await.unwrap().is_none());
            assert!(f.store.peek(RecordId::new(), deadline()).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_peek_does_not_count_or_promote() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "p");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();

            let peeked = f.store.peek(id, deadline()).await.unwrap().unwrap();
            assert_eq!(peeked.access_count, 0);
            assert_eq!(f.store.locate(id).await, Some(Tier::Warm));
        }

        #[tokio::test]
        async fn test_slow_store_times_out() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "slow");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();

            f.warm.set_latency(std::time::Duration::from_millis(500));
            let result = f
                .store
                .lookup(id, Deadline::after(std::time::Duration::from_millis(20)))
                .await;
            assert!(matches!(result, Err(CacheError::StorageUnavailable(_))));
            assert_eq!(f.store.locate(id).await, Some(Tier::Warm));
        }

        #[tokio::test]
        async fn test_touch_is_index_only() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "t");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();

            let reads = f.warm.get_count();
            assert!(f.store.touch(id).await);
            assert!(f.store.touch(id).await);
            assert_eq!(f.warm.get_count(), reads);
            assert!(!f.store.touch(RecordId::new()).await);

            let peeked = f.store.peek(id, deadline()).await.unwrap().unwrap();
            assert_eq!(peeked.access_count, 2);
        }
    }

    mod delete {
        use super::*;

        #[tokio::test]
        async fn test_delete_is_idempotent() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "d");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();

            assert!(f.store.delete(id, deadline()).await.unwrap());
            assert!(!f.store.delete(id, deadline()).await.unwrap());
            assert!(f.store.lookup(id, deadline()).await.unwrap().is_none());
            assert_eq!(f.store.stats().total_records(), 0);
        }

        #[tokio::test]
        async fn test_delete_removes_shadows() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "s");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();
            f.store.lookup(id, deadline()).await.unwrap();
            assert!(f.warm.contains(&id.blob_key()));

            f.store.delete(id, deadline()).await.unwrap();
            assert!(f.warm.is_empty());
            assert_eq!(f.store.stats().pending_shadows, 0);
        }

        #[tokio::test]
        async fn test_failed_delete_keeps_entry() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "x");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();

            f.warm.fail_deletes(true);
            let result = f.store.delete(id, deadline()).await;
            assert!(matches!(result, Err(CacheError::StorageUnavailable(_))));
            assert_eq!(f.store.locate(id).await, Some(Tier::Warm));

            f.warm.fail_deletes(false);
            assert!(f.store.delete(id, deadline()).await.unwrap());
        }
    }

    mod sweep {
        use super::*;

        #[tokio::test]
        async fn test_rejects_hot_source() {
            let f = fixture(config(10, 1024)).await;
            let result = f.store.demote_sweep(Tier::Hot, Tier::Warm, 0).await;
            assert!(matches!(result, Err(CacheError::Invalid(_))));
            let result = f.store.demote_sweep(Tier::Cold, Tier::Warm, 0).await;
            assert!(matches!(result, Err(CacheError::Invalid(_))));
        }

        #[tokio::test]
        async fn test_moves_lowest_scores_until_within_budget() {
            let f = fixture(config(10, 1024)).await;
            let mut ids = Vec::new();
            for i in 0..3 {
                let rec = record(&f, &format!("record-{i:03}"));
                ids.push(rec.id);
                f.store.insert(rec, deadline()).await.unwrap();
                f.clock.advance(ChronoDuration::minutes(1));
            }
            f.store.flush(deadline()).await.unwrap();

            let report = f.store.demote_sweep(Tier::Warm, Tier::Cold, 10).await.unwrap();
            assert_eq!(report.moved, 2);
            assert_eq!(report.bytes_moved, 20);
            assert_eq!(f.store.locate(ids[0]).await, Some(Tier::Cold));
            assert_eq!(f.store.locate(ids[1]).await, Some(Tier::Cold));
            assert_eq!(f.store.locate(ids[2]).await, Some(Tier::Warm));
            assert_eq!(f.warm.len(), 1);
            assert_eq!(f.cold.len(), 2);
        }

        #[tokio::test]
        async fn test_within_budget_is_noop() {
            let f = fixture(config(10, 1024)).await;
            f.store.insert(record(&f, "a"), deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();

            let report = f.store.demote_sweep(Tier::Warm, Tier::Cold, 1024).await.unwrap();
            assert_eq!(report.moved, 0);
            assert_eq!(report.examined, 0);
        }

        #[tokio::test]
        async fn test_undeletable_source_becomes_shadow() {
            let f = fixture(config(10, 1024)).await;
            let rec = record(&f, "a");
            let id = rec.id;
            f.store.insert(rec, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();

            f.warm.fail_deletes(true);
            f.store.demote_sweep(Tier::Warm, Tier::Cold, 0).await.unwrap();
            assert_eq!(f.store.locate(id).await, Some(Tier::Cold));
            assert_eq!(f.store.stats().pending_shadows, 1);

            f.warm.fail_deletes(false);
            assert_eq!(f.store.cleanup_shadows(10).await, 1);
            assert!(f.warm.is_empty());
            assert_eq!(f.store.stats().pending_shadows, 0);
        }
    }

    mod replace {
        use super::*;

        async fn aged_group(f: &Fixture, n: usize) -> Vec<MemoryRecord> {
            let mut group = Vec::new();
            for i in 0..n {
                let rec = record(f, &format!("turn {i}.")).with_conversation("s1");
                group.push(rec.clone());
                f.store.insert(rec, deadline()).await.unwrap();
                f.clock.advance(ChronoDuration::seconds(1));
            }
            f.store.flush(deadline()).await.unwrap();
            f.clock.advance(ChronoDuration::days(2));
            group
        }

        /// Group members at their currently indexed versions
        async fn members(f: &Fixture, ids: &[RecordId]) -> Vec<GroupMember> {
            let mut members = Vec::new();
            for id in ids {
                let version = f.store.index.entry(id).await.map_or(0, |e| e.version);
                members.push(GroupMember { id: *id, version });
            }
            members
        }

        fn summary_of(group: &[MemoryRecord]) -> MemoryRecord {
            let mut summary = MemoryRecord::new_at(
                RecordKind::Summary,
                Payload::new("summary"),
                group[0].created_at,
            );
            summary.consolidation_generation = 1;
            summary.source_ids = group.iter().map(|r| r.id).collect();
            summary.lineage = summary.source_ids.clone();
            summary.conversation_id = Some("s1".to_string());
            summary
        }

        #[tokio::test]
        async fn test_low_score_summary_lands_in_cold() {
            let f = fixture(config(10, 1024)).await;
            let group = aged_group(&f, 3).await;
            let summary = summary_of(&group);
            let ids: Vec<RecordId> = group.iter().map(|r| r.id).collect();
            let new_id = summary.id;

            let members = members(&f, &ids).await;
            let tier = f.store.replace_group(&members, summary).await.unwrap();
            assert_eq!(tier, Tier::Cold);
            for id in &ids {
                assert!(f.store.locate(*id).await.is_none());
                assert!(!f.warm.contains(&id.blob_key()));
            }
            assert!(f.cold.contains(&new_id.blob_key()));
            let stats = f.store.stats();
            assert_eq!(stats.generations.get(&1), Some(&1));
            assert_eq!(stats.generations.get(&0), None);
            assert_eq!(stats.total_records(), 1);
        }

        #[tokio::test]
        async fn test_conflict_when_member_promoted() {
            let f = fixture(config(10, 1024)).await;
            let group = aged_group(&f, 3).await;
            let ids: Vec<RecordId> = group.iter().map(|r| r.id).collect();
            f.store.lookup(ids[1], deadline()).await.unwrap();
            assert_eq!(f.store.locate(ids[1]).await, Some(Tier::Hot));

            let summary = summary_of(&group);
            let members = members(&f, &ids).await;
            let result = f.store.replace_group(&members, summary).await;
            assert!(matches!(result, Err(CacheError::Conflict(_))));
            assert_eq!(f.store.stats().total_records(), 3);
        }

        #[tokio::test]
        async fn test_conflict_when_member_rewritten_after_scan() {
            let f = fixture(config(10, 1024)).await;
            let group = aged_group(&f, 2).await;
            let ids: Vec<RecordId> = group.iter().map(|r| r.id).collect();
            let scanned = members(&f, &ids).await;

            let mut rewritten = group[0].clone();
            rewritten.payload = Payload::new("turn 0, corrected.");
            f.store.insert(rewritten, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();
            assert_eq!(f.store.locate(ids[0]).await, Some(Tier::Warm));

            let summary = summary_of(&group);
            let new_id = summary.id;
            let result = f.store.replace_group(&scanned, summary).await;
            assert!(matches!(result, Err(CacheError::Conflict(_))));
            assert!(!f.cold.contains(&new_id.blob_key()));

            let kept = f.store.peek(ids[0], deadline()).await.unwrap().unwrap();
            assert_eq!(kept.payload.content, b"turn 0, corrected.".to_vec());

            // A fresh scan sees the new version and may commit
            let rescanned = members(&f, &ids).await;
            assert_ne!(rescanned[0].version, scanned[0].version);
            assert_eq!(rescanned[1], scanned[1]);
            f.store.replace_group(&rescanned, summary_of(&group)).await.unwrap();
        }

        #[tokio::test]
        async fn test_tier_moves_keep_version() {
            let f = fixture(config(10, 1024)).await;
            let group = aged_group(&f, 1).await;
            let id = group[0].id;
            let before = members(&f, &[id]).await;

            f.store.demote_sweep(Tier::Warm, Tier::Cold, 0).await.unwrap();
            f.store.touch(id).await;
            assert_eq!(members(&f, &[id]).await, before);
        }

        #[tokio::test]
        async fn test_conflict_when_member_deleted() {
            let f = fixture(config(10, 1024)).await;
            let group = aged_group(&f, 3).await;
            let ids: Vec<RecordId> = group.iter().map(|r| r.id).collect();
            f.store.delete(ids[0], deadline()).await.unwrap();

            let summary = summary_of(&group);
            let new_id = summary.id;
            let members = members(&f, &ids).await;
            let result = f.store.replace_group(&members, summary).await;
            assert!(matches!(result, Err(CacheError::Conflict(_))));
            assert!(!f.cold.contains(&new_id.blob_key()));
            assert!(!f.warm.contains(&new_id.blob_key()));
        }

        #[tokio::test]
        async fn test_failed_write_changes_nothing() {
            let f = fixture(config(10, 1024)).await;
            let group = aged_group(&f, 2).await;
            let ids: Vec<RecordId> = group.iter().map(|r| r.id).collect();
            f.cold.fail_puts(true);

            let members = members(&f, &ids).await;
            let result = f.store.replace_group(&members, summary_of(&group)).await;
            assert!(matches!(result, Err(CacheError::StorageUnavailable(_))));
            for id in &ids {
                assert_eq!(f.store.locate(*id).await, Some(Tier::Warm));
            }
        }

        #[tokio::test]
        async fn test_rejects_duplicate_ids() {
            let f = fixture(config(10, 1024)).await;
            let group = aged_group(&f, 2).await;
            let members = members(&f, &[group[0].id, group[0].id]).await;
            let result = f.store.replace_group(&members, summary_of(&group)).await;
            assert!(matches!(result, Err(CacheError::Invalid(_))));
        }
    }

    mod recovery {
        use super::*;

        #[tokio::test]
        async fn test_reopen_rebuilds_index() {
            let f = fixture(config(10, 1024)).await;
            let a = record(&f, "a");
            let b = record(&f, "b");
            let (a_id, b_id) = (a.id, b.id);
            f.store.insert(a, deadline()).await.unwrap();
            f.store.insert(b, deadline()).await.unwrap();
            f.store.flush(deadline()).await.unwrap();
            f.store.demote_sweep(Tier::Warm, Tier::Cold, 1).await.unwrap();

            let reopened = reopen(config(10, 1024), f.warm.clone(), f.cold.clone()).await;
            let report = reopened.store.last_recovery();
            assert_eq!(report.warm_records + report.cold_records, 2);
            assert!(reopened.store.locate(a_id).await.is_some());
            assert!(reopened.store.locate(b_id).await.is_some());
            assert_eq!(reopened.store.stats().hot.count, 0);
        }

        #[tokio::test]
        async fn test_duplicate_keeps_warmer_copy() {
            let warm = Arc::new(MemoryBlobStore::new());
            let cold = Arc::new(MemoryBlobStore::new());
            let rec = MemoryRecord::new(RecordKind::Turn, Payload::new("dup"));
            let bytes = codec::encode(&rec).unwrap();
            warm.put(&rec.id.blob_key(), bytes.clone()).await.unwrap();
            cold.put(&rec.id.blob_key(), bytes).await.unwrap();

            let f = reopen(config(10, 1024), warm, cold).await;
            assert_eq!(f.store.locate(rec.id).await, Some(Tier::Warm));
            assert!(f.cold.is_empty());
            assert_eq!(f.store.last_recovery().duplicates_removed, 1);
        }

        #[tokio::test]
        async fn test_undecodable_blob_skipped() {
            let warm = Arc::new(MemoryBlobStore::new());
            let cold = Arc::new(MemoryBlobStore::new());
            warm.put("garbage", bytes::Bytes::from_static(b"{not json"))
                .await
                .unwrap();

            let f = reopen(config(10, 1024), warm, cold).await;
            assert_eq!(f.store.last_recovery().undecodable, 1);
            assert_eq!(f.store.stats().total_records(), 0);
        }
    }
}
