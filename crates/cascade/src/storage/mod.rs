//! Tiered storage: index, placement policy and tier moves

pub mod eviction;
pub mod index;
pub mod tiers;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::adapters::BlobError;
use crate::error::{CacheError, Result};
use crate::memory::{MemoryRecord, RecordId, RecordMeta, Tier};

pub use eviction::EvictionPolicy;
pub use index::{HotQueue, IndexEntry, ShardedIndex};
pub use tiers::{TierBlobs, TieredStore};

/// Point in time after which blob I/O gives up
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Wait as long as the store takes
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Await a blob operation, mapping expiry and store errors to `StorageUnavailable`
    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, BlobError>>,
    {
        match self.0 {
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(result) => result.map_err(CacheError::from),
                Err(_) => Err(CacheError::StorageUnavailable(format!(
                    "{op} did not complete before the deadline"
                ))),
            },
            None => fut.await.map_err(CacheError::from),
        }
    }
}

/// Index entry as seen by a background scan
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub id: RecordId,
    pub tier: Tier,
    /// Content version at scan time
    pub version: u64,
    /// Score at scan time
    pub score: f64,
    pub meta: RecordMeta,
}

impl IndexSnapshot {
    pub fn member(&self) -> GroupMember {
        GroupMember {
            id: self.id,
            version: self.version,
        }
    }
}

/// A record expected to still hold the content version a scan saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMember {
    pub id: RecordId,
    pub version: u64,
}

/// Result of a demote sweep
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub from: Tier,
    pub to: Tier,
    /// Entries of `from` considered for the move
    pub examined: usize,
    pub moved: usize,
    pub bytes_moved: u64,
    /// Entries skipped because their move failed
    pub failed: usize,
}

impl SweepReport {
    fn new(from: Tier, to: Tier) -> Self {
        Self {
            from,
            to,
            examined: 0,
            moved: 0,
            bytes_moved: 0,
            failed: 0,
        }
    }
}

/// Count and bytes held by one tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierUsage {
    pub count: usize,
    pub bytes: u64,
}

/// Snapshot of tier counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    pub hot: TierUsage,
    pub warm: TierUsage,
    pub cold: TierUsage,
    /// Indexed records per consolidation generation
    pub generations: BTreeMap<u32, usize>,
    /// Indexed records with a stale copy awaiting cleanup
    pub pending_shadows: usize,
}

impl TierStats {
    pub fn tier(&self, tier: Tier) -> TierUsage {
        match tier {
            Tier::Hot => self.hot,
            Tier::Warm => self.warm,
            Tier::Cold => self.cold,
        }
    }

    pub fn total_records(&self) -> usize {
        self.hot.count + self.warm.count + self.cold.count
    }
}

/// What the startup scan found and repaired
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub warm_records: usize,
    pub cold_records: usize,
    /// Blobs already replaced by a consolidated record
    pub superseded_removed: usize,
    /// Colder copies of ids also present in a warmer tier
    pub duplicates_removed: usize,
    /// Blobs that could not be decoded and were left unindexed
    pub undecodable: usize,
}

/// Tier operations available to background workers.
///
/// The consolidation engine and the maintenance loop only talk to storage
/// through this trait, which keeps them testable against a fake store.
#[async_trait]
pub trait TierOps: Send + Sync {
    /// Entries currently indexed in any of `tiers`
    async fn scan(&self, tiers: &[Tier]) -> Vec<IndexSnapshot>;

    /// Read a record without access accounting or promotion
    async fn fetch(&self, id: RecordId) -> Result<Option<MemoryRecord>>;

    /// Atomically replace `members` with `new_record`; returns the tier it
    /// landed in. Fails with `Conflict` if any member was rewritten, promoted
    /// or deleted since it was scanned.
    async fn replace_group(&self, members: &[GroupMember], new_record: MemoryRecord) -> Result<Tier>;

    async fn demote_sweep(&self, from: Tier, to: Tier, budget_bytes: u64) -> Result<SweepReport>;

    /// Delete up to `limit` stale copies; returns how many were removed
    async fn cleanup_shadows(&self, limit: usize) -> usize;
}
