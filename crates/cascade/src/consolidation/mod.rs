//! Background consolidation of aging records into episodic summaries
//!
//! Each tick scans Warm and Cold through [`TierOps`], groups old, low-value
//! records of the same conversation, asks the summarizer for one denser
//! record per group and swaps it in with `replace_group`. A group that fails
//! anywhere is left untouched and retried on a later tick.

pub mod grouping;

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::adapters::{Summarizer, Summary};
use crate::clock::Clock;
use crate::config::ConsolidationConfig;
use crate::error::CacheError;
use crate::memory::{MemoryRecord, Payload, RecordId, RecordKind, Tier};
use crate::storage::{GroupMember, IndexSnapshot, TierOps};

pub use grouping::{group_candidates, select_candidates};

/// Progress of one group through a consolidation tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    /// Selected as a candidate; where a failed group starts over next tick
    Scanned,
    Grouped,
    Summarizing,
    Committing,
    Done,
}

impl GroupState {
    /// State a group returns to after failing in this one
    pub fn on_failure(self) -> GroupState {
        match self {
            GroupState::Summarizing | GroupState::Committing => GroupState::Scanned,
            other => other,
        }
    }
}

/// Why a group was left as it was
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    SummarizerFailed(String),
    SummarizerTimeout,
    Storage(String),
    Conflict(String),
    MemberMissing(RecordId),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::SummarizerFailed(e) => write!(f, "summarizer failed: {e}"),
            SkipReason::SummarizerTimeout => write!(f, "summarizer timed out"),
            SkipReason::Storage(e) => write!(f, "storage: {e}"),
            SkipReason::Conflict(e) => write!(f, "conflict: {e}"),
            SkipReason::MemberMissing(id) => write!(f, "member {id} disappeared"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedGroup {
    pub new_id: RecordId,
    pub tier: Tier,
    pub generation: u32,
    pub source_ids: Vec<RecordId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedGroup {
    pub source_ids: Vec<RecordId>,
    /// State the group was in when it failed
    pub failed_in: GroupState,
    /// State it was returned to
    pub resumes_in: GroupState,
    pub reason: SkipReason,
}

/// Outcome of one tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    /// Another run was in progress, nothing was done
    pub skipped_busy: bool,
    pub candidates: usize,
    pub groups: usize,
    pub consolidated: Vec<ConsolidatedGroup>,
    pub skipped: Vec<SkippedGroup>,
}

impl ConsolidationReport {
    pub fn records_replaced(&self) -> usize {
        self.consolidated.iter().map(|g| g.source_ids.len()).sum()
    }
}

/// Cumulative engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationStats {
    pub runs: u64,
    pub busy_skips: u64,
    pub groups_committed: u64,
    pub groups_skipped: u64,
    /// Skipped groups that failed while summarizing
    pub summarize_failures: u64,
    /// Skipped groups that failed while committing
    pub commit_failures: u64,
    pub records_replaced: u64,
}

#[derive(Debug, Default)]
struct EngineCounters {
    runs: AtomicU64,
    busy_skips: AtomicU64,
    groups_committed: AtomicU64,
    groups_skipped: AtomicU64,
    summarize_failures: AtomicU64,
    commit_failures: AtomicU64,
    records_replaced: AtomicU64,
}

/// Clears the running flag when a run ends, including by panic or cancellation
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Build the consolidated record for a group given in chronological order.
///
/// Returns `None` for an empty group.
pub fn merge_group(members: &[MemoryRecord], summary: Summary) -> Option<MemoryRecord> {
    let created_at = members.iter().map(|m| m.created_at).min()?;
    let last_accessed_at = members.iter().map(|m| m.last_accessed_at).max()?;
    let generation = members
        .iter()
        .map(|m| m.consolidation_generation)
        .max()?
        .saturating_add(1);

    let mut seen = HashSet::new();
    let lineage: Vec<RecordId> = members
        .iter()
        .flat_map(|m| m.ancestry())
        .filter(|id| seen.insert(*id))
        .collect();

    let mut record = MemoryRecord::new_at(RecordKind::Summary, Payload::from(summary), created_at);
    record.last_accessed_at = last_accessed_at;
    record.conversation_id = members[0].conversation_id.clone();
    record.consolidation_generation = generation;
    record.source_ids = members.iter().map(|m| m.id).collect();
    record.lineage = lineage;
    Some(record)
}

/// Periodic consolidation over a tier store.
pub struct ConsolidationEngine<S: TierOps + ?Sized> {
    store: Arc<S>,
    summarizer: Arc<dyn Summarizer>,
    config: ConsolidationConfig,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    counters: EngineCounters,
}

impl<S: TierOps + ?Sized> ConsolidationEngine<S> {
    pub fn new(
        store: Arc<S>,
        summarizer: Arc<dyn Summarizer>,
        config: ConsolidationConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            summarizer,
            config,
            clock,
            running: AtomicBool::new(false),
            counters: EngineCounters::default(),
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn stats(&self) -> ConsolidationStats {
        ConsolidationStats {
            runs: self.counters.runs.load(Ordering::Relaxed),
            busy_skips: self.counters.busy_skips.load(Ordering::Relaxed),
            groups_committed: self.counters.groups_committed.load(Ordering::Relaxed),
            groups_skipped: self.counters.groups_skipped.load(Ordering::Relaxed),
            summarize_failures: self.counters.summarize_failures.load(Ordering::Relaxed),
            commit_failures: self.counters.commit_failures.load(Ordering::Relaxed),
            records_replaced: self.counters.records_replaced.load(Ordering::Relaxed),
        }
    }

    /// Run one consolidation pass. Skipped, not queued, if a pass is already running.
    pub async fn run_once(&self) -> ConsolidationReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.busy_skips.fetch_add(1, Ordering::Relaxed);
            debug!("Consolidation already running, skipping tick");
            return ConsolidationReport {
                skipped_busy: true,
                ..Default::default()
            };
        }
        let _guard = RunGuard(&self.running);

        let now = self.clock.now();
        let entries = self.store.scan(&[Tier::Warm, Tier::Cold]).await;
        let candidates = select_candidates(entries, &self.config, now);
        let candidate_count = candidates.len();
        let groups = group_candidates(candidates, &self.config);

        let mut report = ConsolidationReport {
            candidates: candidate_count,
            groups: groups.len(),
            ..Default::default()
        };

        for group in groups {
            let source_ids: Vec<RecordId> = group.iter().map(|e| e.id).collect();
            debug!(size = source_ids.len(), state = ?GroupState::Grouped, "Consolidating group");
            match self.consolidate_group(&group).await {
                Ok(done) => report.consolidated.push(done),
                Err((failed_in, reason)) => {
                    let resumes_in = failed_in.on_failure();
                    match failed_in {
                        GroupState::Summarizing => {
                            self.counters.summarize_failures.fetch_add(1, Ordering::Relaxed);
                        }
                        GroupState::Committing => {
                            self.counters.commit_failures.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {}
                    }
                    warn!(
                        size = source_ids.len(),
                        state = ?failed_in,
                        resumes_in = ?resumes_in,
                        reason = %reason,
                        "Consolidation skipped for group"
                    );
                    report.skipped.push(SkippedGroup {
                        source_ids,
                        failed_in,
                        resumes_in,
                        reason,
                    });
                }
            }
        }

        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        self.counters
            .groups_committed
            .fetch_add(report.consolidated.len() as u64, Ordering::Relaxed);
        self.counters
            .groups_skipped
            .fetch_add(report.skipped.len() as u64, Ordering::Relaxed);
        self.counters
            .records_replaced
            .fetch_add(report.records_replaced() as u64, Ordering::Relaxed);

        if report.groups > 0 {
            info!(
                candidates = report.candidates,
                groups = report.groups,
                committed = report.consolidated.len(),
                skipped = report.skipped.len(),
                "Consolidation pass finished"
            );
        }
        report
    }

    async fn consolidate_group(
        &self,
        group: &[IndexSnapshot],
    ) -> Result<ConsolidatedGroup, (GroupState, SkipReason)> {
        let ids: Vec<RecordId> = group.iter().map(|e| e.id).collect();
        let expected: Vec<GroupMember> = group.iter().map(IndexSnapshot::member).collect();

        // Member content is only read here; replace_group rejects the commit
        // if any member was rewritten after the scan.
        let state = GroupState::Summarizing;
        let mut members = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.store.fetch(*id).await {
                Ok(Some(record)) => members.push(record),
                Ok(None) => return Err((state, SkipReason::MemberMissing(*id))),
                Err(e) => return Err((state, SkipReason::Storage(e.to_string()))),
            }
        }
        let payloads: Vec<Payload> = members.iter().map(|m| m.payload.clone()).collect();

        let summary = match tokio::time::timeout(
            self.config.summarize_timeout(),
            self.summarizer.summarize(&payloads),
        )
        .await
        {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => return Err((state, SkipReason::SummarizerFailed(e.to_string()))),
            Err(_) => return Err((state, SkipReason::SummarizerTimeout)),
        };

        let state = GroupState::Committing;
        let record = merge_group(&members, summary)
            .ok_or_else(|| (state, SkipReason::Conflict("empty group".to_string())))?;
        let new_id = record.id;
        let generation = record.consolidation_generation;

        let tier = match self.store.replace_group(&expected, record).await {
            Ok(tier) => tier,
            Err(CacheError::Conflict(msg)) => return Err((state, SkipReason::Conflict(msg))),
            Err(e) => return Err((state, SkipReason::Storage(e.to_string()))),
        };

        debug!(
            id = %new_id,
            state = ?GroupState::Done,
            summarizer = self.summarizer.name(),
            sources = ids.len(),
            "Group consolidated"
        );
        Ok(ConsolidatedGroup {
            new_id,
            tier,
            generation,
            source_ids: ids,
        })
    }

    /// Tick every `interval` until `shutdown` turns true or its sender is dropped.
    pub fn spawn(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        S: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Consolidation task stopped");
        })
    }
}
