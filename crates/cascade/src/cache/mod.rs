//! Public cache facade
//!
//! [`MemoryCache`] composes the tiered store, the consolidation engine and the
//! maintenance loop behind `get`/`put`/`touch`/`delete`. Every method takes
//! `&self` and is safe to call from any number of tasks at once.

pub mod maintenance;

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::adapters::{
    BlobStore, ExtractiveSummarizer, FsBlobStore, MemoryBlobStore, NoopVectorIndex, Summarizer,
    VectorIndex,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageConfig};
use crate::consolidation::{ConsolidationEngine, ConsolidationReport, ConsolidationStats};
use crate::error::Result;
use crate::memory::{MemoryRecord, RecordId, Tier};
use crate::storage::{Deadline, TierBlobs, TierStats, TieredStore};

pub use maintenance::{MaintenanceLoop, MaintenanceReport};

/// External collaborators a cache is opened with
#[derive(Clone)]
pub struct CacheAdapters {
    pub warm: Arc<dyn BlobStore>,
    pub cold: Arc<dyn BlobStore>,
    pub summarizer: Arc<dyn Summarizer>,
    pub vectors: Arc<dyn VectorIndex>,
    pub clock: Arc<dyn Clock>,
}

impl CacheAdapters {
    /// In-process blob stores, extractive summarizer, no vector index
    pub fn in_memory() -> Self {
        Self {
            warm: Arc::new(MemoryBlobStore::new()),
            cold: Arc::new(MemoryBlobStore::new()),
            summarizer: Arc::new(ExtractiveSummarizer::default()),
            vectors: Arc::new(NoopVectorIndex),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// File blob stores under `storage.data_dir`
    pub async fn filesystem(storage: &StorageConfig) -> Result<Self> {
        let warm = FsBlobStore::open(storage.warm_dir()).await?;
        let cold = FsBlobStore::open(storage.cold_dir()).await?;
        Ok(Self {
            warm: Arc::new(warm),
            cold: Arc::new(cold),
            ..Self::in_memory()
        })
    }

    pub fn with_blobs(mut self, warm: Arc<dyn BlobStore>, cold: Arc<dyn BlobStore>) -> Self {
        self.warm = warm;
        self.cold = cold;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_vectors(mut self, vectors: Arc<dyn VectorIndex>) -> Self {
        self.vectors = vectors;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Tier counters plus cumulative consolidation counters
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub tiers: TierStats,
    pub consolidation: ConsolidationStats,
}

/// Tiered memory cache.
pub struct MemoryCache {
    config: Config,
    store: Arc<TieredStore>,
    engine: Arc<ConsolidationEngine<TieredStore>>,
    maintenance: Arc<MaintenanceLoop<TieredStore>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryCache {
    /// Open the cache, running the recovery scan over Warm and Cold.
    ///
    /// Background tasks are not started until [`MemoryCache::start`].
    pub async fn open(config: Config, adapters: CacheAdapters) -> Result<Self> {
        info!(
            warm = adapters.warm.name(),
            cold = adapters.cold.name(),
            summarizer = adapters.summarizer.name(),
            vectors = adapters.vectors.name(),
            "Opening memory cache"
        );

        let store = Arc::new(
            TieredStore::open(
                &config,
                TierBlobs::new(adapters.warm, adapters.cold),
                adapters.vectors,
                adapters.clock.clone(),
            )
            .await?,
        );
        let engine = Arc::new(ConsolidationEngine::new(
            store.clone(),
            adapters.summarizer,
            config.consolidation.clone(),
            adapters.clock,
        ));
        let maintenance = Arc::new(MaintenanceLoop::new(
            store.clone(),
            config.warm.budget_bytes,
            config.maintenance.shadow_cleanup_batch,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            engine,
            maintenance,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the enabled background tasks. Calling it again is a no-op.
    pub fn start(&self) {
        let Ok(mut tasks) = self.tasks.lock() else {
            return;
        };
        if !tasks.is_empty() {
            return;
        }

        if self.config.consolidation.enabled {
            tasks.push(self.engine.clone().spawn(
                self.config.consolidation.interval(),
                self.shutdown_tx.subscribe(),
            ));
            info!(
                interval_secs = self.config.consolidation.interval_secs,
                "Consolidation task started"
            );
        }
        if self.config.maintenance.enabled {
            tasks.push(self.maintenance.clone().spawn(
                self.config.maintenance.interval(),
                self.shutdown_tx.subscribe(),
            ));
            info!(
                interval_secs = self.config.maintenance.interval_secs,
                "Maintenance task started"
            );
        }
    }

    fn deadline(&self) -> Deadline {
        Deadline::after(self.config.cache.io_timeout())
    }

    /// Handle whose calls use `timeout` instead of `cache.io_timeout`
    pub fn with_timeout(&self, timeout: Duration) -> TimedCache<'_> {
        TimedCache {
            cache: self,
            timeout,
        }
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        self.get_within(id, self.deadline()).await
    }

    /// Like `get`, also reporting the tier the record was found in
    pub async fn get_with_tier(&self, id: RecordId) -> Result<Option<(MemoryRecord, Tier)>> {
        self.store.lookup(id, self.deadline()).await
    }

    pub async fn put(&self, record: MemoryRecord) -> Result<RecordId> {
        self.put_within(record, self.deadline()).await
    }

    /// Record an access without reading the record. False if unknown.
    pub async fn touch(&self, id: RecordId) -> bool {
        self.store.touch(id).await
    }

    /// Remove a record. Returns false if it was not present.
    pub async fn delete(&self, id: RecordId) -> Result<bool> {
        self.store.delete(id, self.deadline()).await
    }

    pub async fn locate(&self, id: RecordId) -> Option<Tier> {
        self.store.locate(id).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tiers: self.store.stats(),
            consolidation: self.engine.stats(),
        }
    }

    /// Write every Hot record to Warm
    pub async fn flush(&self) -> Result<usize> {
        self.store.flush(self.deadline()).await
    }

    /// Run one consolidation pass now
    pub async fn consolidate_now(&self) -> ConsolidationReport {
        self.engine.run_once().await
    }

    /// Run one maintenance pass now
    pub async fn maintain_now(&self) -> MaintenanceReport {
        self.maintenance.run_once().await
    }

    /// Stop background tasks and flush Hot to Warm
    pub async fn shutdown(&self) -> Result<usize> {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let flushed = self.flush().await?;
        info!(flushed, "Memory cache shut down");
        Ok(flushed)
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn get_within(&self, id: RecordId, deadline: Deadline) -> Result<Option<MemoryRecord>> {
        Ok(self.store.lookup(id, deadline).await?.map(|(record, _)| record))
    }

    async fn put_within(&self, record: MemoryRecord, deadline: Deadline) -> Result<RecordId> {
        let id = record.id;
        self.store.insert(record, deadline).await?;
        Ok(id)
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Cache handle with its own foreground deadline
pub struct TimedCache<'a> {
    cache: &'a MemoryCache,
    timeout: Duration,
}

impl TimedCache<'_> {
    fn deadline(&self) -> Deadline {
        Deadline::after(self.timeout)
    }

    pub async fn get(&self, id: RecordId) -> Result<Option<MemoryRecord>> {
        self.cache.get_within(id, self.deadline()).await
    }

    pub async fn put(&self, record: MemoryRecord) -> Result<RecordId> {
        self.cache.put_within(record, self.deadline()).await
    }

    pub async fn delete(&self, id: RecordId) -> Result<bool> {
        self.cache.store.delete(id, self.deadline()).await
    }

    pub async fn flush(&self) -> Result<usize> {
        self.cache.store.flush(self.deadline()).await
    }
}
