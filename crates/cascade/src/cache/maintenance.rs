//! Warm-to-cold sweep and shadow cleanup on a timer

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::memory::Tier;
use crate::storage::{SweepReport, TierOps};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub sweep: Option<SweepReport>,
    pub shadows_removed: usize,
}

/// Keeps Warm within its soft budget and removes stale promoted copies.
pub struct MaintenanceLoop<S: TierOps + ?Sized> {
    store: Arc<S>,
    warm_budget_bytes: u64,
    shadow_batch: usize,
}

impl<S: TierOps + ?Sized> MaintenanceLoop<S> {
    pub fn new(store: Arc<S>, warm_budget_bytes: u64, shadow_batch: usize) -> Self {
        Self {
            store,
            warm_budget_bytes,
            shadow_batch,
        }
    }

    pub async fn run_once(&self) -> MaintenanceReport {
        let sweep = match self
            .store
            .demote_sweep(Tier::Warm, Tier::Cold, self.warm_budget_bytes)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Warm sweep failed");
                None
            }
        };
        let shadows_removed = self.store.cleanup_shadows(self.shadow_batch).await;

        MaintenanceReport {
            sweep,
            shadows_removed,
        }
    }

    pub fn spawn(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
    where
        S: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
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
            debug!("Maintenance task stopped");
        })
    }
}
