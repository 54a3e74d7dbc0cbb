use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::db::store::{Store, StoreError};
use crate::monitoring::prober::Prober;
use crate::monitoring::transition::TransitionManager;

/// Counts for one probe tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub due: usize,
    pub probed: usize,
    /// Store write failures and panicked probe tasks.
    pub failed: usize,
    /// Due targets whose previous probe was still running.
    pub skipped: usize,
}

/// Removes the target id from the in-flight set when dropped, including
/// during a panic unwind.
struct InFlightGuard {
    in_flight: Arc<DashSet<i32>>,
    target_id: i32,
}

impl InFlightGuard {
    fn acquire(in_flight: &Arc<DashSet<i32>>, target_id: i32) -> Option<Self> {
        in_flight.insert(target_id).then(|| Self {
            in_flight: in_flight.clone(),
            target_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.target_id);
    }
}

/// Selects due targets and probes them concurrently, one task per target.
pub struct ProbeScheduler {
    store: Arc<dyn Store>,
    prober: Prober,
    transitions: Arc<TransitionManager>,
    in_flight: Arc<DashSet<i32>>,
    limiter: Option<Arc<Semaphore>>,
}

impl ProbeScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        prober: Prober,
        transitions: Arc<TransitionManager>,
        max_concurrent_probes: Option<usize>,
    ) -> Self {
        Self {
            store,
            prober,
            transitions,
            in_flight: Arc::new(DashSet::new()),
            limiter: max_concurrent_probes
                .filter(|n| *n > 0)
                .map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Probes every due target and waits for all of them to settle.
    ///
    /// Only the due-target query can fail the cycle; per-target failures are
    /// logged and counted.
    pub async fn run_probe_cycle(&self) -> Result<CycleSummary, StoreError> {
        let due = self.store.due_targets(Utc::now()).await?;
        let mut summary = CycleSummary {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(summary);
        }
        debug!(count = due.len(), "Dispatching probes for due targets.");

        let mut tasks = JoinSet::new();
        for target in due {
            let Some(guard) = InFlightGuard::acquire(&self.in_flight, target.id) else {
                debug!(target_id = target.id, "Previous probe still running. Skipping.");
                summary.skipped += 1;
                continue;
            };
            let prober = self.prober.clone();
            let transitions = self.transitions.clone();
            let limiter = self.limiter.clone();

            tasks.spawn(async move {
                let _guard = guard;
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };

                let result = prober.probe(&target).await;
                debug!(
                    target_id = target.id,
                    status = %result.status,
                    latency_ms = result.latency_ms,
                    "Probe settled."
                );
                transitions
                    .apply(&target, &result, Utc::now())
                    .await
                    .map_err(|e| (target.id, e))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => summary.probed += 1,
                Ok(Err((target_id, e))) => {
                    summary.failed += 1;
                    error!(target_id, error = %e, "Failed to record probe result.");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "Probe task panicked.");
                }
            }
        }

        if summary.failed > 0 {
            warn!(?summary, "Probe cycle finished with failures.");
        } else {
            info!(
                due = summary.due,
                probed = summary.probed,
                skipped = summary.skipped,
                "Probe cycle finished."
            );
        }
        Ok(summary)
    }
}
