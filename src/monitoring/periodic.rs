use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

/// Runs a job on a fixed period until the shutdown signal flips to `true`.
///
/// The first run happens immediately. With overlap allowed each run is
/// spawned and the timer keeps ticking; otherwise a run must finish before
/// the next tick is taken and missed ticks are delayed, not bunched.
pub struct PeriodicTimer {
    name: &'static str,
    period: Duration,
    allow_overlap: bool,
}

impl PeriodicTimer {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            allow_overlap: false,
        }
    }

    pub fn allow_overlap(mut self, allow: bool) -> Self {
        self.allow_overlap = allow;
        self
    }

    pub async fn run<F, Fut>(self, mut shutdown: watch::Receiver<bool>, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        info!(
            task = self.name,
            period_secs = self.period.as_secs_f64(),
            allow_overlap = self.allow_overlap,
            "Periodic task started."
        );
        let mut interval = time::interval(self.period);
        if !self.allow_overlap {
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        let mut running = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    debug!(task = self.name, "Tick.");
                    if self.allow_overlap {
                        while let Some(finished) = running.try_join_next() {
                            if let Err(e) = finished {
                                error!(task = self.name, error = %e, "Periodic run panicked.");
                            }
                        }
                        running.spawn(job());
                    } else {
                        job().await;
                    }
                }
            }
        }

        let pending = running.len();
        if pending > 0 {
            info!(task = self.name, pending, "Waiting for in-progress runs to finish.");
        }
        while let Some(finished) = running.join_next().await {
            if let Err(e) = finished {
                error!(task = self.name, error = %e, "Periodic run panicked.");
            }
        }
        info!(task = self.name, "Periodic task stopped.");
    }
}
