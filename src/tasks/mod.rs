// src/tasks/mod.rs

//! Background GC for session providers.
//! One long-lived task calls `gc()` every `gc_lifetime` seconds until shut down.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::provider::SessionProvider;

pub mod metrics;

use metrics::TaskMetrics;

/// Report metrics every this many passes
const REPORT_EVERY: usize = 24;

/// Handle to a running GC task
pub struct GcHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    metrics: Arc<TaskMetrics>,
}

impl GcHandle {
    pub fn metrics(&self) -> Arc<TaskMetrics> {
        self.metrics.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop scheduling passes and wait for the task to end.
    /// A pass already running is allowed to finish.
    pub async fn shutdown(self) {
        info!("Shutting down session GC");
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("Session GC task ended abnormally: {}", e);
        }
        self.metrics.report();
    }
}

/// Spawn the GC loop for `provider`.
pub fn spawn_gc(provider: Arc<dyn SessionProvider>, interval: Duration) -> GcHandle {
    let cancel = CancellationToken::new();
    let metrics = Arc::new(TaskMetrics::new());

    let handle = tokio::spawn(run_gc(provider, interval, cancel.clone(), metrics.clone()));

    GcHandle {
        cancel,
        handle,
        metrics,
    }
}

async fn run_gc(
    provider: Arc<dyn SessionProvider>,
    interval: Duration,
    cancel: CancellationToken,
    metrics: Arc<TaskMetrics>,
) {
    info!("Session GC started for {} (interval: {:?})", provider.name(), interval);

    let mut interval_timer = time::interval(interval);
    interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
    // the first tick completes immediately; the first purge waits a full interval
    interval_timer.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval_timer.tick() => {}
        }

        let start = Instant::now();
        // a failed pass is retried on the next tick
        match provider.gc().await {
            Ok(purged) => {
                metrics.record_pass(purged, start.elapsed());
                if purged > 0 {
                    info!("Session GC purged {} expired sessions", purged);
                } else {
                    debug!("Session GC pass: nothing to purge");
                }
            }
            Err(e) => {
                error!("Session GC failed for {}: {}", provider.name(), e);
                metrics.record_error(&e);
            }
        }

        if metrics.passes() > 0 && metrics.passes() % REPORT_EVERY == 0 {
            metrics.report();
        }
    }

    info!("Session GC stopped");
}
