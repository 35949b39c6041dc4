//! Background reaper loop.
//!
//! Runs `Reaper::sweep_once` on a fixed interval plus random jitter so that
//! several replicas do not sweep in lockstep. Stops when `cancel` fires.

use crate::metrics::ReaperMetrics;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tollgate_hold::Reaper;
use tracing::{debug, error, info};

pub async fn run_reaper(
    reaper: Arc<Reaper>,
    metrics: Arc<ReaperMetrics>,
    interval: Duration,
    max_jitter: Duration,
    cancel: CancellationToken,
) {
    info!(
        interval_secs = interval.as_secs(),
        max_jitter_ms = max_jitter.as_millis() as u64,
        "Reaper started"
    );

    loop {
        let delay = interval + jitter(max_jitter);
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Reaper stopping");
                break;
            }
            _ = tokio::time::sleep(delay) => {
                let started = Instant::now();
                match reaper.sweep_once().await {
                    Ok(report) => {
                        metrics.observe(&report, started.elapsed());
                        debug!(
                            expired_held = report.expired_held,
                            timed_out_pending = report.timed_out_pending,
                            lag_seconds = report.lag_seconds(),
                            "Reaper tick"
                        );
                    }
                    Err(e) => {
                        metrics.observe_failure();
                        error!(error = %e, "Reaper sweep failed");
                    }
                }
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
