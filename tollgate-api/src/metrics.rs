use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;
use tollgate_hold::SweepReport;

/// Reaper health as seen by Prometheus. A growing lag means a stalled reaper.
pub struct ReaperMetrics {
    registry: Registry,
    sweeps: IntCounter,
    expired: IntCounterVec,
    failures: IntCounter,
    lag_seconds: Gauge,
    sweep_duration: Histogram,
}

impl ReaperMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sweeps = IntCounter::new("tollgate_reaper_sweeps_total", "Completed reaper sweeps")?;
        let expired = IntCounterVec::new(
            Opts::new("tollgate_reaper_intents_expired_total", "Intents expired by the reaper"),
            &["reason"],
        )?;
        let failures = IntCounter::new(
            "tollgate_reaper_failures_total",
            "Intents or sweeps the reaper failed to process",
        )?;
        let lag_seconds = Gauge::new(
            "tollgate_reaper_lag_seconds",
            "Seconds the oldest overdue intent has been waiting",
        )?;
        let sweep_duration = Histogram::with_opts(HistogramOpts::new(
            "tollgate_reaper_sweep_duration_seconds",
            "Wall time of one reaper sweep",
        ))?;

        registry.register(Box::new(sweeps.clone()))?;
        registry.register(Box::new(expired.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(lag_seconds.clone()))?;
        registry.register(Box::new(sweep_duration.clone()))?;

        Ok(Self {
            registry,
            sweeps,
            expired,
            failures,
            lag_seconds,
            sweep_duration,
        })
    }

    pub fn observe(&self, report: &SweepReport, elapsed: Duration) {
        self.sweeps.inc();
        self.expired
            .with_label_values(&["hold_ttl"])
            .inc_by(report.expired_held as u64);
        self.expired
            .with_label_values(&["payment_timeout"])
            .inc_by(report.timed_out_pending as u64);
        self.expired
            .with_label_values(&["confirmation_timeout"])
            .inc_by(report.stuck_confirmations as u64);
        self.failures.inc_by(report.failures as u64);
        self.lag_seconds.set(report.lag_seconds());
        self.sweep_duration.observe(elapsed.as_secs_f64());
    }

    pub fn observe_failure(&self) {
        self.failures.inc();
    }

    pub fn render(&self) -> Result<String, anyhow::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
