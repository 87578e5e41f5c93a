//! Command counters: prometheus collectors for export plus plain atomics for cheap snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry,
};
use tracing::error;

use crate::error::AdapterError;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub latency_total_us: u64,
    pub pages_opened: u64,
}

struct Tally {
    commands: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    latency_total_us: AtomicU64,
    pages_opened: AtomicU64,
}

static TALLY: Tally = Tally {
    commands: AtomicU64::new(0),
    failures: AtomicU64::new(0),
    timeouts: AtomicU64::new(0),
    latency_total_us: AtomicU64::new(0),
    pages_opened: AtomicU64::new(0),
};

lazy_static! {
    static ref COMMANDS: IntCounterVec = IntCounterVec::new(
        opts!("canvas_cdp_commands_total", "CDP commands sent, by method"),
        &["method"]
    )
    .expect("valid metric");
    static ref FAILURES: IntCounterVec = IntCounterVec::new(
        opts!("canvas_cdp_command_failures_total", "CDP commands that failed, by method and kind"),
        &["method", "kind"]
    )
    .expect("valid metric");
    static ref LATENCY: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "canvas_cdp_command_seconds",
            "Latency of successful CDP commands",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 15.0]
        ),
        &["method"]
    )
    .expect("valid metric");
    static ref PAGES_OPENED: IntCounter =
        IntCounter::new("canvas_cdp_pages_opened_total", "Page targets opened")
            .expect("valid metric");
}

/// Expose the adapter's collectors on `registry`. Registering twice is harmless.
pub fn register_metrics(registry: &Registry) {
    fn add<C: Collector + Clone + 'static>(registry: &Registry, collector: &C) {
        match registry.register(Box::new(collector.clone())) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(err) => error!(target: "cdp-adapter", %err, "failed to register metric"),
        }
    }
    add(registry, &*COMMANDS);
    add(registry, &*FAILURES);
    add(registry, &*LATENCY);
    add(registry, &*PAGES_OPENED);
}

/// Started when a command is sent; `finish` records its outcome.
pub struct CommandTimer<'a> {
    method: &'a str,
    started: Instant,
}

impl<'a> CommandTimer<'a> {
    pub fn start(method: &'a str) -> Self {
        TALLY.commands.fetch_add(1, Ordering::Relaxed);
        COMMANDS.with_label_values(&[method]).inc();
        Self {
            method,
            started: Instant::now(),
        }
    }

    pub fn finish<T>(self, outcome: &Result<T, AdapterError>) {
        match outcome {
            Ok(_) => self.succeeded(self.started.elapsed()),
            Err(err) => self.failed(err),
        }
    }

    fn succeeded(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        TALLY.latency_total_us.fetch_add(micros, Ordering::Relaxed);
        LATENCY
            .with_label_values(&[self.method])
            .observe(elapsed.as_secs_f64());
    }

    fn failed(&self, err: &AdapterError) {
        TALLY.failures.fetch_add(1, Ordering::Relaxed);
        if err.is_timeout() {
            TALLY.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        let kind = serde_json::to_value(err.kind)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        FAILURES.with_label_values(&[self.method, &kind]).inc();
    }
}

pub fn record_page_opened() {
    TALLY.pages_opened.fetch_add(1, Ordering::Relaxed);
    PAGES_OPENED.inc();
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    AdapterMetricsSnapshot {
        commands: TALLY.commands.load(Ordering::Relaxed),
        failures: TALLY.failures.load(Ordering::Relaxed),
        timeouts: TALLY.timeouts.load(Ordering::Relaxed),
        latency_total_us: TALLY.latency_total_us.load(Ordering::Relaxed),
        pages_opened: TALLY.pages_opened.load(Ordering::Relaxed),
    }
}
