use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;

use crate::sync::archive::ArchiveSummary;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref EVENTS_PROCESSED_COUNTER: Counter = Counter::new(
        "review_sync_events_processed_total",
        "Total number of document write events processed"
    ).unwrap();
    static ref EVENTS_FAILED_COUNTER: Counter = Counter::new(
        "review_sync_events_failed_total",
        "Total number of document write events that failed to process"
    ).unwrap();
    static ref BATCHES_PROCESSED_COUNTER: Counter = Counter::new(
        "review_sync_batches_processed_total",
        "Total number of stream batches processed"
    ).unwrap();
    static ref REDIS_HEALTHY_GAUGE: Gauge = Gauge::new(
        "review_sync_redis_healthy",
        "Redis connection health status (1=healthy, 0=unhealthy)"
    ).unwrap();
    static ref STORE_HEALTHY_GAUGE: Gauge = Gauge::new(
        "review_sync_store_healthy",
        "Document store health status (1=healthy, 0=unhealthy)"
    ).unwrap();
    static ref UPTIME_GAUGE: Gauge = Gauge::new(
        "review_sync_uptime_seconds",
        "Application uptime in seconds"
    ).unwrap();

    // Trigger metrics. Trigger names come from the registry, so the label
    // set is fixed at startup.
    static ref TRIGGER_INVOCATIONS_COUNTER: CounterVec = CounterVec::new(
        Opts::new(
            "review_sync_trigger_invocations_total",
            "Total trigger invocations that completed successfully"
        ),
        &["trigger"]
    ).unwrap();
    static ref TRIGGER_FAILURES_COUNTER: CounterVec = CounterVec::new(
        Opts::new(
            "review_sync_trigger_failures_total",
            "Total trigger invocations that failed"
        ),
        &["trigger"]
    ).unwrap();
    static ref TRIGGER_DURATION_HISTOGRAM: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "review_sync_trigger_duration_seconds",
            "Time spent running a trigger in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["trigger"]
    ).unwrap();

    // Stream metrics
    static ref MESSAGES_CONSUMED_COUNTER: CounterVec = CounterVec::new(
        Opts::new(
            "review_sync_messages_consumed_total",
            "Total messages consumed from stream"
        ),
        &["stream"]
    ).unwrap();
    static ref MESSAGES_ACKED_COUNTER: CounterVec = CounterVec::new(
        Opts::new(
            "review_sync_messages_acked_total",
            "Total messages acknowledged"
        ),
        &["stream"]
    ).unwrap();
    static ref MESSAGES_CLAIMED_COUNTER: Counter = Counter::new(
        "review_sync_messages_claimed_total",
        "Total idle pending messages reclaimed for redelivery"
    ).unwrap();

    // Archive sweep metrics
    static ref ARCHIVE_RUNS_COUNTER: Counter = Counter::new(
        "review_sync_archive_runs_total",
        "Total archive sweeps that completed"
    ).unwrap();
    static ref ARCHIVE_FAILURES_COUNTER: Counter = Counter::new(
        "review_sync_archive_failures_total",
        "Total archive sweep attempts that failed"
    ).unwrap();
    static ref SHOWS_SCANNED_COUNTER: Counter = Counter::new(
        "review_sync_shows_scanned_total",
        "Total past shows scanned by the archive sweep"
    ).unwrap();
    static ref SHOWS_ARCHIVED_COUNTER: Counter = Counter::new(
        "review_sync_shows_archived_total",
        "Total shows flagged as archived"
    ).unwrap();
    static ref ARCHIVE_DURATION_HISTOGRAM: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "review_sync_archive_duration_seconds",
            "Time spent in one archive sweep in seconds"
        ).buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0])
    ).unwrap();
    static ref LAST_ARCHIVE_TIMESTAMP_GAUGE: Gauge = Gauge::new(
        "review_sync_last_archive_timestamp",
        "Unix timestamp of the last successful archive sweep"
    ).unwrap();
}

fn register<T: prometheus::core::Collector + Clone + 'static>(name: &str, collector: &T) {
    REGISTRY
        .register(Box::new(collector.clone()))
        .unwrap_or_else(|e| warn!("Failed to register {}: {}", name, e));
}

#[derive(Debug, Clone)]
pub struct Metrics {
    events_processed: Arc<AtomicU64>,
    events_failed: Arc<AtomicU64>,
    batches_processed: Arc<AtomicU64>,
    archive_runs: Arc<AtomicU64>,
    shows_archived: Arc<AtomicU64>,

    start_time: DateTime<Utc>,
    last_event_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_archive_time: Arc<RwLock<Option<DateTime<Utc>>>>,

    redis_healthy: Arc<RwLock<bool>>,
    store_healthy: Arc<RwLock<bool>>,
}

impl Metrics {
    pub fn new() -> Self {
        // Re-registration fails harmlessly when several instances exist
        register("EVENTS_PROCESSED_COUNTER", &*EVENTS_PROCESSED_COUNTER);
        register("EVENTS_FAILED_COUNTER", &*EVENTS_FAILED_COUNTER);
        register("BATCHES_PROCESSED_COUNTER", &*BATCHES_PROCESSED_COUNTER);
        register("REDIS_HEALTHY_GAUGE", &*REDIS_HEALTHY_GAUGE);
        register("STORE_HEALTHY_GAUGE", &*STORE_HEALTHY_GAUGE);
        register("UPTIME_GAUGE", &*UPTIME_GAUGE);
        register("TRIGGER_INVOCATIONS_COUNTER", &*TRIGGER_INVOCATIONS_COUNTER);
        register("TRIGGER_FAILURES_COUNTER", &*TRIGGER_FAILURES_COUNTER);
        register("TRIGGER_DURATION_HISTOGRAM", &*TRIGGER_DURATION_HISTOGRAM);
        register("MESSAGES_CONSUMED_COUNTER", &*MESSAGES_CONSUMED_COUNTER);
        register("MESSAGES_ACKED_COUNTER", &*MESSAGES_ACKED_COUNTER);
        register("MESSAGES_CLAIMED_COUNTER", &*MESSAGES_CLAIMED_COUNTER);
        register("ARCHIVE_RUNS_COUNTER", &*ARCHIVE_RUNS_COUNTER);
        register("ARCHIVE_FAILURES_COUNTER", &*ARCHIVE_FAILURES_COUNTER);
        register("SHOWS_SCANNED_COUNTER", &*SHOWS_SCANNED_COUNTER);
        register("SHOWS_ARCHIVED_COUNTER", &*SHOWS_ARCHIVED_COUNTER);
        register("ARCHIVE_DURATION_HISTOGRAM", &*ARCHIVE_DURATION_HISTOGRAM);
        register("LAST_ARCHIVE_TIMESTAMP_GAUGE", &*LAST_ARCHIVE_TIMESTAMP_GAUGE);

        Self {
            events_processed: Arc::new(AtomicU64::new(0)),
            events_failed: Arc::new(AtomicU64::new(0)),
            batches_processed: Arc::new(AtomicU64::new(0)),
            archive_runs: Arc::new(AtomicU64::new(0)),
            shows_archived: Arc::new(AtomicU64::new(0)),
            start_time: Utc::now(),
            last_event_time: Arc::new(RwLock::new(None)),
            last_archive_time: Arc::new(RwLock::new(None)),
            redis_healthy: Arc::new(RwLock::new(false)),
            store_healthy: Arc::new(RwLock::new(false)),
        }
    }

    pub fn record_event_success(&self, count: u64) {
        self.events_processed.fetch_add(count, Ordering::Relaxed);
        EVENTS_PROCESSED_COUNTER.inc_by(count as f64);
    }

    pub fn record_event_failure(&self, count: u64) {
        self.events_failed.fetch_add(count, Ordering::Relaxed);
        EVENTS_FAILED_COUNTER.inc_by(count as f64);
    }

    pub fn record_batch(&self) {
        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        BATCHES_PROCESSED_COUNTER.inc();
    }

    pub fn record_trigger_success(&self, trigger: &str) {
        TRIGGER_INVOCATIONS_COUNTER
            .with_label_values(&[trigger])
            .inc();
    }

    pub fn record_trigger_failure(&self, trigger: &str) {
        TRIGGER_FAILURES_COUNTER.with_label_values(&[trigger]).inc();
    }

    pub fn record_trigger_duration(&self, trigger: &str, duration: Duration) {
        TRIGGER_DURATION_HISTOGRAM
            .with_label_values(&[trigger])
            .observe(duration.as_secs_f64());
    }

    pub fn record_messages_consumed(&self, stream: &str, count: usize) {
        MESSAGES_CONSUMED_COUNTER
            .with_label_values(&[stream])
            .inc_by(count as f64);
    }

    pub fn record_message_acked(&self, stream: &str) {
        MESSAGES_ACKED_COUNTER.with_label_values(&[stream]).inc();
    }

    pub fn record_messages_claimed(&self, count: usize) {
        MESSAGES_CLAIMED_COUNTER.inc_by(count as f64);
    }

    pub async fn record_archive_success(&self, summary: &ArchiveSummary, duration: Duration) {
        self.archive_runs.fetch_add(1, Ordering::Relaxed);
        self.shows_archived
            .fetch_add(summary.archived, Ordering::Relaxed);
        ARCHIVE_RUNS_COUNTER.inc();
        SHOWS_SCANNED_COUNTER.inc_by(summary.scanned as f64);
        SHOWS_ARCHIVED_COUNTER.inc_by(summary.archived as f64);
        ARCHIVE_DURATION_HISTOGRAM.observe(duration.as_secs_f64());

        let now = Utc::now();
        LAST_ARCHIVE_TIMESTAMP_GAUGE.set(now.timestamp() as f64);
        *self.last_archive_time.write().await = Some(now);
    }

    pub fn record_archive_failure(&self) {
        ARCHIVE_FAILURES_COUNTER.inc();
    }

    pub async fn set_redis_health(&self, healthy: bool) {
        *self.redis_healthy.write().await = healthy;
        REDIS_HEALTHY_GAUGE.set(if healthy { 1.0 } else { 0.0 });
    }

    pub async fn set_store_health(&self, healthy: bool) {
        *self.store_healthy.write().await = healthy;
        STORE_HEALTHY_GAUGE.set(if healthy { 1.0 } else { 0.0 });
    }

    pub async fn update_last_event_time(&self) {
        *self.last_event_time.write().await = Some(Utc::now());
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let uptime = (Utc::now() - self.start_time).num_seconds().max(0) as u64;
        UPTIME_GAUGE.set(uptime as f64);

        let total_events_processed = self.events_processed.load(Ordering::Relaxed);
        let events_per_second = if uptime > 0 {
            total_events_processed as f64 / uptime as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            total_events_processed,
            total_events_failed: self.events_failed.load(Ordering::Relaxed),
            total_batches_processed: self.batches_processed.load(Ordering::Relaxed),
            total_archive_runs: self.archive_runs.load(Ordering::Relaxed),
            total_shows_archived: self.shows_archived.load(Ordering::Relaxed),
            events_per_second,
            redis_healthy: *self.redis_healthy.read().await,
            store_healthy: *self.store_healthy.read().await,
            uptime_seconds: uptime,
            start_time: self.start_time,
            last_event_time: *self.last_event_time.read().await,
            last_archive_time: *self.last_archive_time.read().await,
        }
    }

    pub fn get_prometheus_metrics() -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_events_processed: u64,
    pub total_events_failed: u64,
    pub total_batches_processed: u64,
    pub total_archive_runs: u64,
    pub total_shows_archived: u64,
    pub events_per_second: f64,
    pub redis_healthy: bool,
    pub store_healthy: bool,
    pub uptime_seconds: u64,
    pub start_time: DateTime<Utc>,
    pub last_event_time: Option<DateTime<Utc>>,
    pub last_archive_time: Option<DateTime<Utc>>,
}
