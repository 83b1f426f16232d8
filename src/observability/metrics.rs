use metrics::{
    counter, describe_counter, describe_histogram, histogram, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the coordination engine.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    pub fn record_replay_hit(&self) {
        counter!("idempotency_replays_total").increment(1);
    }

    pub fn record_lock_conflict(&self) {
        counter!("idempotency_lock_conflicts_total").increment(1);
    }

    pub fn record_execution(&self, success: bool, duration_ms: f64) {
        counter!("idempotency_executions_total", "success" => success.to_string()).increment(1);
        histogram!("idempotency_operation_duration_ms").record(duration_ms);
    }

    pub fn record_rate_limit_decision(&self, allowed: bool) {
        counter!("rate_limit_decisions_total", "allowed" => allowed.to_string()).increment(1);
    }

    pub fn record_store_operation(&self, operation: &str, duration_ms: f64, success: bool) {
        counter!("store_operations_total", "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("store_operation_duration_ms", "operation" => operation.to_string()).record(duration_ms);
    }

    pub fn record_store_fallback(&self) {
        counter!("store_fallbacks_total").increment(1);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the metrics system and returns the Prometheus handle.
pub fn init_metrics() -> PrometheusHandle {
    let handle = METRICS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        describe_metrics();
        handle
    });

    METRICS.get_or_init(Metrics::new);

    handle.clone()
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("idempotency_replays_total", Unit::Count, "Calls answered from the cached response");
    describe_counter!("idempotency_lock_conflicts_total", Unit::Count, "Calls rejected because the lock was already held");
    describe_counter!("idempotency_executions_total", Unit::Count, "Operations executed under the idempotency lock");
    describe_histogram!("idempotency_operation_duration_ms", Unit::Milliseconds, "Wrapped operation latency in milliseconds");

    describe_counter!("rate_limit_decisions_total", Unit::Count, "Rate-limit admission decisions");

    describe_counter!("store_operations_total", Unit::Count, "Key-value store round trips");
    describe_histogram!("store_operation_duration_ms", Unit::Milliseconds, "Key-value store operation latency in milliseconds");
    describe_counter!("store_fallbacks_total", Unit::Count, "Startups that selected the unavailable-store fallback");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
