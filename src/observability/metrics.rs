use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Prometheus metrics for the request guard.
///
/// Recording is a no-op until [`init_metrics`] installs the recorder.
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

    pub fn record_admission(&self) {
        counter!("guard_admissions_total").increment(1);
    }

    pub fn record_rejection(&self, reason: &str) {
        counter!("guard_rejections_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_completion(&self, status: &str) {
        counter!("guard_completions_total", "status" => status.to_string()).increment(1);
    }

    pub fn record_handler_fault(&self, kind: &str) {
        counter!("guard_handler_faults_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn record_bookkeeping_failure(&self, operation: &str) {
        counter!("guard_bookkeeping_failures_total", "op" => operation.to_string()).increment(1);
    }

    pub fn record_ledger_latency(&self, operation: &str, duration_ms: f64) {
        histogram!("guard_ledger_duration_ms", "op" => operation.to_string()).record(duration_ms);
    }

    /// `route` must be the registered path template, never the concrete path,
    /// so the series count stays bounded by the route table.
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "route" => route.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "route" => route.to_string()).record(duration_ms);
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

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    METRICS.get_or_init(Metrics::new);

    Ok(METRICS_HANDLE.get_or_init(|| handle).clone())
}

fn describe_metrics() {
    describe_counter!("guard_admissions_total", Unit::Count, "Requests admitted by the guard");
    describe_counter!("guard_rejections_total", Unit::Count, "Requests rejected by the guard");
    describe_counter!("guard_completions_total", Unit::Count, "Requests moved to a terminal status");
    describe_counter!("guard_handler_faults_total", Unit::Count, "Business handler faults");
    describe_counter!("guard_bookkeeping_failures_total", Unit::Count, "Ledger writes that failed after admission");
    describe_histogram!("guard_ledger_duration_ms", Unit::Milliseconds, "Ledger operation latency in milliseconds");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
