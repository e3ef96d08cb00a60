use prometheus::{Counter, CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tonic::Code;

/// Metrics collector for gated calls
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Outcome metrics
    requests_total: CounterVec,
    panics_recovered: Counter,

    // Latency metrics
    request_duration: HistogramVec,
}

impl Metrics {
    /// Create a new metrics instance with its own registry
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register the collectors in an existing registry
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let registry = Arc::new(registry);

        let requests_total = CounterVec::new(
            Opts::new(
                "gatehouse_requests_total",
                "Total number of gated calls by method and status code",
            ),
            &["method", "code"],
        )?;

        let panics_recovered = Counter::new(
            "gatehouse_panics_recovered_total",
            "Number of panics converted into Internal responses",
        )?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gatehouse_request_duration_seconds",
                "Duration of gated calls in seconds, gates included",
            ),
            &["method"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(panics_recovered.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            panics_recovered,
            request_duration,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the final status of a call
    pub fn record_request(&self, method: &str, code: Code) {
        self.requests_total
            .with_label_values(&[method, code_label(code)])
            .inc();
    }

    /// Record a panic caught by the recovery gate
    pub fn record_panic_recovered(&self) {
        self.panics_recovered.inc();
    }

    /// Create a timer for measuring call duration
    pub fn start_request_timer(&self, method: &str) -> prometheus::HistogramTimer {
        self.request_duration.with_label_values(&[method]).start_timer()
    }
}

fn code_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Cancelled => "cancelled",
        Code::Unknown => "unknown",
        Code::InvalidArgument => "invalid_argument",
        Code::DeadlineExceeded => "deadline_exceeded",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::PermissionDenied => "permission_denied",
        Code::ResourceExhausted => "resource_exhausted",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        Code::OutOfRange => "out_of_range",
        Code::Unimplemented => "unimplemented",
        Code::Internal => "internal",
        Code::Unavailable => "unavailable",
        Code::DataLoss => "data_loss",
        Code::Unauthenticated => "unauthenticated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.record_request("/svc.Service/Get", Code::Ok);
        metrics.record_request("/svc.Service/Get", Code::ResourceExhausted);
        metrics.record_panic_recovered();

        let _timer = metrics.start_request_timer("/svc.Service/Get");
    }

    #[test]
    fn test_metrics_gathering() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/svc.Service/Get", Code::PermissionDenied);

        let families = metrics.registry().gather();
        let requests = families
            .iter()
            .find(|f| f.get_name() == "gatehouse_requests_total")
            .unwrap();
        let labels: Vec<&str> = requests.get_metric()[0]
            .get_label()
            .iter()
            .map(|l| l.get_value())
            .collect();
        assert!(labels.contains(&"permission_denied"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = Registry::new();
        let first = Metrics::with_registry(registry.clone()).unwrap();
        assert!(Metrics::with_registry(first.registry().clone()).is_err());
    }
}
