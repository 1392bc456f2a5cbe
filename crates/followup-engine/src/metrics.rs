//! Prometheus metrics registry.
//!
//! Grounded in `original_source/.../infrastructure/metrics.py`'s
//! `MetricsRegistry`: HTTP request counters/latency/in-flight gauge,
//! followup lifecycle counters, external-request counters/latency, and a
//! circuit-breaker state gauge. Built on the `prometheus` crate rather than
//! the original's hand-rolled `Counter`/`Histogram`/`Gauge` classes, since
//! the teacher's stack already carries `prometheus` for this exact shape.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

use crate::resilience::circuit_breaker::CircuitState;

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub http_requests_in_progress: IntGaugeVec,
    pub followups_scheduled_total: IntCounterVec,
    pub followups_processed_total: IntCounterVec,
    pub followups_cancelled_total: IntCounterVec,
    pub followups_failed_total: IntCounterVec,
    pub external_requests_total: IntCounterVec,
    pub external_request_duration_seconds: HistogramVec,
    pub circuit_breaker_state: IntGaugeVec,
}

/// Circuit breaker state as a Prometheus gauge value, matching the
/// original's `0=closed, 1=half-open, 2=open` convention.
#[derive(Debug, Clone, Copy)]
pub enum CircuitGaugeState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl From<CircuitState> for CircuitGaugeState {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => CircuitGaugeState::Closed,
            CircuitState::HalfOpen => CircuitGaugeState::HalfOpen,
            CircuitState::Open => CircuitGaugeState::Open,
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("metric descriptor is valid");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency in seconds"),
            &["method", "path"],
        )
        .expect("metric descriptor is valid");

        let http_requests_in_progress = IntGaugeVec::new(
            Opts::new("http_requests_in_progress", "Number of HTTP requests currently being processed"),
            &["method", "path"],
        )
        .expect("metric descriptor is valid");

        let followups_scheduled_total = IntCounterVec::new(
            Opts::new("followups_scheduled_total", "Total number of followups scheduled"),
            &["outcome"],
        )
        .expect("metric descriptor is valid");

        let followups_processed_total = IntCounterVec::new(
            Opts::new("followups_processed_total", "Total number of followups processed"),
            &["status"],
        )
        .expect("metric descriptor is valid");

        let followups_cancelled_total = IntCounterVec::new(
            Opts::new("followups_cancelled_total", "Total number of followups cancelled"),
            &["reason"],
        )
        .expect("metric descriptor is valid");

        let followups_failed_total = IntCounterVec::new(
            Opts::new("followups_failed_total", "Total number of followups that failed"),
            &["reason"],
        )
        .expect("metric descriptor is valid");

        let external_requests_total = IntCounterVec::new(
            Opts::new("external_requests_total", "Total number of external service requests"),
            &["service", "status"],
        )
        .expect("metric descriptor is valid");

        let external_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("external_request_duration_seconds", "External service request latency in seconds"),
            &["service"],
        )
        .expect("metric descriptor is valid");

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new("circuit_breaker_state", "Current state of circuit breakers (0=closed, 1=half-open, 2=open)"),
            &["name"],
        )
        .expect("metric descriptor is valid");

        for collector in [
            Box::new(http_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(http_request_duration_seconds.clone()),
            Box::new(http_requests_in_progress.clone()),
            Box::new(followups_scheduled_total.clone()),
            Box::new(followups_processed_total.clone()),
            Box::new(followups_cancelled_total.clone()),
            Box::new(followups_failed_total.clone()),
            Box::new(external_requests_total.clone()),
            Box::new(external_request_duration_seconds.clone()),
            Box::new(circuit_breaker_state.clone()),
        ] {
            registry.register(collector).expect("collector name is unique");
        }

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_progress,
            followups_scheduled_total,
            followups_processed_total,
            followups_cancelled_total,
            followups_failed_total,
            external_requests_total,
            external_request_duration_seconds,
            circuit_breaker_state,
        }
    }

    pub fn set_circuit_state(&self, name: &str, state: CircuitGaugeState) {
        self.circuit_breaker_state.with_label_values(&[name]).set(state as i64);
    }

    pub fn record_external_request(&self, service: &str, status: &str, duration_seconds: f64) {
        self.external_requests_total.with_label_values(&[service, status]).inc();
        self.external_request_duration_seconds.with_label_values(&[service]).observe(duration_seconds);
    }

    /// Renders the registry in Prometheus text exposition format for the
    /// `/metrics` endpoint.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("prometheus text encoding never fails for well-formed metric families");
        String::from_utf8(buffer).expect("prometheus text encoder emits valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.followups_processed_total.with_label_values(&["done"]).inc();
        metrics.set_circuit_state("crm", CircuitGaugeState::Open);

        let text = metrics.render();
        assert!(text.contains("followups_processed_total"));
        assert!(text.contains("circuit_breaker_state"));
    }

    #[test]
    fn external_request_helper_updates_both_series() {
        let metrics = Metrics::new();
        metrics.record_external_request("composer", "success", 0.42);

        let text = metrics.render();
        assert!(text.contains("external_requests_total"));
        assert!(text.contains("external_request_duration_seconds"));
    }
}
