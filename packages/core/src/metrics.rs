//! Prometheus metrics registry for the pharmacy locator.
//!
//! [`AppMetrics`] owns every registered metric and the [`Registry`] they
//! belong to. Build it once at startup, wrap it in `Arc`, and hand it to the
//! sweep task, the change consumer and the HTTP layer.
//!
//! Exposed at `GET /metrics` in Prometheus text format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

pub struct AppMetrics {
    /// Availability searches served (success + failure).
    pub searches_total: Counter,
    /// Searches that ended in an error.
    pub search_errors_total: Counter,
    /// Completed alert sweeps.
    pub sweeps_total: Counter,
    /// Records whose evaluation failed during a sweep.
    pub sweep_failures_total: Counter,
    pub alerts_raised_total: Counter,
    pub alerts_resolved_total: Counter,
    /// Inventory records held by the ledger at the last sweep.
    pub inventory_records: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency in seconds.
    pub http_request_duration: Histogram,
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Fails only on a duplicate or
    /// malformed metric name.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let searches_total = Counter::with_opts(Opts::new(
            "pharmacy_locator_searches_total",
            "Availability searches served",
        ))?;

        let search_errors_total = Counter::with_opts(Opts::new(
            "pharmacy_locator_search_errors_total",
            "Availability searches that failed",
        ))?;

        let sweeps_total = Counter::with_opts(Opts::new(
            "pharmacy_locator_alert_sweeps_total",
            "Completed alert sweeps",
        ))?;

        let sweep_failures_total = Counter::with_opts(Opts::new(
            "pharmacy_locator_sweep_record_failures_total",
            "Records whose alert evaluation failed during a sweep",
        ))?;

        let alerts_raised_total = Counter::with_opts(Opts::new(
            "pharmacy_locator_alerts_raised_total",
            "Alerts raised",
        ))?;

        let alerts_resolved_total = Counter::with_opts(Opts::new(
            "pharmacy_locator_alerts_resolved_total",
            "Alerts resolved",
        ))?;

        let inventory_records = Gauge::with_opts(Opts::new(
            "pharmacy_locator_inventory_records",
            "Inventory records held by the ledger",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "pharmacy_locator_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "pharmacy_locator_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(searches_total.clone()))?;
        registry.register(Box::new(search_errors_total.clone()))?;
        registry.register(Box::new(sweeps_total.clone()))?;
        registry.register(Box::new(sweep_failures_total.clone()))?;
        registry.register(Box::new(alerts_raised_total.clone()))?;
        registry.register(Box::new(alerts_resolved_total.clone()))?;
        registry.register(Box::new(inventory_records.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            searches_total,
            search_errors_total,
            sweeps_total,
            sweep_failures_total,
            alerts_raised_total,
            alerts_resolved_total,
            inventory_records,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_without_error() {
        let metrics = AppMetrics::new();
        assert!(metrics.is_ok(), "AppMetrics::new() failed: {:?}", metrics.err());
    }

    #[test]
    fn render_includes_incremented_counter() {
        let metrics = AppMetrics::new().unwrap();
        metrics.sweeps_total.inc_by(2.0);
        let output = metrics.render().unwrap();
        assert!(output.contains("pharmacy_locator_alert_sweeps_total 2"));
    }

    #[test]
    fn gauge_tracks_ledger_size() {
        let metrics = AppMetrics::new().unwrap();
        metrics.inventory_records.set(17.0);
        assert!((metrics.inventory_records.get() - 17.0).abs() < f64::EPSILON);
    }

    #[test]
    fn http_requests_counter_vec_labels_work() {
        let metrics = AppMetrics::new().unwrap();
        metrics
            .http_requests_total
            .with_label_values(&["GET", "/search", "200"])
            .inc();
        let val = metrics
            .http_requests_total
            .with_label_values(&["GET", "/search", "200"])
            .get();
        assert!((val - 1.0).abs() < f64::EPSILON);
    }
}
