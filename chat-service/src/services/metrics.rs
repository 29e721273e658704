//! Prometheus metrics for chat-service.
//!
//! Recording helpers are no-ops until [`init_metrics`] has run, so library
//! code and tests can call them unconditionally.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// HTTP metrics
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

// Relay metrics
pub static RELAY_SESSIONS_IN_FLIGHT: OnceLock<IntGauge> = OnceLock::new();
pub static RELAY_SESSIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static RELAY_FRAGMENTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static RELAY_CHECKPOINT_WRITES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PROVIDER_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

// Database metrics
pub static DB_OPERATION_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static DB_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Safe to call more than once; only the first call registers.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let http_requests = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;

    let http_duration = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds (time to response head)",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"],
    )?;

    let in_flight = IntGauge::new(
        "relay_sessions_in_flight",
        "Streaming relays currently running",
    )?;

    let sessions = IntCounterVec::new(
        Opts::new("relay_sessions_total", "Finished streaming relays by outcome"),
        &["outcome"],
    )?;

    let fragments = IntCounter::new(
        "relay_fragments_total",
        "Fragments forwarded from the provider to clients",
    )?;

    let checkpoint_writes = IntCounterVec::new(
        Opts::new(
            "relay_checkpoint_writes_total",
            "Checkpoint and final-flush writes by result",
        ),
        &["kind", "result"],
    )?;

    let provider_errors = IntCounterVec::new(
        Opts::new("provider_errors_total", "Total text provider errors"),
        &["kind"],
    )?;

    let db_duration = HistogramVec::new(
        HistogramOpts::new(
            "db_operation_duration_seconds",
            "Database operation duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["operation"],
    )?;

    let db_errors = IntCounterVec::new(
        Opts::new("db_errors_total", "Total database errors"),
        &["operation"],
    )?;

    registry.register(Box::new(http_requests.clone()))?;
    registry.register(Box::new(http_duration.clone()))?;
    registry.register(Box::new(in_flight.clone()))?;
    registry.register(Box::new(sessions.clone()))?;
    registry.register(Box::new(fragments.clone()))?;
    registry.register(Box::new(checkpoint_writes.clone()))?;
    registry.register(Box::new(provider_errors.clone()))?;
    registry.register(Box::new(db_duration.clone()))?;
    registry.register(Box::new(db_errors.clone()))?;

    let _ = HTTP_REQUESTS_TOTAL.set(http_requests);
    let _ = HTTP_REQUEST_DURATION_SECONDS.set(http_duration);
    let _ = RELAY_SESSIONS_IN_FLIGHT.set(in_flight);
    let _ = RELAY_SESSIONS_TOTAL.set(sessions);
    let _ = RELAY_FRAGMENTS_TOTAL.set(fragments);
    let _ = RELAY_CHECKPOINT_WRITES_TOTAL.set(checkpoint_writes);
    let _ = PROVIDER_ERRORS_TOTAL.set(provider_errors);
    let _ = DB_OPERATION_DURATION_SECONDS.set(db_duration);
    let _ = DB_ERRORS_TOTAL.set(db_errors);
    let _ = REGISTRY.set(registry);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

pub fn record_http_request(method: &str, path: &str, status: &str, duration_secs: f64) {
    if let Some(counter) = HTTP_REQUESTS_TOTAL.get() {
        counter.with_label_values(&[method, path, status]).inc();
    }
    if let Some(histogram) = HTTP_REQUEST_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

pub fn inc_relays_in_flight() {
    if let Some(gauge) = RELAY_SESSIONS_IN_FLIGHT.get() {
        gauge.inc();
    }
}

pub fn dec_relays_in_flight() {
    if let Some(gauge) = RELAY_SESSIONS_IN_FLIGHT.get() {
        gauge.dec();
    }
}

pub fn record_relay_outcome(outcome: &str) {
    if let Some(counter) = RELAY_SESSIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_fragment() {
    if let Some(counter) = RELAY_FRAGMENTS_TOTAL.get() {
        counter.inc();
    }
}

/// `kind` is `checkpoint` or `final`.
pub fn record_checkpoint_write(kind: &str, ok: bool) {
    if let Some(counter) = RELAY_CHECKPOINT_WRITES_TOTAL.get() {
        let result = if ok { "ok" } else { "error" };
        counter.with_label_values(&[kind, result]).inc();
    }
}

pub fn record_provider_error(kind: &str) {
    if let Some(counter) = PROVIDER_ERRORS_TOTAL.get() {
        counter.with_label_values(&[kind]).inc();
    }
}

pub fn record_db_operation(operation: &str, duration_secs: f64) {
    if let Some(histogram) = DB_OPERATION_DURATION_SECONDS.get() {
        histogram
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}

pub fn record_db_error(operation: &str) {
    if let Some(counter) = DB_ERRORS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}
