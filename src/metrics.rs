//! Prometheus metrics for graph building, stage execution and alerting

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn recording on or off process-wide
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether `record_*` calls are counted
#[inline]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

lazy_static! {
    // === Build ===

    /// Graph build attempts
    pub static ref GRAPH_BUILDS_TOTAL: CounterVec = register_counter_vec!(
        "mql_graph_builds_total",
        "Stage graph build attempts",
        &["status"]
    ).unwrap();

    /// Aggregators folded into a select's backend query
    pub static ref LIFTED_AGGREGATIONS_TOTAL: CounterVec = register_counter_vec!(
        "mql_lifted_aggregations_total",
        "Aggregators lifted into backend queries",
        &["aggregator"]
    ).unwrap();

    // === Execution ===

    /// Stage executions
    pub static ref STAGE_EXECUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "mql_stage_executions_total",
        "Stage executions",
        &["operation", "status"]
    ).unwrap();

    /// Stage execution duration
    pub static ref STAGE_DURATION: HistogramVec = register_histogram_vec!(
        "mql_stage_duration_seconds",
        "Stage execution latency in seconds",
        &["operation"],
        vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Backing store round-trips
    pub static ref STORE_QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "mql_store_queries_total",
        "Backing store queries issued by select stages",
        &["status"]
    ).unwrap();

    // === Alerting ===

    /// Alert triggers produced
    pub static ref ALERT_TRIGGERS_TOTAL: CounterVec = register_counter_vec!(
        "mql_alert_triggers_total",
        "Alert triggers produced by alert stages",
        &["kind"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

/// Record a graph build outcome
#[inline]
pub fn record_graph_build(success: bool) {
    if !is_enabled() {
        return;
    }
    GRAPH_BUILDS_TOTAL.with_label_values(&[status(success)]).inc();
}

/// Record an aggregator lifted into a select
#[inline]
pub fn record_lift(aggregator: &str) {
    if !is_enabled() {
        return;
    }
    LIFTED_AGGREGATIONS_TOTAL
        .with_label_values(&[aggregator])
        .inc();
}

/// Record a stage execution
#[inline]
pub fn record_stage(operation: &str, duration_secs: f64, success: bool) {
    if !is_enabled() {
        return;
    }
    STAGE_EXECUTIONS_TOTAL
        .with_label_values(&[operation, status(success)])
        .inc();

    STAGE_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Record a backing store call
#[inline]
pub fn record_store_query(success: bool) {
    if !is_enabled() {
        return;
    }
    STORE_QUERIES_TOTAL.with_label_values(&[status(success)]).inc();
}

/// Record alert triggers produced by one alert stage
#[inline]
pub fn record_alert_triggers(kind: &str, count: usize) {
    if count > 0 && is_enabled() {
        ALERT_TRIGGERS_TOTAL
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }
}
