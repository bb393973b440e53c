//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Scheduler ticks and per-item outcomes
//! - Approvals, executions and proposals submitted
//! - Backend retries and failures

use anyhow::{Context, Result};
use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

lazy_static! {
    // Scheduler metrics
    pub static ref ITEMS_LISTED: CounterVec = register_counter_vec!(
        "multisig_items_listed_total",
        "Pending items returned by listing passes",
        &["pipeline"]
    ).expect("register multisig_items_listed_total");

    pub static ref ITEMS_DISPATCHED: CounterVec = register_counter_vec!(
        "multisig_items_dispatched_total",
        "Items handed to a processing task",
        &["pipeline"]
    ).expect("register multisig_items_dispatched_total");

    pub static ref ITEM_OUTCOMES: CounterVec = register_counter_vec!(
        "multisig_item_outcomes_total",
        "Per-item processing outcomes",
        &["pipeline", "outcome"]
    ).expect("register multisig_item_outcomes_total");

    pub static ref IN_FLIGHT: GaugeVec = register_gauge_vec!(
        "multisig_items_in_flight",
        "Items currently being processed",
        &["pipeline"]
    ).expect("register multisig_items_in_flight");

    pub static ref TICK_LATENCY: HistogramVec = register_histogram_vec!(
        "multisig_tick_latency_seconds",
        "Time spent listing and dispatching per tick",
        &["pipeline"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("register multisig_tick_latency_seconds");

    // Backend actions
    pub static ref APPROVALS_SUBMITTED: CounterVec = register_counter_vec!(
        "multisig_approvals_submitted_total",
        "Approvals submitted by this approver",
        &["backend"]
    ).expect("register multisig_approvals_submitted_total");

    pub static ref EXECUTIONS_SUBMITTED: CounterVec = register_counter_vec!(
        "multisig_executions_submitted_total",
        "Executions submitted on-chain",
        &["backend"]
    ).expect("register multisig_executions_submitted_total");

    pub static ref PROPOSALS: CounterVec = register_counter_vec!(
        "multisig_proposals_total",
        "Proposals created",
        &["backend"]
    ).expect("register multisig_proposals_total");

    // Errors
    pub static ref FAILURES: CounterVec = register_counter_vec!(
        "multisig_failures_total",
        "Failures by pipeline and error kind",
        &["pipeline", "kind"]
    ).expect("register multisig_failures_total");

    pub static ref BACKEND_RETRIES: CounterVec = register_counter_vec!(
        "multisig_backend_retries_total",
        "Retried backend calls by operation",
        &["operation"]
    ).expect("register multisig_backend_retries_total");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> Result<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind metrics server on {}", addr))?;
        axum::serve(listener, app)
            .await
            .context("Metrics server failed")?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Text exposition of every registered metric
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// Helper functions to record metrics

pub fn record_items_listed(pipeline: &str, count: usize) {
    ITEMS_LISTED
        .with_label_values(&[pipeline])
        .inc_by(count as f64);
}

pub fn record_items_dispatched(pipeline: &str, count: usize) {
    ITEMS_DISPATCHED
        .with_label_values(&[pipeline])
        .inc_by(count as f64);
}

pub fn record_outcome(pipeline: &str, outcome: &str) {
    ITEM_OUTCOMES.with_label_values(&[pipeline, outcome]).inc();
}

pub fn set_in_flight(pipeline: &str, count: usize) {
    IN_FLIGHT.with_label_values(&[pipeline]).set(count as f64);
}

pub fn observe_tick(pipeline: &str, elapsed: Duration) {
    TICK_LATENCY
        .with_label_values(&[pipeline])
        .observe(elapsed.as_secs_f64());
}

pub fn record_approval(backend: &str) {
    APPROVALS_SUBMITTED.with_label_values(&[backend]).inc();
}

pub fn record_execution(backend: &str) {
    EXECUTIONS_SUBMITTED.with_label_values(&[backend]).inc();
}

pub fn record_proposal(backend: &str) {
    PROPOSALS.with_label_values(&[backend]).inc();
}

pub fn record_failure(pipeline: &str, kind: &str) {
    FAILURES.with_label_values(&[pipeline, kind]).inc();
}

pub fn record_retry(operation: &str) {
    BACKEND_RETRIES.with_label_values(&[operation]).inc();
}
