//! Prometheus metrics for the drip lifecycle
//!
//! Exposes metrics for:
//! - Attempts started and triggers rejected by the single-flight guard
//! - Terminal outcomes by label
//! - Per-stage latency

use crate::tx::Stage;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tracing::warn;

lazy_static! {
    pub static ref ATTEMPTS_STARTED: CounterVec = register_counter_vec!(
        "faucet_drip_attempts_started_total",
        "Total attempts accepted by the orchestrator",
        &[]
    ).unwrap();

    pub static ref TRIGGERS_REJECTED: CounterVec = register_counter_vec!(
        "faucet_drip_triggers_rejected_total",
        "Total triggers rejected while an attempt was in flight",
        &[]
    ).unwrap();

    pub static ref OUTCOMES: CounterVec = register_counter_vec!(
        "faucet_drip_outcomes_total",
        "Total finished attempts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref STAGE_LATENCY: HistogramVec = register_histogram_vec!(
        "faucet_drip_stage_latency_seconds",
        "Time spent in each lifecycle stage",
        &["stage"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

// Helper functions to record metrics

pub fn record_attempt_started() {
    ATTEMPTS_STARTED.with_label_values(&[]).inc();
}

pub fn record_trigger_rejected() {
    TRIGGERS_REJECTED.with_label_values(&[]).inc();
}

pub fn record_outcome(outcome: &str) {
    OUTCOMES.with_label_values(&[outcome]).inc();
}

pub fn record_stage_latency(stage: Stage, latency_secs: f64) {
    STAGE_LATENCY
        .with_label_values(&[stage.as_str()])
        .observe(latency_secs);
}
