//! Prometheus metrics (spec §6 ambient "/metrics" surface — the spec names
//! no metrics schema, so this mirrors the counters/histograms the teacher's
//! `lib.rs` already imports: request/error counts and per-stage latency).
//!
//! No teacher source exists for this file either; built directly on the
//! workspace's `metrics`/`metrics-exporter-prometheus` dependencies using
//! the standard global-recorder-plus-handle pattern.

use axum::extract::State;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;

/// Installs the global Prometheus recorder and returns a handle whose
/// `render()` backs the `/metrics` HTTP endpoint.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder installs exactly once per process")
}

/// `GET /metrics` handler (spec §6 ambient surface).
pub async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

pub fn record_request(method: &str, path: &str, status: u16) {
    metrics::counter!(
        "eloquence_http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// `kind` is one of the closed error kinds from `eloquence_core::Error::code()`.
pub fn record_error(kind: &str) {
    metrics::counter!("eloquence_errors_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_stt_latency(ms: f64) {
    metrics::histogram!("eloquence_asr_latency_ms").record(ms);
}

pub fn record_llm_latency(ms: f64) {
    metrics::histogram!("eloquence_llm_latency_ms").record(ms);
}

pub fn record_tts_latency(ms: f64) {
    metrics::histogram!("eloquence_tts_latency_ms").record(ms);
}

/// End-to-end turn latency: speech_end to first TTS chunk dispatched.
pub fn record_total_latency(ms: f64) {
    metrics::histogram!("eloquence_turn_latency_ms").record(ms);
}
