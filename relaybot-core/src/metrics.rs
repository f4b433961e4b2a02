// ABOUTME: Prometheus metrics for sync ingestion and the polling scheduler.
// ABOUTME: Thin helpers over the metrics crate so call sites stay one line.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call more than once; later calls
/// return the handle from the first installation.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    Ok(HANDLE.get_or_init(|| handle).clone())
}

pub fn record_sync_batch(user_id: &str, events: usize) {
    metrics::counter!("relaybot_sync_batches_total", "user_id" => user_id.to_string())
        .increment(1);
    metrics::counter!("relaybot_sync_events_total", "user_id" => user_id.to_string())
        .increment(events as u64);
}

pub fn record_sync_suppressed(reason: &'static str) {
    metrics::counter!("relaybot_sync_suppressed_total", "reason" => reason).increment(1);
}

pub fn record_sync_error(kind: &'static str) {
    metrics::counter!("relaybot_sync_errors_total", "kind" => kind).increment(1);
}

pub fn record_listener_error(event_type: &str) {
    metrics::counter!("relaybot_listener_errors_total", "event_type" => event_type.to_string())
        .increment(1);
}

pub fn record_listener_panic(event_type: &str) {
    metrics::counter!("relaybot_listener_panics_total", "event_type" => event_type.to_string())
        .increment(1);
}

pub fn record_poll(service_type: &str) {
    metrics::counter!("relaybot_polls_total", "service_type" => service_type.to_string())
        .increment(1);
}

pub fn record_poll_error(service_type: &str) {
    metrics::counter!("relaybot_poll_errors_total", "service_type" => service_type.to_string())
        .increment(1);
}

pub fn set_active_pollers(count: usize) {
    metrics::gauge!("relaybot_active_pollers").set(count as f64);
}
