//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pipeline_exchanges_total` (counter): exchanges by outcome
//! - `pipeline_exchange_duration_seconds` (histogram): worker time per exchange
//!   (decode plus handler chain); streamed output may still be in flight
//! - `pipeline_exchanges_in_flight` (gauge): exchanges held by workers
//! - `pipeline_handler_claims_total` (counter): which handler claimed an exchange
//! - `pipeline_output_bytes_total` (counter): bytes drained by stream writers
//! - `pipeline_multipart_parts_total` (counter): decoded parts by kind
//! - `pipeline_decode_errors_total` (counter): body decode failures by kind
//! - `pipeline_double_completions_total` (counter): redundant `complete()` calls

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// One exchange released by its worker. `outcome` is `claimed`, `invalid` or `error`.
///
/// Recorded when the executor returns, not when the response body finishes.
pub fn record_exchange(outcome: &'static str, started: Instant) {
    counter!("pipeline_exchanges_total", "outcome" => outcome).increment(1);
    histogram!("pipeline_exchange_duration_seconds", "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_claim(handler: &'static str) {
    counter!("pipeline_handler_claims_total", "handler" => handler).increment(1);
}

pub fn record_bytes_written(bytes: u64) {
    counter!("pipeline_output_bytes_total").increment(bytes);
}

pub fn record_parts(files: usize, fields: usize) {
    counter!("pipeline_multipart_parts_total", "kind" => "file").increment(files as u64);
    counter!("pipeline_multipart_parts_total", "kind" => "field").increment(fields as u64);
}

pub fn record_decode_error(kind: &'static str) {
    counter!("pipeline_decode_errors_total", "kind" => kind).increment(1);
}

pub fn record_double_completion() {
    counter!("pipeline_double_completions_total").increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!("pipeline_exchanges_in_flight").set(count as f64);
}
