//! Metrics definitions for the ATM connection manager.
//!
//! All metrics follow Prometheus naming conventions:
//! - `atm_cm_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `reason`: 4 drop reasons (inactive_circuit, inactive_connection, no_connection, rcvq_overflow)
//! - `operation`: signaling operations (setup, accept, reject, release)
//! - `outcome`, `result`: 2-4 values each
//! - `message_type`: bounded by the actor message enum (~20 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder with an HTTP listener on `bind_address`.
///
/// Must be called from within a tokio runtime, before any metrics are
/// recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder(bind_address: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(bind_address)
        // Message handling is in-memory; most messages finish well under 1ms
        .set_buckets_for_metric(
            Matcher::Prefix("atm_cm_message".to_string()),
            &[
                0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.010, 0.050, 0.100,
            ],
        )
        .map_err(|e| format!("Failed to set message latency buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Table Gauges
// ============================================================================

/// Metric: `atm_cm_circuits`
pub fn set_circuits(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("atm_cm_circuits").set(count as f64);
}

/// Metric: `atm_cm_connections`
///
/// Includes listeners.
pub fn set_connections(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("atm_cm_connections").set(count as f64);
}

/// Metric: `atm_cm_listeners`
pub fn set_listeners(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("atm_cm_listeners").set(count as f64);
}

/// Metric: `atm_cm_call_queue_depth`
///
/// Incoming calls waiting for listener matching.
pub fn set_call_queue_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("atm_cm_call_queue_depth").set(depth as f64);
}

/// Metric: `atm_cm_mailbox_depth`
pub fn set_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("atm_cm_mailbox_depth").set(depth as f64);
}

// ============================================================================
// Call Counters
// ============================================================================

/// Record an outbound connect result.
///
/// Metric: `atm_cm_connects_total`
/// Labels: `result` (connected, in_progress, shared, error)
pub fn record_connect(result: &str) {
    counter!("atm_cm_connects_total", "result" => result.to_string()).increment(1);
}

/// Record the outcome of an incoming call.
///
/// Metric: `atm_cm_incoming_calls_total`
/// Labels: `outcome` (accepted, rejected)
pub fn record_incoming_call(outcome: &str) {
    counter!("atm_cm_incoming_calls_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an endpoint refusing an incoming call offered to its listener.
///
/// Metric: `atm_cm_incoming_refusals_total`
pub fn record_incoming_refusal() {
    counter!("atm_cm_incoming_refusals_total").increment(1);
}

/// Record a failed signaling operation.
///
/// Metric: `atm_cm_signaling_failures_total`
/// Labels: `operation`, `error_type`
pub fn record_signaling_failure(operation: &str, error_type: &str) {
    counter!("atm_cm_signaling_failures_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// ============================================================================
// Teardown Counters
// ============================================================================

/// Record a release or reject retried because of resource shortage.
///
/// Metric: `atm_cm_teardown_retries_total`
/// Labels: `operation` (release, reject)
///
/// A steadily increasing rate means a signaling manager is starved.
pub fn record_teardown_retry(operation: &str) {
    counter!("atm_cm_teardown_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Record an aborted circuit.
///
/// Metric: `atm_cm_aborts_total`
pub fn record_abort() {
    counter!("atm_cm_aborts_total").increment(1);
}

// ============================================================================
// Data Path Counters
// ============================================================================

/// Record an inbound PDU dropped by the manager.
///
/// Metric: `atm_cm_pdus_dropped_total`
/// Labels: `reason`
pub fn record_pdu_dropped(reason: &str) {
    counter!("atm_cm_pdus_dropped_total", "reason" => reason.to_string()).increment(1);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Record actor message handling latency.
///
/// Metric: `atm_cm_message_latency_seconds`
/// Labels: `message_type`
pub fn record_message_latency(message_type: &str, duration: Duration) {
    histogram!("atm_cm_message_latency_seconds", "message_type" => message_type.to_string())
        .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests execute the recording functions against the global no-op
    // recorder; values are checked in the snapshot test below.

    #[test]
    fn test_table_gauges() {
        set_circuits(0);
        set_circuits(12);
        set_connections(30);
        set_listeners(4);
        set_call_queue_depth(2);
        set_mailbox_depth(100);
    }

    #[test]
    fn test_call_counters() {
        record_connect("connected");
        record_connect("in_progress");
        record_connect("shared");
        record_connect("error");
        record_incoming_call("accepted");
        record_incoming_call("rejected");
        record_incoming_refusal();
        record_signaling_failure("setup", "call_rejected");
    }

    #[test]
    fn test_teardown_and_data_counters() {
        record_teardown_retry("release");
        record_teardown_retry("reject");
        record_abort();
        for reason in [
            "inactive_circuit",
            "inactive_connection",
            "no_connection",
            "rcvq_overflow",
        ] {
            record_pdu_dropped(reason);
        }
    }

    #[test]
    fn test_record_message_latency() {
        record_message_latency("connect", Duration::from_micros(40));
        record_message_latency("upcall", Duration::from_micros(3));
    }

    #[test]
    fn test_metrics_snapshot_contains_recorded_metrics() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        // Global state: another test may have installed a recorder first.
        let _ = recorder.install();

        set_circuits(3);
        set_connections(5);
        set_listeners(1);
        record_connect("connected");
        record_incoming_call("accepted");
        record_teardown_retry("release");
        record_pdu_dropped("rcvq_overflow");
        record_message_latency("connect", Duration::from_micros(10));

        let metrics = snapshotter.snapshot().into_vec();

        assert!(
            !metrics.is_empty(),
            "Snapshot should contain recorded metrics"
        );
        assert!(
            metrics.len() >= 8,
            "Should have at least 8 metrics, got {}",
            metrics.len()
        );
    }
}
