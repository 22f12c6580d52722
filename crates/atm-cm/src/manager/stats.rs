//! Connection manager statistics.
//!
//! Counters are kept in-process for status queries and mirrored to the
//! `metrics` facade as they change.

use crate::observability::metrics as obs;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Manager statistics counters.
#[derive(Debug, Default)]
pub struct CmStats {
    dropped_inactive_circuit: AtomicU64,
    dropped_inactive_connection: AtomicU64,
    dropped_no_connection: AtomicU64,
    rcvq_overflow: AtomicU64,
    release_retries: AtomicU64,
    reject_retries: AtomicU64,
    calls_accepted: AtomicU64,
    calls_rejected: AtomicU64,
    incoming_refused: AtomicU64,
    signaling_failures: AtomicU64,
    aborts: AtomicU64,
}

/// Point-in-time copy of [`CmStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CmStatsSnapshot {
    pub dropped_inactive_circuit: u64,
    pub dropped_inactive_connection: u64,
    pub dropped_no_connection: u64,
    pub rcvq_overflow: u64,
    pub release_retries: u64,
    pub reject_retries: u64,
    pub calls_accepted: u64,
    pub calls_rejected: u64,
    pub incoming_refused: u64,
    pub signaling_failures: u64,
    pub aborts: u64,
}

impl CmStats {
    /// Inbound PDU for a circuit that is neither active nor accepting.
    pub fn record_dropped_inactive_circuit(&self) {
        self.dropped_inactive_circuit.fetch_add(1, Ordering::Relaxed);
        obs::record_pdu_dropped("inactive_circuit");
    }

    /// Inbound PDU for a connection that is not active.
    pub fn record_dropped_inactive_connection(&self) {
        self.dropped_inactive_connection
            .fetch_add(1, Ordering::Relaxed);
        obs::record_pdu_dropped("inactive_connection");
    }

    /// Inbound bulk frame whose LLC header matches no connection.
    pub fn record_dropped_no_connection(&self) {
        self.dropped_no_connection.fetch_add(1, Ordering::Relaxed);
        obs::record_pdu_dropped("no_connection");
    }

    pub fn record_rcvq_overflow(&self) {
        self.rcvq_overflow.fetch_add(1, Ordering::Relaxed);
        obs::record_pdu_dropped("rcvq_overflow");
    }

    pub fn record_release_retry(&self) {
        self.release_retries.fetch_add(1, Ordering::Relaxed);
        obs::record_teardown_retry("release");
    }

    pub fn record_reject_retry(&self) {
        self.reject_retries.fetch_add(1, Ordering::Relaxed);
        obs::record_teardown_retry("reject");
    }

    pub fn record_call_accepted(&self) {
        self.calls_accepted.fetch_add(1, Ordering::Relaxed);
        obs::record_incoming_call("accepted");
    }

    pub fn record_call_rejected(&self) {
        self.calls_rejected.fetch_add(1, Ordering::Relaxed);
        obs::record_incoming_call("rejected");
    }

    pub fn record_incoming_refused(&self) {
        self.incoming_refused.fetch_add(1, Ordering::Relaxed);
        obs::record_incoming_refusal();
    }

    pub fn record_signaling_failure(&self, operation: &str, error_type: &str) {
        self.signaling_failures.fetch_add(1, Ordering::Relaxed);
        obs::record_signaling_failure(operation, error_type);
    }

    pub fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
        obs::record_abort();
    }

    #[must_use]
    pub fn snapshot(&self) -> CmStatsSnapshot {
        CmStatsSnapshot {
            dropped_inactive_circuit: self.dropped_inactive_circuit.load(Ordering::Relaxed),
            dropped_inactive_connection: self.dropped_inactive_connection.load(Ordering::Relaxed),
            dropped_no_connection: self.dropped_no_connection.load(Ordering::Relaxed),
            rcvq_overflow: self.rcvq_overflow.load(Ordering::Relaxed),
            release_retries: self.release_retries.load(Ordering::Relaxed),
            reject_retries: self.reject_retries.load(Ordering::Relaxed),
            calls_accepted: self.calls_accepted.load(Ordering::Relaxed),
            calls_rejected: self.calls_rejected.load(Ordering::Relaxed),
            incoming_refused: self.incoming_refused.load(Ordering::Relaxed),
            signaling_failures: self.signaling_failures.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
        }
    }
}
