//! Observability for the connection manager.
//!
//! Structured logging uses `tracing` with these targets:
//! - `atm.cm.call`: connect, listen, incoming call processing
//! - `atm.cm.share`: circuit sharing and added LLC connections
//! - `atm.cm.teardown`: release, abort, close, timer retries
//! - `atm.cm.data`: upcall demultiplexing and downcall submission
//! - `atm.cm.adapter`: the built-in null adapter
//! - `atm.cm.actor`: actor lifecycle and timers
//! - `atm.cm.mailbox`: mailbox depth warnings
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `atm_cm_circuits` | Gauge | none | Circuits in the table |
//! | `atm_cm_connections` | Gauge | none | Connections in the table |
//! | `atm_cm_listeners` | Gauge | none | Registered listeners |
//! | `atm_cm_call_queue_depth` | Gauge | none | Incoming calls awaiting matching |
//! | `atm_cm_mailbox_depth` | Gauge | none | Actor backpressure |
//! | `atm_cm_connects_total` | Counter | `result` | Outbound connect outcomes |
//! | `atm_cm_incoming_calls_total` | Counter | `outcome` | Incoming call outcomes |
//! | `atm_cm_incoming_refusals_total` | Counter | none | Endpoint refusals |
//! | `atm_cm_signaling_failures_total` | Counter | `operation`, `error_type` | Signaling errors |
//! | `atm_cm_teardown_retries_total` | Counter | `operation` | Release/reject retries |
//! | `atm_cm_aborts_total` | Counter | none | Aborted circuits |
//! | `atm_cm_pdus_dropped_total` | Counter | `reason` | Inbound PDU drops |
//! | `atm_cm_message_latency_seconds` | Histogram | `message_type` | Actor message handling time |

pub mod metrics;

pub use self::metrics::init_metrics_recorder;
