//! Connection manager error types.
//!
//! Errors returned synchronously to endpoints and collaborators. When a
//! circuit is cleared because of an error, the error is translated into a
//! standard cause with [`CmError::cause`] and delivered via `on_cleared`.

use atm_common::{Cause, CauseValue};
use thiserror::Error;

/// Connection manager error type.
///
/// Maps to clearing cause values:
/// - `OutOfMemory`, `NoBuffers`: `RESOURCE_UNAVAILABLE` (47)
/// - `InvalidArgument`: `INVALID_IE_CONTENTS` (100)
/// - `AddressInUse`: `USER_BUSY` (17)
/// - `NetworkUnreachable`: `NO_ROUTE_TO_DESTINATION` (3)
/// - `Fault`, `Internal`: `PROTOCOL_ERROR_UNSPECIFIED` (111)
/// - `AlreadyInProgress`, `NotFound`: `NORMAL_UNSPECIFIED` (31)
/// - `ShuttingDown`: `TEMPORARY_FAILURE` (41)
/// - `CallRejected`: the carried cause
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CmError {
    /// Allocation failed; teardown paths retry on a timer.
    #[error("Out of memory")]
    OutOfMemory,

    /// No buffers available; teardown paths retry on a timer.
    #[error("No buffers available")]
    NoBuffers,

    /// A request carried a missing or malformed attribute.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Identical listener already registered, or LLC header already in use.
    #[error("Address in use")]
    AddressInUse,

    /// No signaling manager serves the requested interface.
    #[error("Network unreachable")]
    NetworkUnreachable,

    /// Operation not valid in the current connection or circuit state.
    #[error("State fault: {0}")]
    Fault(String),

    /// Circuit is already being cleared.
    #[error("Operation already in progress")]
    AlreadyInProgress,

    /// Unknown connection or circuit.
    #[error("Not found")]
    NotFound,

    /// Remote party or signaling manager rejected the call.
    #[error("Call rejected: cause {}", .0.value.code())]
    CallRejected(Cause),

    /// Manager is shutting down and takes no new work.
    #[error("Connection manager is shutting down")]
    ShuttingDown,

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CmError {
    /// Returns the clearing cause value for this error.
    pub fn cause_value(&self) -> CauseValue {
        match self {
            CmError::OutOfMemory | CmError::NoBuffers => CauseValue::ResourceUnavailable,
            CmError::InvalidArgument(_) => CauseValue::InvalidInformationElementContents,
            CmError::AddressInUse => CauseValue::UserBusy,
            CmError::NetworkUnreachable => CauseValue::NoRouteToDestination,
            CmError::Fault(_) | CmError::Internal(_) => CauseValue::ProtocolErrorUnspecified,
            CmError::AlreadyInProgress | CmError::NotFound => CauseValue::NormalUnspecified,
            CmError::ShuttingDown => CauseValue::TemporaryFailure,
            CmError::CallRejected(cause) => cause.value,
        }
    }

    /// Returns the full clearing cause, keeping diagnostics of a rejection.
    pub fn cause(&self) -> Cause {
        match self {
            CmError::CallRejected(cause) => cause.clone(),
            other => Cause::new(other.cause_value()),
        }
    }

    /// Transient resource shortage; teardown retries these on a timer.
    pub fn is_resource_shortage(&self) -> bool {
        matches!(self, CmError::OutOfMemory | CmError::NoBuffers)
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CmError::OutOfMemory => "out_of_memory",
            CmError::NoBuffers => "no_buffers",
            CmError::InvalidArgument(_) => "invalid_argument",
            CmError::AddressInUse => "address_in_use",
            CmError::NetworkUnreachable => "network_unreachable",
            CmError::Fault(_) => "fault",
            CmError::AlreadyInProgress => "already_in_progress",
            CmError::NotFound => "not_found",
            CmError::CallRejected(_) => "call_rejected",
            CmError::ShuttingDown => "shutting_down",
            CmError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_values() {
        assert_eq!(
            CmError::OutOfMemory.cause_value(),
            CauseValue::ResourceUnavailable
        );
        assert_eq!(
            CmError::NoBuffers.cause_value(),
            CauseValue::ResourceUnavailable
        );
        assert_eq!(
            CmError::InvalidArgument("aal".to_string()).cause_value(),
            CauseValue::InvalidInformationElementContents
        );
        assert_eq!(CmError::AddressInUse.cause_value(), CauseValue::UserBusy);
        assert_eq!(
            CmError::NetworkUnreachable.cause_value(),
            CauseValue::NoRouteToDestination
        );
        assert_eq!(
            CmError::Fault("state".to_string()).cause_value(),
            CauseValue::ProtocolErrorUnspecified
        );
        assert_eq!(
            CmError::NotFound.cause_value(),
            CauseValue::NormalUnspecified
        );
        assert_eq!(
            CmError::ShuttingDown.cause_value(),
            CauseValue::TemporaryFailure
        );
    }

    #[test]
    fn test_call_rejected_keeps_diagnostic() {
        let cause = Cause::new(CauseValue::UserBusy).with_diagnostic([0x01, 0x02]);
        let err = CmError::CallRejected(cause.clone());

        assert_eq!(err.cause_value(), CauseValue::UserBusy);
        assert_eq!(err.cause(), cause);
    }

    #[test]
    fn test_resource_shortage() {
        assert!(CmError::OutOfMemory.is_resource_shortage());
        assert!(CmError::NoBuffers.is_resource_shortage());
        assert!(!CmError::NotFound.is_resource_shortage());
        assert!(!CmError::Internal("x".to_string()).is_resource_shortage());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", CmError::InvalidArgument("qos required".to_string())),
            "Invalid argument: qos required"
        );
        assert_eq!(
            format!(
                "{}",
                CmError::CallRejected(Cause::new(CauseValue::CallRejected))
            ),
            "Call rejected: cause 21"
        );
        assert_eq!(format!("{}", CmError::NotFound), "Not found");
    }
}
