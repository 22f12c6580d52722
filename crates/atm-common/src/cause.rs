//! Standard clearing causes carried in cause information elements.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cause values used by the connection manager (Q.2931 numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CauseValue {
    UnallocatedNumber = 1,
    NoRouteToDestination = 3,
    NormalCallClearing = 16,
    UserBusy = 17,
    NoUserResponding = 18,
    CallRejected = 21,
    DestinationOutOfOrder = 27,
    NormalUnspecified = 31,
    NetworkOutOfOrder = 38,
    TemporaryFailure = 41,
    ResourceUnavailable = 47,
    QosUnavailable = 49,
    BearerCapabilityNotImplemented = 65,
    IncompatibleDestination = 88,
    InvalidInformationElementContents = 100,
    ProtocolErrorUnspecified = 111,
}

/// Returned when a raw byte does not name a known cause value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unknown cause value: {0}")]
pub struct UnknownCauseValue(pub u8);

impl CauseValue {
    /// Numeric cause value as carried on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CauseValue {
    type Error = UnknownCauseValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let cause = match value {
            1 => Self::UnallocatedNumber,
            3 => Self::NoRouteToDestination,
            16 => Self::NormalCallClearing,
            17 => Self::UserBusy,
            18 => Self::NoUserResponding,
            21 => Self::CallRejected,
            27 => Self::DestinationOutOfOrder,
            31 => Self::NormalUnspecified,
            38 => Self::NetworkOutOfOrder,
            41 => Self::TemporaryFailure,
            47 => Self::ResourceUnavailable,
            49 => Self::QosUnavailable,
            65 => Self::BearerCapabilityNotImplemented,
            88 => Self::IncompatibleDestination,
            100 => Self::InvalidInformationElementContents,
            111 => Self::ProtocolErrorUnspecified,
            other => return Err(UnknownCauseValue(other)),
        };
        Ok(cause)
    }
}

/// A clearing cause with optional diagnostic bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cause {
    pub value: CauseValue,
    pub diagnostic: Vec<u8>,
}

impl Cause {
    /// Cause without diagnostics.
    #[must_use]
    pub const fn new(value: CauseValue) -> Self {
        Self {
            value,
            diagnostic: Vec::new(),
        }
    }

    /// Normal call clearing, used when no explicit cause was recorded.
    #[must_use]
    pub const fn normal() -> Self {
        Self::new(CauseValue::NormalCallClearing)
    }

    /// Attach diagnostic bytes.
    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: impl Into<Vec<u8>>) -> Self {
        self.diagnostic = diagnostic.into();
        self
    }
}

impl Default for Cause {
    fn default() -> Self {
        Self::normal()
    }
}

impl From<CauseValue> for Cause {
    fn from(value: CauseValue) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_value_codes() {
        assert_eq!(CauseValue::NormalCallClearing.code(), 16);
        assert_eq!(CauseValue::IncompatibleDestination.code(), 88);
        assert_eq!(CauseValue::BearerCapabilityNotImplemented.code(), 65);
        assert_eq!(CauseValue::TemporaryFailure.code(), 41);
    }

    #[test]
    fn test_try_from_known_and_unknown() {
        assert_eq!(
            CauseValue::try_from(47).unwrap(),
            CauseValue::ResourceUnavailable
        );
        assert_eq!(CauseValue::try_from(2), Err(UnknownCauseValue(2)));
    }

    #[test]
    fn test_default_is_normal_clearing() {
        let cause = Cause::default();
        assert_eq!(cause.value, CauseValue::NormalCallClearing);
        assert!(cause.diagnostic.is_empty());
    }

    #[test]
    fn test_with_diagnostic() {
        let cause = Cause::new(CauseValue::CallRejected).with_diagnostic([0x81]);
        assert_eq!(cause.diagnostic, vec![0x81]);
    }
}
