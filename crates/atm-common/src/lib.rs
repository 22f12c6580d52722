//! Common types shared by the ATM connection manager and its collaborators.

#![warn(clippy::pedantic)]

/// Module for call attribute sets and their information elements
pub mod attributes;

/// Module for standard clearing causes
pub mod cause;

/// Module for identifier newtypes
pub mod types;

pub use attributes::{
    Aal, AalType, ApiFamily, AtmAddress, Attr, AttributeSet, Bearer, BearerClass,
    ConnectionConfiguration, Encapsulation, HighLayerId, Llc, LowLayerId, PartyAddress, Qos,
    QosClass, SscsType, TrafficDescriptor, LLC_MAX_LEN, LLC_MIN_LEN,
};
pub use cause::{Cause, CauseValue};
pub use types::{CircuitId, ConnectionId, EndpointToken, InterfaceId, SignalingHandle};
