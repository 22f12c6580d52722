//! Identifier types for the ATM connection manager.
//!
//! Circuit and connection ids carry a slab key plus a serial number. Slab
//! slots are reused after a free, so a stale id held by a collaborator must
//! never resolve to the newer occupant of the same slot; the manager compares
//! the serial on every lookup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a network interface served by one signaling manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nif{}", self.0)
    }
}

/// Opaque token an endpoint uses to recognise its own connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointToken(pub u64);

impl fmt::Display for EndpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tok{}", self.0)
    }
}

/// Opaque call handle owned by a signaling manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalingHandle(pub u64);

impl fmt::Display for SignalingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig{}", self.0)
    }
}

/// Identifies a connection owned by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    key: usize,
    serial: u64,
}

impl ConnectionId {
    /// Build an id from a slab key and allocation serial.
    #[must_use]
    pub const fn new(key: usize, serial: u64) -> Self {
        Self { key, serial }
    }

    /// Slab key of the connection.
    #[must_use]
    pub const fn key(&self) -> usize {
        self.key
    }

    /// Allocation serial of the connection.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}.{}", self.key, self.serial)
    }
}

/// Identifies a virtual circuit owned by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CircuitId {
    key: usize,
    serial: u64,
}

impl CircuitId {
    /// Build an id from a slab key and allocation serial.
    #[must_use]
    pub const fn new(key: usize, serial: u64) -> Self {
        Self { key, serial }
    }

    /// Slab key of the circuit.
    #[must_use]
    pub const fn key(&self) -> usize {
        self.key
    }

    /// Allocation serial of the circuit.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vcc-{}.{}", self.key, self.serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_with_same_key_differ_by_serial() {
        let first = ConnectionId::new(3, 1);
        let reused = ConnectionId::new(3, 7);

        assert_eq!(first.key(), reused.key());
        assert_ne!(first, reused);
    }

    #[test]
    fn test_display_formats() {
        assert_eq!(ConnectionId::new(2, 9).to_string(), "conn-2.9");
        assert_eq!(CircuitId::new(0, 1).to_string(), "vcc-0.1");
        assert_eq!(InterfaceId(4).to_string(), "nif4");
        assert_eq!(EndpointToken(11).to_string(), "tok11");
        assert_eq!(SignalingHandle(5).to_string(), "sig5");
    }
}
