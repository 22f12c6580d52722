//! Protocol adapter boundary.
//!
//! A protocol adapter moves data and control primitives between an active
//! circuit and the network. The manager binds the adapter stack to a circuit
//! with [`ProtocolAdapter::init`] exactly once and unbinds it with
//! [`ProtocolAdapter::terminate`] exactly once. Inbound traffic reaches the
//! manager as an [`Upcall`]; endpoint submissions leave as a [`Downcall`].

use crate::errors::CmError;
use atm_common::{ApiFamily, AttributeSet, CircuitId};
use bytes::Bytes;
use tracing::debug;

/// Session-oriented control primitives plus data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPrimitive {
    Establish,
    Release,
    Data(Bytes),
    Resync,
    Recover,
    Unitdata(Bytes),
}

/// Segmented-data primitives with sequence and retrieve semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentedPrimitive {
    Establish,
    Release,
    Data { sequence: u32, payload: Bytes },
    Unitdata(Bytes),
    Retrieve { from_sequence: u32 },
    RetrieveData { sequence: u32, payload: Bytes },
    RetrieveComplete,
}

/// Inbound event from the adapter stack of a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upcall {
    /// Raw frame; LLC header still attached on multiplexed circuits.
    Bulk(Bytes),
    Session(SessionPrimitive),
    Segmented(SegmentedPrimitive),
}

impl Upcall {
    #[must_use]
    pub const fn family(&self) -> ApiFamily {
        match self {
            Upcall::Bulk(_) => ApiFamily::Bulk,
            Upcall::Session(_) => ApiFamily::Session,
            Upcall::Segmented(_) => ApiFamily::Segmented,
        }
    }
}

/// Outbound submission to the adapter stack of a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downcall {
    /// Raw frame; the manager prepends the LLC header when multiplexed.
    Bulk(Bytes),
    Session(SessionPrimitive),
    Segmented(SegmentedPrimitive),
}

impl Downcall {
    #[must_use]
    pub const fn family(&self) -> ApiFamily {
        match self {
            Downcall::Bulk(_) => ApiFamily::Bulk,
            Downcall::Session(_) => ApiFamily::Session,
            Downcall::Segmented(_) => ApiFamily::Segmented,
        }
    }
}

/// Outcome of a downcall submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed off; nothing outstanding.
    Complete,
    /// Still in flight; the adapter reports `downcall_complete` later.
    InFlight,
}

/// Adapter stack shared by all circuits of a manager.
pub trait ProtocolAdapter: Send {
    /// Bind the stack for `api` to a circuit entering INIT or ACCEPT.
    fn init(
        &mut self,
        circuit: CircuitId,
        api: ApiFamily,
        attrs: &AttributeSet,
    ) -> Result<(), CmError>;

    /// Unbind the stack from a circuit; called once no upcall or downcall
    /// is outstanding.
    fn terminate(&mut self, circuit: CircuitId);

    /// Hand a downcall to the stack.
    fn submit(&mut self, circuit: CircuitId, downcall: Downcall) -> Result<Delivery, CmError>;
}

/// Adapter that accepts every binding and discards all submissions.
#[derive(Debug, Default)]
pub struct NullAdapter {
    submitted: u64,
}

impl NullAdapter {
    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl ProtocolAdapter for NullAdapter {
    fn init(
        &mut self,
        circuit: CircuitId,
        api: ApiFamily,
        _attrs: &AttributeSet,
    ) -> Result<(), CmError> {
        debug!(
            target: "atm.cm.adapter",
            circuit = %circuit,
            api = api.as_str(),
            "Null adapter bound"
        );
        Ok(())
    }

    fn terminate(&mut self, circuit: CircuitId) {
        debug!(target: "atm.cm.adapter", circuit = %circuit, "Null adapter unbound");
    }

    fn submit(&mut self, _circuit: CircuitId, _downcall: Downcall) -> Result<Delivery, CmError> {
        self.submitted += 1;
        Ok(Delivery::Complete)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_families() {
        assert_eq!(Upcall::Bulk(Bytes::new()).family(), ApiFamily::Bulk);
        assert_eq!(
            Upcall::Session(SessionPrimitive::Resync).family(),
            ApiFamily::Session
        );
        assert_eq!(
            Downcall::Segmented(SegmentedPrimitive::RetrieveComplete).family(),
            ApiFamily::Segmented
        );
    }

    #[test]
    fn test_null_adapter_counts_submissions() {
        let mut adapter = NullAdapter::default();
        let circuit = CircuitId::new(0, 1);

        adapter
            .init(circuit, ApiFamily::Bulk, &AttributeSet::default())
            .unwrap();
        let delivery = adapter
            .submit(circuit, Downcall::Bulk(Bytes::from_static(b"x")))
            .unwrap();
        adapter.terminate(circuit);

        assert_eq!(delivery, Delivery::Complete);
        assert_eq!(adapter.submitted(), 1);
    }
}
