//! Data path between the adapter stack and endpoints.
//!
//! Upcalls on an active circuit go to the head connection, or on an LLC
//! multiplexed circuit to the member whose header prefixes the frame (the
//! header is stripped first). While a call is being accepted, up to
//! `rcvq_max` upcalls are held and replayed in order on activation.

use super::{CircuitState, ConnectionManager, ConnectionState};
use crate::adapter::{Delivery, Downcall, Upcall};
use crate::errors::CmError;
use crate::observability::metrics as obs;
use atm_common::{CircuitId, ConnectionId, Encapsulation};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, error, trace, warn};

impl ConnectionManager {
    /// Inbound upcall from the adapter stack bound to `circuit_id`.
    pub fn stack_upcall(&mut self, circuit_id: CircuitId, upcall: Upcall) -> Result<(), CmError> {
        let Some(circuit) = self.circuit_mut(circuit_id) else {
            return Err(CmError::NotFound);
        };

        if circuit.api != Some(upcall.family()) {
            error!(
                target: "atm.cm.data",
                circuit = %circuit_id,
                expected = ?circuit.api,
                received = ?upcall.family(),
                "Upcall family does not match circuit api"
            );
            return Err(CmError::Fault("upcall family mismatch".to_string()));
        }

        // Raised only for the duration of this synchronous delivery. Endpoint
        // callbacks cannot re-enter the manager, so the count is back to zero
        // before any teardown phase can observe it.
        circuit.up_count += 1;
        self.deliver_upcall(circuit_id, upcall);
        if let Some(circuit) = self.circuit_mut(circuit_id) {
            circuit.up_count = circuit.up_count.saturating_sub(1);
        }
        Ok(())
    }

    fn deliver_upcall(&mut self, circuit_id: CircuitId, upcall: Upcall) {
        let rcvq_max = self.rcvq_max;
        let Some(circuit) = self.circuit_mut(circuit_id) else {
            return;
        };

        match circuit.state {
            CircuitState::Active => self.deliver(circuit_id, upcall),
            CircuitState::Accept => {
                if circuit.rcvq.len() < rcvq_max {
                    circuit.rcvq.push_back(upcall);
                    trace!(
                        target: "atm.cm.data",
                        circuit = %circuit_id,
                        queued = circuit.rcvq.len(),
                        "Upcall held until circuit is active"
                    );
                } else {
                    self.stats.record_rcvq_overflow();
                    debug!(
                        target: "atm.cm.data",
                        circuit = %circuit_id,
                        "Receive queue full, upcall dropped"
                    );
                }
            }
            other => {
                self.stats.record_dropped_inactive_circuit();
                trace!(
                    target: "atm.cm.data",
                    circuit = %circuit_id,
                    state = ?other,
                    "Upcall on inactive circuit dropped"
                );
            }
        }
    }

    /// Hand an upcall to the connection it belongs to.
    pub(super) fn deliver(&mut self, circuit_id: CircuitId, upcall: Upcall) {
        let Some(circuit) = self.circuit(circuit_id) else {
            return;
        };

        let (target, upcall) = match upcall {
            Upcall::Bulk(frame) if circuit.attrs.encapsulation() == Encapsulation::Llc => {
                let matched = circuit.members.iter().copied().find_map(|member| {
                    self.connection(member)
                        .and_then(|conn| conn.llc.as_ref())
                        .filter(|llc| llc.prefixes(&frame))
                        .map(|llc| (member, llc.header.len()))
                });
                let Some((member, header_len)) = matched else {
                    self.stats.record_dropped_no_connection();
                    trace!(
                        target: "atm.cm.data",
                        circuit = %circuit_id,
                        frame_len = frame.len(),
                        "No connection for LLC header, frame dropped"
                    );
                    return;
                };
                (member, Upcall::Bulk(frame.slice(header_len..)))
            }
            other => {
                let Some(head) = circuit.head() else {
                    self.stats.record_dropped_no_connection();
                    return;
                };
                (head, other)
            }
        };

        let Some(conn) = self.connection(target) else {
            self.stats.record_dropped_no_connection();
            return;
        };
        let token = match (conn.state, conn.token) {
            (ConnectionState::Active, Some(token)) => token,
            _ => {
                self.stats.record_dropped_inactive_connection();
                trace!(
                    target: "atm.cm.data",
                    connection = %target,
                    state = ?conn.state,
                    "Upcall on inactive connection dropped"
                );
                return;
            }
        };

        match upcall {
            Upcall::Bulk(frame) => conn.endpoint.on_bulk_data(token, frame),
            Upcall::Session(primitive) => conn.endpoint.on_session(token, primitive),
            Upcall::Segmented(primitive) => conn.endpoint.on_segmented(token, primitive),
        }
    }

    /// Submit a downcall from an endpoint on `connection`.
    ///
    /// On LLC encapsulated connections a bulk frame gets the connection's
    /// header prepended. An in-flight delivery holds the circuit's downcall
    /// count until [`ConnectionManager::downcall_complete`].
    pub fn submit(&mut self, connection: ConnectionId, downcall: Downcall) -> Result<(), CmError> {
        let Some(conn) = self.connection(connection) else {
            return Err(CmError::NotFound);
        };
        if conn.state != ConnectionState::Active {
            return Err(CmError::Fault(format!(
                "connection in state {:?}",
                conn.state
            )));
        }
        let Some(circuit_id) = conn.circuit else {
            return Err(CmError::Fault("connection has no circuit".to_string()));
        };
        let header = match conn.encapsulation {
            Encapsulation::Llc => conn.llc.as_ref().map(|llc| llc.header.clone()),
            Encapsulation::Null => None,
        };

        let Some(circuit) = self.circuit_mut(circuit_id) else {
            return Err(CmError::Fault("circuit not found".to_string()));
        };
        if circuit.state != CircuitState::Active {
            return Err(CmError::Fault(format!(
                "circuit in state {:?}",
                circuit.state
            )));
        }
        if circuit.api != Some(downcall.family()) {
            warn!(
                target: "atm.cm.data",
                connection = %connection,
                circuit = %circuit_id,
                "Downcall family does not match circuit api"
            );
            return Err(CmError::Fault("downcall family mismatch".to_string()));
        }

        let downcall = match (downcall, header) {
            (Downcall::Bulk(frame), Some(header)) => Downcall::Bulk(llc_frame(&header, &frame)),
            (downcall, _) => downcall,
        };

        circuit.down_count += 1;
        let result = self.adapter.submit(circuit_id, downcall);
        let in_flight = matches!(result, Ok(Delivery::InFlight));
        if !in_flight {
            if let Some(circuit) = self.circuit_mut(circuit_id) {
                circuit.down_count = circuit.down_count.saturating_sub(1);
            }
        }

        if let Err(ref e) = result {
            obs::record_pdu_dropped("submit_failed");
            debug!(
                target: "atm.cm.data",
                connection = %connection,
                error = %e,
                "Adapter refused downcall"
            );
        }
        result.map(|_| ())
    }

    /// The adapter finished an in-flight downcall on `circuit_id`.
    pub fn downcall_complete(&mut self, circuit_id: CircuitId) {
        if let Some(circuit) = self.circuit_mut(circuit_id) {
            circuit.down_count = circuit.down_count.saturating_sub(1);
        }
    }
}

/// Frame with `header` prepended; exposed for adapters that build LLC frames.
#[must_use]
pub fn llc_frame(header: &[u8], payload: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(header.len() + payload.len());
    framed.put_slice(header);
    framed.put_slice(payload);
    framed.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llc_frame_prepends_header() {
        let frame = llc_frame(&[0xaa, 0xaa, 0x03], b"payload");
        assert_eq!(frame.len(), 10);
        assert!(frame.starts_with(&[0xaa, 0xaa, 0x03]));
        assert!(frame.ends_with(b"payload"));
    }
}
