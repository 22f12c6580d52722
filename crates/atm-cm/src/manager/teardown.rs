//! Release, abort, and the circuit close routine.
//!
//! Closing a circuit runs in four phases:
//! 1. clear every remaining connection (`on_cleared` once, then unlink)
//! 2. release or reject the call with the signaling manager
//! 3. unbind the adapter stack once no upcall or downcall is outstanding
//! 4. free the signaling handle and remove the circuit
//!
//! Phases 2 and 3 may defer to the circuit timer. A resource shortage in
//! signaling and an outstanding downcall both retry after one tick, so a
//! busy stack never spins the timer wheel. Timer expiry re-enters the
//! routine where it stopped.

use super::{CircuitState, ConnectionManager, ConnectionState};
use crate::errors::CmError;
use atm_common::{Cause, CauseValue, CircuitId, ConnectionId, InterfaceId};
use tracing::{debug, error, info, warn};

impl ConnectionManager {
    /// Release a connection on behalf of its endpoint.
    ///
    /// The endpoint receives no `on_cleared` for the released connection.
    pub fn release(&mut self, connection: ConnectionId, cause: Cause) -> Result<(), CmError> {
        let Some(conn) = self.connection(connection) else {
            return Err(CmError::NotFound);
        };

        match conn.state {
            ConnectionState::Listen => {
                self.listeners.retain(|id| *id != connection);
                self.remove_connection_entry(connection);
                info!(
                    target: "atm.cm.teardown",
                    connection = %connection,
                    "Listener released"
                );
                return Ok(());
            }
            ConnectionState::InConn => {
                return Err(CmError::Fault(
                    "connection is still being offered".to_string(),
                ));
            }
            ConnectionState::Clear | ConnectionState::Free => {
                return Err(CmError::AlreadyInProgress);
            }
            ConnectionState::OutConn | ConnectionState::InAccept | ConnectionState::Active => {}
        }

        let Some(circuit_id) = conn.circuit else {
            error!(
                target: "atm.cm.teardown",
                connection = %connection,
                "Connection has no circuit"
            );
            return Err(CmError::Fault("connection has no circuit".to_string()));
        };
        let Some(circuit) = self.circuit(circuit_id) else {
            error!(
                target: "atm.cm.teardown",
                connection = %connection,
                circuit = %circuit_id,
                "Connection references a freed circuit"
            );
            return Err(CmError::Fault("circuit not found".to_string()));
        };

        match circuit.state {
            CircuitState::Incoming => {
                return Err(CmError::Fault("circuit is still incoming".to_string()));
            }
            CircuitState::Clear => return Err(CmError::AlreadyInProgress),
            CircuitState::Reject
            | CircuitState::Release
            | CircuitState::Term
            | CircuitState::Free => {
                error!(
                    target: "atm.cm.teardown",
                    connection = %connection,
                    circuit = %circuit_id,
                    state = ?circuit.state,
                    "Live connection on a terminating circuit"
                );
                return Err(CmError::Fault(format!(
                    "circuit in state {:?}",
                    circuit.state
                )));
            }
            CircuitState::Setup
            | CircuitState::Init
            | CircuitState::Accept
            | CircuitState::Active => {}
        }
        let sole_member = circuit.members.len() == 1;

        if let Some(conn) = self.connection_mut(connection) {
            conn.token = None;
        }

        info!(
            target: "atm.cm.teardown",
            connection = %connection,
            circuit = %circuit_id,
            cause = cause.value.code(),
            sole_member,
            "Connection released"
        );

        if sole_member {
            self.record_cause(circuit_id, cause);
            self.close_circuit(circuit_id);
        } else {
            self.close_connection(connection, &cause);
        }
        Ok(())
    }

    /// Force a circuit down on behalf of a third party (usually the adapter).
    ///
    /// Safe to call repeatedly; the close routine runs from the timer.
    pub fn abort(&mut self, circuit_id: CircuitId, cause: Cause) -> Result<(), CmError> {
        let Some(circuit) = self.circuit_mut(circuit_id) else {
            return Err(CmError::NotFound);
        };

        match circuit.state {
            CircuitState::Init => {
                // The in-line continuation sees the flag once the stack call returns
                circuit.aborting = true;
                self.record_cause(circuit_id, cause);
            }
            CircuitState::Setup | CircuitState::Accept | CircuitState::Active => {
                if circuit.aborting && circuit.timer.is_some() {
                    return Ok(());
                }
                circuit.aborting = true;
                self.stats.record_abort();
                warn!(
                    target: "atm.cm.teardown",
                    circuit = %circuit_id,
                    cause = cause.value.code(),
                    "Circuit aborted"
                );
                self.record_cause(circuit_id, cause);
                self.arm_timer(circuit_id, 0);
            }
            CircuitState::Reject
            | CircuitState::Release
            | CircuitState::Clear
            | CircuitState::Term => {
                debug!(
                    target: "atm.cm.teardown",
                    circuit = %circuit_id,
                    "Abort ignored, circuit already terminating"
                );
            }
            CircuitState::Incoming | CircuitState::Free => {
                warn!(
                    target: "atm.cm.teardown",
                    circuit = %circuit_id,
                    state = ?circuit.state,
                    "Abort in unexpected circuit state"
                );
            }
        }
        Ok(())
    }

    /// The signaling manager reports the call cleared by the network.
    pub fn call_cleared(&mut self, circuit_id: CircuitId, cause: Cause) -> Result<(), CmError> {
        let Some(circuit) = self.circuit(circuit_id) else {
            return Err(CmError::NotFound);
        };

        match circuit.state {
            CircuitState::Setup
            | CircuitState::Init
            | CircuitState::Accept
            | CircuitState::Active
            | CircuitState::Incoming => {}
            other => {
                error!(
                    target: "atm.cm.teardown",
                    circuit = %circuit_id,
                    state = ?other,
                    "Call cleared in unexpected circuit state"
                );
                return Err(CmError::Fault(format!("call cleared in state {other:?}")));
            }
        }

        info!(
            target: "atm.cm.teardown",
            circuit = %circuit_id,
            cause = cause.value.code(),
            "Call cleared by network"
        );
        self.call_queue.retain(|id| *id != circuit_id);
        self.set_circuit_state(circuit_id, CircuitState::Clear);
        self.record_cause(circuit_id, cause);
        self.close_circuit(circuit_id);
        Ok(())
    }

    /// Circuit timer expiry.
    ///
    /// Expiries for a replaced or cancelled timer are ignored.
    pub fn timer_expired(&mut self, circuit_id: CircuitId, generation: u64) {
        let Some(circuit) = self.circuit_mut(circuit_id) else {
            return;
        };
        if circuit.timer != Some(generation) {
            return;
        }
        circuit.timer = None;

        match circuit.state {
            CircuitState::Setup | CircuitState::Accept | CircuitState::Active
                if circuit.aborting =>
            {
                self.close_circuit(circuit_id);
            }
            CircuitState::Release | CircuitState::Reject | CircuitState::Term => {
                self.finish_circuit(circuit_id);
            }
            other => {
                warn!(
                    target: "atm.cm.teardown",
                    circuit = %circuit_id,
                    state = ?other,
                    "Timer expired in unexpected circuit state"
                );
            }
        }
    }

    /// Run the close routine for a circuit.
    pub(super) fn close_circuit(&mut self, circuit_id: CircuitId) {
        self.cancel_timer(circuit_id);
        let cause = self.circuit_cause(circuit_id);
        let Some(circuit) = self.circuit_mut(circuit_id) else {
            return;
        };
        circuit.rcvq.clear();
        let members = std::mem::take(&mut circuit.members);
        self.call_queue.retain(|id| *id != circuit_id);

        for member in members {
            self.close_connection(member, &cause);
        }

        self.finish_circuit(circuit_id);
    }

    /// Phases 2-4 of the close routine; re-entered from the timer.
    fn finish_circuit(&mut self, circuit_id: CircuitId) {
        let Some(circuit) = self.circuit(circuit_id) else {
            return;
        };
        let state = circuit.state;
        let nif = circuit.nif();
        let handle = circuit.handle;
        let cause = self.circuit_cause(circuit_id);

        let operation = match state {
            CircuitState::Setup
            | CircuitState::Init
            | CircuitState::Accept
            | CircuitState::Active
            | CircuitState::Release => Some(CircuitState::Release),
            CircuitState::Incoming | CircuitState::Reject => Some(CircuitState::Reject),
            CircuitState::Clear | CircuitState::Term => None,
            CircuitState::Free => {
                error!(
                    target: "atm.cm.teardown",
                    circuit = %circuit_id,
                    "Close routine on a freed circuit"
                );
                return;
            }
        };

        if let Some(next) = operation {
            self.set_circuit_state(circuit_id, next);
            let signaling = nif.and_then(|nif| self.signaling.get_mut(&nif));
            match (signaling, handle) {
                (Some(signaling), Some(handle)) => {
                    let result = if next == CircuitState::Release {
                        signaling.release(handle, &cause)
                    } else {
                        signaling.reject(handle, &cause)
                    };
                    match result {
                        Ok(()) => {}
                        Err(e) if e.is_resource_shortage() => {
                            if next == CircuitState::Release {
                                self.stats.record_release_retry();
                            } else {
                                self.stats.record_reject_retry();
                            }
                            debug!(
                                target: "atm.cm.teardown",
                                circuit = %circuit_id,
                                error = %e,
                                "Signaling short of resources, retrying"
                            );
                            self.arm_timer(circuit_id, 1);
                            return;
                        }
                        Err(e) => {
                            let operation = if next == CircuitState::Release {
                                "release"
                            } else {
                                "reject"
                            };
                            self.stats.record_signaling_failure(operation, e.kind());
                            error!(
                                target: "atm.cm.teardown",
                                circuit = %circuit_id,
                                error = %e,
                                operation,
                                "Signaling teardown failed, giving up on the call"
                            );
                        }
                    }
                }
                (None, _) => {
                    warn!(
                        target: "atm.cm.teardown",
                        circuit = %circuit_id,
                        "No signaling manager for circuit interface"
                    );
                }
                (Some(_), None) => {
                    debug!(
                        target: "atm.cm.teardown",
                        circuit = %circuit_id,
                        "Circuit has no signaling handle"
                    );
                }
            }
        }

        let Some(circuit) = self.circuit_mut(circuit_id) else {
            return;
        };
        if circuit.stack_bound {
            circuit.state = CircuitState::Term;
            // Upcalls finish inside one synchronous delivery, so only a downcall
            // held by the adapter can still be outstanding here.
            if circuit.up_count > 0 || circuit.down_count > 0 {
                debug!(
                    target: "atm.cm.teardown",
                    circuit = %circuit_id,
                    up_count = circuit.up_count,
                    down_count = circuit.down_count,
                    "Stack busy, deferring termination"
                );
                self.arm_timer(circuit_id, 1);
                return;
            }
            circuit.stack_bound = false;
            self.adapter.terminate(circuit_id);
        }

        self.set_circuit_state(circuit_id, CircuitState::Free);
        if let (Some(nif), Some(handle)) = (nif, handle) {
            if let Some(signaling) = self.signaling.get_mut(&nif) {
                signaling.free(handle);
            }
        }
        self.remove_circuit_entry(circuit_id);
        info!(
            target: "atm.cm.teardown",
            circuit = %circuit_id,
            cause = cause.value.code(),
            "Circuit freed"
        );
    }

    /// Clear a connection and unlink it from its circuit or the listener
    /// registry. Notifies the endpoint if its token is still linked.
    fn close_connection(&mut self, connection: ConnectionId, cause: &Cause) {
        let Some(conn) = self.connection_mut(connection) else {
            return;
        };
        let notify = matches!(
            conn.state,
            ConnectionState::OutConn
                | ConnectionState::InAccept
                | ConnectionState::Active
                | ConnectionState::Listen
        );
        let token = conn.token.take();
        let was_listener = conn.state == ConnectionState::Listen;
        conn.state = ConnectionState::Clear;
        let circuit_id = conn.circuit.take();

        if let (true, Some(token)) = (notify, token) {
            conn.endpoint.on_cleared(token, cause);
        }

        if was_listener {
            self.listeners.retain(|id| *id != connection);
        }
        if let Some(circuit_id) = circuit_id {
            if let Some(circuit) = self.circuit_mut(circuit_id) {
                circuit.members.retain(|id| *id != connection);
            }
        }
        self.remove_connection_entry(connection);

        debug!(
            target: "atm.cm.teardown",
            connection = %connection,
            cause = cause.value.code(),
            "Connection cleared"
        );
    }

    /// Detach the signaling manager of `nif`, closing its circuits and
    /// listeners first.
    pub fn detach_interface(&mut self, nif: InterfaceId) -> Result<(), CmError> {
        if !self.signaling.contains_key(&nif) {
            return Err(CmError::NotFound);
        }

        let cause = Cause::new(CauseValue::NetworkOutOfOrder);
        let circuits: Vec<CircuitId> = self
            .circuit_order
            .iter()
            .copied()
            .filter(|id| {
                self.circuit(*id)
                    .is_some_and(|c| c.nif() == Some(nif) && c.is_live())
            })
            .collect();
        for circuit_id in &circuits {
            if let Some(circuit) = self.circuit_mut(*circuit_id) {
                circuit.aborting = true;
            }
            self.record_cause(*circuit_id, cause.clone());
            self.close_circuit(*circuit_id);
        }

        let listeners: Vec<ConnectionId> = self
            .listeners
            .iter()
            .copied()
            .filter(|id| {
                self.connection(*id)
                    .and_then(|conn| conn.listen_attrs.as_ref())
                    .is_some_and(|attrs| attrs.nif == Some(nif))
            })
            .collect();
        for listener in listeners {
            self.close_connection(listener, &cause);
        }

        self.signaling.remove(&nif);
        info!(
            target: "atm.cm.teardown",
            nif = %nif,
            circuits_closed = circuits.len(),
            "Interface detached"
        );
        Ok(())
    }

    /// Stop taking new work, clear all listeners and close every live circuit.
    ///
    /// Circuits waiting on signaling retries or a busy stack finish later
    /// through their timers; [`ConnectionManager::is_quiescent`] reports when
    /// the table is empty.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!(
            target: "atm.cm.teardown",
            circuits = self.circuits.len(),
            listeners = self.listeners.len(),
            "Connection manager shutting down"
        );

        let cause = Cause::new(CauseValue::NormalCallClearing);
        for listener in self.listeners.clone() {
            self.close_connection(listener, &cause);
        }

        for circuit_id in self.circuit_order.clone() {
            let live = self.circuit(circuit_id).is_some_and(|c| c.is_live());
            if !live {
                continue;
            }
            if let Some(circuit) = self.circuit_mut(circuit_id) {
                circuit.aborting = true;
            }
            self.record_cause(circuit_id, cause.clone());
            self.close_circuit(circuit_id);
        }
    }
}
