//! Outbound connect and call completion.

use super::{CircuitState, ConnectStatus, Connection, ConnectionManager, ConnectionState, Side};
use crate::endpoint::Endpoint;
use crate::errors::CmError;
use crate::observability::metrics as obs;
use crate::signaling::CallProgress;
use atm_common::{
    ApiFamily, Attr, AttributeSet, CircuitId, ConnectionConfiguration, ConnectionId,
    EndpointToken,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Check the attributes of an outbound connect.
///
/// Fails fast with `InvalidArgument` naming the first offending element.
pub fn validate_connect_attrs(attrs: &AttributeSet) -> Result<(), CmError> {
    let invalid = |what: &str| Err(CmError::InvalidArgument(what.to_string()));

    if attrs.nif.is_none() {
        return invalid("network interface required");
    }
    let Some(api) = attrs.api else {
        return invalid("api family required");
    };
    if !attrs.aal.is_present() {
        return invalid("adaptation layer required");
    }
    match &attrs.bearer {
        Attr::Present(bearer)
            if bearer.configuration == ConnectionConfiguration::PointToPoint => {}
        _ => return invalid("point-to-point bearer required"),
    }
    if attrs.bhli.is_any() || attrs.blli_l2.is_any() || attrs.blli_l3.is_any() {
        return invalid("layer information must not be a wildcard");
    }
    if attrs.traffic.is_any() {
        return invalid("traffic descriptor must not be a wildcard");
    }
    match &attrs.llc {
        Attr::Absent => {}
        Attr::Any => return invalid("llc must not be a wildcard"),
        Attr::Present(llc) => {
            if !llc.has_valid_length() {
                return invalid("llc header length out of range");
            }
            if api != ApiFamily::Bulk {
                return invalid("llc encapsulation requires the bulk api");
            }
        }
    }
    match &attrs.called {
        Attr::Present(party) if !party.address.is_empty() => {}
        _ => return invalid("called address required"),
    }
    if !attrs.calling.is_absent() {
        return invalid("calling address must be absent");
    }
    if !attrs.qos.is_present() {
        return invalid("qos required");
    }
    if !attrs.cause.is_absent() {
        return invalid("cause must be absent");
    }
    Ok(())
}

impl ConnectionManager {
    /// Open an outbound connection.
    ///
    /// A shareable LLC request is first matched against existing circuits;
    /// otherwise a new circuit is set up through the interface's signaling
    /// manager. `Connected` results have already delivered `on_connected`.
    pub fn connect(
        &mut self,
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        attrs: AttributeSet,
    ) -> Result<(ConnectionId, ConnectStatus), CmError> {
        if self.shutting_down {
            return Err(CmError::ShuttingDown);
        }
        validate_connect_attrs(&attrs)?;
        let Some(nif) = attrs.nif else {
            return Err(CmError::InvalidArgument(
                "network interface required".to_string(),
            ));
        };
        if !self.signaling.contains_key(&nif) {
            obs::record_connect("error");
            return Err(CmError::NetworkUnreachable);
        }

        let llc = attrs.llc.present().cloned();

        if attrs.is_shareable() {
            if let Some(circuit_id) = self.find_shared_circuit(&attrs) {
                let result = self.attach_to_circuit(circuit_id, endpoint, token, llc);
                obs::record_connect("shared");
                return Ok(result);
            }
        }

        let circuit_id =
            self.insert_circuit(attrs.clone(), Side::Caller, CircuitState::Setup, None);
        let mut conn = Connection::new(endpoint, Some(token), ConnectionState::OutConn, llc);
        conn.circuit = Some(circuit_id);
        let conn_id = self.insert_connection(conn);
        if let Some(circuit) = self.circuit_mut(circuit_id) {
            circuit.members.push(conn_id);
        }

        let setup = match self.signaling.get_mut(&nif) {
            Some(signaling) => signaling.setup(circuit_id, &attrs),
            None => Err(CmError::NetworkUnreachable),
        };

        let (handle, progress) = match setup {
            Ok(result) => result,
            Err(e) => {
                // No call exists yet; discard silently and report synchronously
                warn!(
                    target: "atm.cm.call",
                    circuit = %circuit_id,
                    error = %e,
                    "Signaling setup failed"
                );
                self.stats.record_signaling_failure("setup", e.kind());
                obs::record_connect("error");
                self.remove_connection_entry(conn_id);
                self.remove_circuit_entry(circuit_id);
                return Err(e);
            }
        };

        if let Some(circuit) = self.circuit_mut(circuit_id) {
            circuit.handle = Some(handle);
        }

        info!(
            target: "atm.cm.call",
            circuit = %circuit_id,
            connection = %conn_id,
            handle = %handle,
            progress = ?progress,
            "Outbound call placed"
        );

        match progress {
            CallProgress::Proceeding => {
                obs::record_connect("in_progress");
                Ok((conn_id, ConnectStatus::InProgress))
            }
            CallProgress::Connected => {
                self.set_circuit_state(circuit_id, CircuitState::Init);
                let bound = self.bind_stack(circuit_id);
                let aborting = self.circuit(circuit_id).is_some_and(|c| c.aborting);
                if bound.is_err() || aborting {
                    // Reported synchronously, so the endpoint is not notified
                    if let Some(conn) = self.connection_mut(conn_id) {
                        conn.token = None;
                    }
                    if let Err(e) = &bound {
                        self.record_cause(circuit_id, e.cause());
                    }
                    self.close_circuit(circuit_id);
                    obs::record_connect("error");
                    return Err(match bound {
                        Err(e) => e,
                        Ok(()) => CmError::Fault(format!(
                            "circuit {circuit_id} aborted during stack initialization"
                        )),
                    });
                }
                self.activate(circuit_id);
                obs::record_connect("connected");
                Ok((conn_id, ConnectStatus::Connected))
            }
        }
    }

    /// The signaling manager reports the call for `circuit` connected.
    pub fn call_connected(&mut self, circuit_id: CircuitId) -> Result<(), CmError> {
        let Some(state) = self.circuit(circuit_id).map(|c| c.state) else {
            return Err(CmError::NotFound);
        };

        match state {
            CircuitState::Setup => {
                self.set_circuit_state(circuit_id, CircuitState::Init);
                if let Err(e) = self.bind_stack(circuit_id) {
                    self.record_cause(circuit_id, e.cause());
                    self.close_circuit(circuit_id);
                    return Ok(());
                }
                if self.circuit(circuit_id).is_some_and(|c| c.aborting) {
                    self.close_circuit(circuit_id);
                    return Ok(());
                }
            }
            CircuitState::Accept => {}
            other => {
                error!(
                    target: "atm.cm.call",
                    circuit = %circuit_id,
                    state = ?other,
                    "Call connected in unexpected circuit state"
                );
                return Err(CmError::Fault(format!(
                    "call connected in state {other:?}"
                )));
            }
        }

        self.activate(circuit_id);
        Ok(())
    }

    /// Bind the adapter stack to a circuit.
    pub(super) fn bind_stack(&mut self, circuit_id: CircuitId) -> Result<(), CmError> {
        let Some(circuit) = self
            .circuits
            .get(circuit_id.key())
            .filter(|c| c.serial == circuit_id.serial())
        else {
            return Err(CmError::NotFound);
        };
        let Some(api) = circuit.api else {
            return Err(CmError::Fault(format!(
                "circuit {circuit_id} has no api family"
            )));
        };

        match self.adapter.init(circuit_id, api, &circuit.attrs) {
            Ok(()) => {
                if let Some(circuit) = self.circuit_mut(circuit_id) {
                    circuit.stack_bound = true;
                }
                debug!(
                    target: "atm.cm.adapter",
                    circuit = %circuit_id,
                    api = api.as_str(),
                    "Adapter stack bound"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: "atm.cm.adapter",
                    circuit = %circuit_id,
                    error = %e,
                    "Adapter stack initialization failed"
                );
                Err(e)
            }
        }
    }

    /// Move a circuit to ACTIVE, notify waiting connections and deliver
    /// queued inbound PDUs in arrival order.
    fn activate(&mut self, circuit_id: CircuitId) {
        self.set_circuit_state(circuit_id, CircuitState::Active);

        let members = self
            .circuit(circuit_id)
            .map(|c| c.members.clone())
            .unwrap_or_default();
        for conn_id in members {
            let Some(conn) = self.connection_mut(conn_id) else {
                continue;
            };
            if !matches!(
                conn.state,
                ConnectionState::OutConn | ConnectionState::InAccept
            ) {
                continue;
            }
            conn.state = ConnectionState::Active;
            if let Some(token) = conn.token {
                conn.endpoint.on_connected(token);
            }
        }

        let queued = self
            .circuit_mut(circuit_id)
            .map(|c| std::mem::take(&mut c.rcvq))
            .unwrap_or_default();
        for upcall in queued {
            self.deliver(circuit_id, upcall);
        }

        info!(target: "atm.cm.call", circuit = %circuit_id, "Circuit active");
    }

    /// Link a new connection to an existing circuit.
    pub(super) fn attach_to_circuit(
        &mut self,
        circuit_id: CircuitId,
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        llc: Option<atm_common::Llc>,
    ) -> (ConnectionId, ConnectStatus) {
        let active = self
            .circuit(circuit_id)
            .is_some_and(|c| c.state == CircuitState::Active);
        let state = if active {
            ConnectionState::Active
        } else {
            ConnectionState::OutConn
        };

        let mut conn = Connection::new(Arc::clone(&endpoint), Some(token), state, llc);
        conn.circuit = Some(circuit_id);
        let conn_id = self.insert_connection(conn);
        if let Some(circuit) = self.circuit_mut(circuit_id) {
            circuit.members.push(conn_id);
        }

        info!(
            target: "atm.cm.share",
            circuit = %circuit_id,
            connection = %conn_id,
            active,
            "Connection attached to shared circuit"
        );

        if active {
            endpoint.on_connected(token);
            (conn_id, ConnectStatus::Connected)
        } else {
            (conn_id, ConnectStatus::InProgress)
        }
    }
}
