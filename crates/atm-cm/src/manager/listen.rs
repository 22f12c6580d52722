//! Listener registry and incoming call processing.
//!
//! Incoming calls are queued as INCOMING circuits and matched against the
//! listener registry in batches of at most `callq_max` calls per pass.

use super::{CircuitState, Connection, ConnectionManager, ConnectionState, Side};
use crate::endpoint::Endpoint;
use crate::errors::CmError;
use crate::signaling::CallProgress;
use atm_common::{
    ApiFamily, Attr, AttributeSet, Cause, CauseValue, CircuitId, ConnectionConfiguration,
    ConnectionId, EndpointToken, InterfaceId, Llc, SignalingHandle,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Check the attributes of a listener registration.
pub fn validate_listen_attrs(attrs: &AttributeSet) -> Result<(), CmError> {
    let invalid = |what: &str| Err(CmError::InvalidArgument(what.to_string()));

    let Some(api) = attrs.api else {
        return invalid("api family required");
    };
    if let Attr::Present(bearer) = &attrs.bearer {
        if bearer.configuration != ConnectionConfiguration::PointToPoint {
            return invalid("point-to-multipoint listeners are not supported");
        }
    }
    if let Attr::Present(llc) = &attrs.llc {
        if !llc.has_valid_length() {
            return invalid("llc header length out of range");
        }
        if api != ApiFamily::Bulk {
            return invalid("llc encapsulation requires the bulk api");
        }
    }
    if let Attr::Present(party) = &attrs.called {
        if party.address.is_empty() {
            return invalid("called address must not be empty");
        }
    }
    if !attrs.cause.is_absent() {
        return invalid("cause must be absent");
    }
    Ok(())
}

/// A listener element constrains the call only when it is present.
fn element_matches<T>(listener: &Attr<T>, call: &Attr<T>, eq: impl Fn(&T, &T) -> bool) -> bool {
    match listener {
        Attr::Absent | Attr::Any => true,
        Attr::Present(wanted) => call.present().is_some_and(|offered| eq(wanted, offered)),
    }
}

/// Whether an incoming call with `call` attributes matches a listener.
#[must_use]
pub fn listener_matches(listener: &AttributeSet, call: &AttributeSet) -> bool {
    if let Some(nif) = listener.nif {
        if call.nif != Some(nif) {
            return false;
        }
    }
    element_matches(&listener.bhli, &call.bhli, |a, b| a == b)
        && element_matches(&listener.blli_l2, &call.blli_l2, |a, b| a == b)
        && element_matches(&listener.blli_l3, &call.blli_l3, |a, b| a == b)
        && element_matches(&listener.llc, &call.llc, Llc::collides_with)
        && element_matches(&listener.aal, &call.aal, |a, b| {
            a.kind == b.kind && a.sscs == b.sscs
        })
        && element_matches(&listener.called, &call.called, |a, b| a == b)
}

/// LLC a connection created from a listener carries.
///
/// A wildcard listener takes the header offered by the call.
fn effective_llc(listener: &AttributeSet, call: &AttributeSet) -> Option<Llc> {
    match &listener.llc {
        Attr::Present(llc) => Some(llc.clone()),
        Attr::Any => call.llc.present().cloned(),
        Attr::Absent => None,
    }
}

impl ConnectionManager {
    /// Register a listener.
    pub fn listen(
        &mut self,
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        attrs: AttributeSet,
    ) -> Result<ConnectionId, CmError> {
        if self.shutting_down {
            return Err(CmError::ShuttingDown);
        }
        validate_listen_attrs(&attrs)?;

        let duplicate = self.listeners.iter().any(|id| {
            self.connection(*id)
                .and_then(|conn| conn.listen_attrs.as_ref())
                .is_some_and(|registered| *registered == attrs)
        });
        if duplicate {
            return Err(CmError::AddressInUse);
        }

        let mut conn = Connection::new(
            endpoint,
            Some(token),
            ConnectionState::Listen,
            attrs.llc.present().cloned(),
        );
        conn.listen_attrs = Some(attrs);
        let conn_id = self.insert_connection(conn);
        self.listeners.push(conn_id);

        info!(
            target: "atm.cm.call",
            connection = %conn_id,
            listeners = self.listeners.len(),
            "Listener registered"
        );
        Ok(conn_id)
    }

    /// The signaling manager reports a new incoming call.
    ///
    /// The call is queued for listener matching; the returned circuit id
    /// names the call in later `call_connected`/`call_cleared` reports.
    pub fn incoming_call(
        &mut self,
        nif: InterfaceId,
        handle: SignalingHandle,
        mut attrs: AttributeSet,
    ) -> Result<CircuitId, CmError> {
        if self.shutting_down {
            return Err(CmError::ShuttingDown);
        }
        if !self.signaling.contains_key(&nif) {
            return Err(CmError::NetworkUnreachable);
        }

        attrs.nif = Some(nif);
        let circuit_id =
            self.insert_circuit(attrs, Side::Callee, CircuitState::Incoming, Some(handle));
        self.call_queue.push_back(circuit_id);
        self.schedule_call_queue();

        debug!(
            target: "atm.cm.call",
            circuit = %circuit_id,
            nif = %nif,
            handle = %handle,
            queued = self.call_queue.len(),
            "Incoming call queued"
        );
        Ok(circuit_id)
    }

    /// Process up to `callq_max` queued incoming calls.
    ///
    /// Re-schedules itself while calls remain queued.
    pub fn process_call_queue(&mut self) {
        self.call_queue_armed = false;

        for _ in 0..self.callq_max {
            let Some(circuit_id) = self.call_queue.pop_front() else {
                break;
            };
            self.process_incoming(circuit_id);
        }

        if !self.call_queue.is_empty() {
            debug!(
                target: "atm.cm.call",
                remaining = self.call_queue.len(),
                "Call queue not drained, re-arming"
            );
            self.schedule_call_queue();
        }
    }

    fn reject_incoming(&mut self, circuit_id: CircuitId, value: CauseValue) {
        self.stats.record_call_rejected();
        self.record_cause(circuit_id, Cause::new(value));
        info!(
            target: "atm.cm.call",
            circuit = %circuit_id,
            cause = value.code(),
            "Incoming call rejected"
        );
        self.close_circuit(circuit_id);
    }

    fn process_incoming(&mut self, circuit_id: CircuitId) {
        let Some(circuit) = self.circuit(circuit_id) else {
            return;
        };
        if circuit.state != CircuitState::Incoming {
            debug!(
                target: "atm.cm.call",
                circuit = %circuit_id,
                state = ?circuit.state,
                "Queued call no longer incoming"
            );
            return;
        }
        let attrs = circuit.attrs.clone();

        if !attrs.aal.is_present()
            || attrs.llc.present().is_some_and(|llc| !llc.has_valid_length())
        {
            self.reject_incoming(circuit_id, CauseValue::InvalidInformationElementContents);
            return;
        }
        if attrs
            .bearer
            .present()
            .is_some_and(|b| b.configuration == ConnectionConfiguration::PointToMultipoint)
        {
            self.reject_incoming(circuit_id, CauseValue::BearerCapabilityNotImplemented);
            return;
        }

        let mut accepted = 0usize;
        let mut index = 0usize;
        while let Some(listener_id) = self.listeners.get(index).copied() {
            index += 1;

            let Some(listener) = self.connection(listener_id) else {
                continue;
            };
            let Some(listener_attrs) = listener.listen_attrs.as_ref() else {
                continue;
            };
            if !listener_matches(listener_attrs, &attrs) {
                continue;
            }

            let llc = effective_llc(listener_attrs, &attrs);
            let sharing = llc.as_ref().is_some_and(|l| l.shareable);
            if accepted > 0 {
                // Later listeners join only as further LLC-multiplexed members
                if !sharing || self.llc_collides_on_circuit(circuit_id, llc.as_ref()) {
                    continue;
                }
            }

            let endpoint = Arc::clone(&listener.endpoint);
            let listener_token = listener.token;
            let listener_api = listener_attrs.api;
            let listener_api_init = listener_attrs.api_init;

            let Some(listener_token) = listener_token else {
                continue;
            };

            let mut conn = Connection::new(
                Arc::clone(&endpoint),
                None,
                ConnectionState::InConn,
                llc.clone(),
            );
            conn.circuit = Some(circuit_id);
            let conn_id = self.insert_connection(conn);

            match endpoint.on_incoming(listener_token, conn_id, &attrs) {
                Ok(token) => {
                    if let Some(conn) = self.connection_mut(conn_id) {
                        conn.token = Some(token);
                        conn.state = ConnectionState::InAccept;
                    }
                    if let Some(circuit) = self.circuit_mut(circuit_id) {
                        circuit.members.push(conn_id);
                        if accepted == 0 {
                            circuit.api = listener_api;
                            circuit.attrs.api = listener_api;
                            circuit.attrs.api_init = listener_api_init;
                            circuit.attrs.llc = match &llc {
                                Some(l) => Attr::Present(l.clone()),
                                None => Attr::Absent,
                            };
                        }
                    }
                    accepted += 1;
                    debug!(
                        target: "atm.cm.call",
                        circuit = %circuit_id,
                        connection = %conn_id,
                        listener = %listener_id,
                        "Incoming call accepted by endpoint"
                    );
                    if !sharing {
                        break;
                    }
                }
                Err(cause) => {
                    self.remove_connection_entry(conn_id);
                    self.stats.record_incoming_refused();
                    debug!(
                        target: "atm.cm.call",
                        circuit = %circuit_id,
                        listener = %listener_id,
                        cause = cause.value.code(),
                        "Endpoint refused incoming call"
                    );
                }
            }
        }

        if accepted == 0 {
            self.reject_incoming(circuit_id, CauseValue::IncompatibleDestination);
            return;
        }

        self.stats.record_call_accepted();
        self.set_circuit_state(circuit_id, CircuitState::Accept);
        if let Err(e) = self.bind_stack(circuit_id) {
            // Back to INCOMING so the close routine rejects the call
            self.set_circuit_state(circuit_id, CircuitState::Incoming);
            self.record_cause(circuit_id, e.cause());
            self.close_circuit(circuit_id);
            return;
        }

        self.accept_incoming(circuit_id);
    }

    fn accept_incoming(&mut self, circuit_id: CircuitId) {
        let Some(circuit) = self.circuit(circuit_id) else {
            return;
        };
        let (Some(nif), Some(handle)) = (circuit.nif(), circuit.handle) else {
            return;
        };
        let attrs = circuit.attrs.clone();

        let result = match self.signaling.get_mut(&nif) {
            Some(signaling) => signaling.accept(handle, &attrs),
            None => Err(CmError::NetworkUnreachable),
        };

        match result {
            Ok(CallProgress::Connected) => {
                if let Err(e) = self.call_connected(circuit_id) {
                    warn!(
                        target: "atm.cm.call",
                        circuit = %circuit_id,
                        error = %e,
                        "Accepted call could not be activated"
                    );
                }
            }
            Ok(CallProgress::Proceeding) => {
                debug!(target: "atm.cm.call", circuit = %circuit_id, "Accept proceeding");
            }
            Err(e) => {
                warn!(
                    target: "atm.cm.call",
                    circuit = %circuit_id,
                    error = %e,
                    "Signaling accept failed"
                );
                self.stats.record_signaling_failure("accept", e.kind());
                self.record_cause(circuit_id, e.cause());
                self.close_circuit(circuit_id);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use atm_common::{Aal, AalType, HighLayerId, LowLayerId, PartyAddress, SscsType};

    fn aal5() -> Attr<Aal> {
        Attr::Present(Aal {
            kind: AalType::Aal5,
            sscs: SscsType::Null,
            forward_max_sdu: 9188,
            backward_max_sdu: 9188,
        })
    }

    fn call() -> AttributeSet {
        AttributeSet {
            nif: Some(InterfaceId(0)),
            aal: aal5(),
            bhli: Attr::Present(HighLayerId(vec![0x01, 0x02])),
            blli_l2: Attr::Present(LowLayerId(vec![0x0C])),
            llc: Attr::Present(Llc::new([0xAA, 0xAA, 0x03, 0x00], true)),
            called: Attr::Present(PartyAddress::new([0x47, 0x01])),
            ..AttributeSet::default()
        }
    }

    fn listener() -> AttributeSet {
        AttributeSet {
            api: Some(ApiFamily::Bulk),
            ..AttributeSet::default()
        }
    }

    #[test]
    fn test_absent_listener_elements_match_anything() {
        assert!(listener_matches(&listener(), &call()));
    }

    #[test]
    fn test_any_listener_elements_match_anything() {
        let mut l = listener();
        l.bhli = Attr::Any;
        l.llc = Attr::Any;
        l.aal = Attr::Any;
        assert!(listener_matches(&l, &call()));
    }

    #[test]
    fn test_present_llc_must_agree_over_shorter_length() {
        let mut l = listener();
        l.llc = Attr::Present(Llc::new([0xAA, 0xAA], true));
        assert!(listener_matches(&l, &call()));

        l.llc = Attr::Present(Llc::new([0xAA, 0xAB], true));
        assert!(!listener_matches(&l, &call()));

        let mut no_llc = call();
        no_llc.llc = Attr::Absent;
        l.llc = Attr::Present(Llc::new([0xAA], true));
        assert!(!listener_matches(&l, &no_llc));
    }

    #[test]
    fn test_interface_constraint() {
        let mut l = listener();
        l.nif = Some(InterfaceId(0));
        assert!(listener_matches(&l, &call()));

        l.nif = Some(InterfaceId(1));
        assert!(!listener_matches(&l, &call()));
    }

    #[test]
    fn test_aal_and_layer_ids() {
        let mut l = listener();
        l.aal = Attr::Present(Aal {
            kind: AalType::Aal34,
            sscs: SscsType::Null,
            forward_max_sdu: 0,
            backward_max_sdu: 0,
        });
        assert!(!listener_matches(&l, &call()));

        // SDU sizes do not take part in matching
        l.aal = Attr::Present(Aal {
            kind: AalType::Aal5,
            sscs: SscsType::Null,
            forward_max_sdu: 1,
            backward_max_sdu: 1,
        });
        assert!(listener_matches(&l, &call()));

        l.bhli = Attr::Present(HighLayerId(vec![0x01]));
        assert!(!listener_matches(&l, &call()));
    }

    #[test]
    fn test_called_address_includes_subaddress() {
        let mut l = listener();
        l.called = Attr::Present(PartyAddress::new([0x47, 0x01]));
        assert!(listener_matches(&l, &call()));

        l.called = Attr::Present(PartyAddress::new([0x47, 0x01]).with_subaddress([0x09]));
        assert!(!listener_matches(&l, &call()));
    }

    #[test]
    fn test_listen_validation() {
        assert!(validate_listen_attrs(&listener()).is_ok());

        let mut no_api = listener();
        no_api.api = None;
        assert!(validate_listen_attrs(&no_api).is_err());

        let mut bad_llc = listener();
        bad_llc.api = Some(ApiFamily::Segmented);
        bad_llc.llc = Attr::Present(Llc::new([0x01], true));
        assert!(validate_listen_attrs(&bad_llc).is_err());

        let mut with_cause = listener();
        with_cause.cause = Attr::Present(Cause::normal());
        assert!(validate_listen_attrs(&with_cause).is_err());
    }

    #[test]
    fn test_effective_llc() {
        let offered = call();
        assert_eq!(effective_llc(&listener(), &offered), None);

        let mut wildcard = listener();
        wildcard.llc = Attr::Any;
        assert_eq!(
            effective_llc(&wildcard, &offered),
            offered.llc.present().cloned()
        );
    }
}
