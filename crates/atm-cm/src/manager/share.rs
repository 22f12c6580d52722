//! Circuit sharing (LLC multiplexing).
//!
//! Several connections may share one circuit when the circuit was created
//! or accepted with a shareable LLC. Each member is told apart by its LLC
//! header, so no two members may carry colliding headers.

use super::{CircuitState, ConnectStatus, Connection, ConnectionManager, ConnectionState, Side};
use crate::endpoint::Endpoint;
use crate::errors::CmError;
use atm_common::{AttributeSet, CircuitId, ConnectionId, Encapsulation, EndpointToken, Llc};
use std::sync::Arc;
use tracing::{debug, info};

/// Whether a request with `requested` attributes may join a circuit with
/// `existing` attributes placed from `side`.
///
/// Remote address, SDU size and QoS are compared from the circuit's point of
/// view: a circuit we accepted (`Callee`) has the remote party in its calling
/// address and its directions reversed.
#[must_use]
pub fn attributes_shareable(side: Side, existing: &AttributeSet, requested: &AttributeSet) -> bool {
    if !existing.is_shareable() {
        return false;
    }
    if existing.nif != requested.nif
        || existing.api != requested.api
        || existing.api_init != requested.api_init
    {
        return false;
    }

    let remote = match side {
        Side::Caller => existing.called.present(),
        Side::Callee => existing.calling.present(),
    };
    match (remote, requested.called.present()) {
        (Some(remote), Some(called)) if remote == called => {}
        _ => return false,
    }

    match (existing.aal.present(), requested.aal.present()) {
        (Some(have), Some(want)) => {
            let available = match side {
                Side::Caller => have.forward_max_sdu,
                Side::Callee => have.backward_max_sdu,
            };
            if have.kind != want.kind || have.sscs != want.sscs || want.forward_max_sdu > available
            {
                return false;
            }
        }
        _ => return false,
    }

    match (existing.traffic.present(), requested.traffic.present()) {
        (Some(have), Some(want)) if have.best_effort && want.best_effort => {}
        _ => return false,
    }

    match (existing.bearer.present(), requested.bearer.present()) {
        (Some(have), Some(want)) if have.class == want.class => {}
        _ => return false,
    }

    match (existing.qos.present(), requested.qos.present()) {
        (Some(have), Some(want)) => match side {
            Side::Caller => have.forward == want.forward && have.backward == want.backward,
            Side::Callee => have.forward == want.backward && have.backward == want.forward,
        },
        _ => false,
    }
}

impl ConnectionManager {
    /// First circuit, in creation order, that a shareable request may join.
    pub(super) fn find_shared_circuit(&self, requested: &AttributeSet) -> Option<CircuitId> {
        let llc = requested.llc.present()?;
        self.circuit_order.iter().copied().find(|id| {
            self.circuit(*id).is_some_and(|circuit| {
                matches!(
                    circuit.state,
                    CircuitState::Setup | CircuitState::Accept | CircuitState::Active
                ) && !circuit.aborting
                    && attributes_shareable(circuit.side, &circuit.attrs, requested)
                    && !self.llc_collides_on_circuit(*id, Some(llc))
            })
        })
    }

    /// Whether `llc` collides with the header of any member of the circuit.
    pub(super) fn llc_collides_on_circuit(&self, circuit_id: CircuitId, llc: Option<&Llc>) -> bool {
        let Some(llc) = llc else {
            return true;
        };
        let Some(circuit) = self.circuit(circuit_id) else {
            return false;
        };
        circuit.members.iter().any(|member| {
            self.connection(*member)
                .and_then(|conn| conn.llc.as_ref())
                .is_some_and(|existing| existing.collides_with(llc))
        })
    }

    /// Add a connection with its own LLC header to the circuit of `existing`.
    ///
    /// The new connection inherits the state of `existing`; a `Connected`
    /// result has already delivered `on_connected`.
    pub fn add_shared(
        &mut self,
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        llc: Llc,
        existing: ConnectionId,
    ) -> Result<(ConnectionId, ConnectStatus), CmError> {
        if self.shutting_down {
            return Err(CmError::ShuttingDown);
        }
        if !llc.shareable || !llc.has_valid_length() {
            return Err(CmError::InvalidArgument(
                "shareable llc with valid length required".to_string(),
            ));
        }

        let Some(base) = self.connection(existing) else {
            return Err(CmError::NotFound);
        };
        let status = match base.state {
            ConnectionState::OutConn | ConnectionState::InAccept => ConnectStatus::InProgress,
            ConnectionState::Active => ConnectStatus::Connected,
            other => {
                return Err(CmError::InvalidArgument(format!(
                    "connection in state {other:?} cannot be shared"
                )))
            }
        };
        if !base.is_shareable() {
            return Err(CmError::InvalidArgument(
                "connection is not llc multiplexed".to_string(),
            ));
        }
        let state = base.state;
        let Some(circuit_id) = base.circuit else {
            return Err(CmError::Fault("shared connection has no circuit".to_string()));
        };

        if self.llc_collides_on_circuit(circuit_id, Some(&llc)) {
            debug!(
                target: "atm.cm.share",
                circuit = %circuit_id,
                "LLC header collides with an existing member"
            );
            return Err(CmError::AddressInUse);
        }

        let mut conn = Connection::new(Arc::clone(&endpoint), Some(token), state, Some(llc));
        conn.encapsulation = Encapsulation::Llc;
        conn.circuit = Some(circuit_id);
        let conn_id = self.insert_connection(conn);
        if let Some(circuit) = self.circuit_mut(circuit_id) {
            circuit.members.push(conn_id);
        }

        info!(
            target: "atm.cm.share",
            circuit = %circuit_id,
            connection = %conn_id,
            existing = %existing,
            status = ?status,
            "LLC connection added to circuit"
        );

        if status == ConnectStatus::Connected {
            endpoint.on_connected(token);
        }
        Ok((conn_id, status))
    }

    /// Reserved for point-to-multipoint; validates the connection only.
    pub fn add_party(&mut self, connection: ConnectionId) -> Result<(), CmError> {
        self.connection(connection).map(|_| ()).ok_or(CmError::NotFound)
    }

    /// Reserved for point-to-multipoint; validates the connection only.
    pub fn drop_party(&mut self, connection: ConnectionId) -> Result<(), CmError> {
        self.connection(connection).map(|_| ()).ok_or(CmError::NotFound)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use atm_common::{
        Aal, AalType, ApiFamily, Attr, Bearer, BearerClass, ConnectionConfiguration,
        InterfaceId, PartyAddress, Qos, QosClass, SscsType, TrafficDescriptor,
    };

    fn shareable(header: &[u8]) -> AttributeSet {
        AttributeSet {
            nif: Some(InterfaceId(0)),
            api: Some(ApiFamily::Bulk),
            llc: Attr::Present(Llc::new(header, true)),
            aal: Attr::Present(Aal {
                kind: AalType::Aal5,
                sscs: SscsType::Null,
                forward_max_sdu: 9188,
                backward_max_sdu: 4096,
            }),
            traffic: Attr::Present(TrafficDescriptor {
                forward_peak_cell_rate: 0,
                backward_peak_cell_rate: 0,
                best_effort: true,
            }),
            bearer: Attr::Present(Bearer {
                class: BearerClass::X,
                configuration: ConnectionConfiguration::PointToPoint,
                clipping: false,
            }),
            called: Attr::Present(PartyAddress::new([0x47, 0x00, 0x05])),
            qos: Attr::Present(Qos {
                forward: QosClass::Class1,
                backward: QosClass::Class3,
            }),
            ..AttributeSet::default()
        }
    }

    #[test]
    fn test_identical_shareable_attributes() {
        assert!(attributes_shareable(
            Side::Caller,
            &shareable(&[0x01]),
            &shareable(&[0x02])
        ));
    }

    #[test]
    fn test_non_shareable_circuit() {
        let mut existing = shareable(&[0x01]);
        existing.llc = Attr::Present(Llc::new([0x01], false));
        assert!(!attributes_shareable(
            Side::Caller,
            &existing,
            &shareable(&[0x02])
        ));
    }

    #[test]
    fn test_forward_sdu_must_fit() {
        let mut requested = shareable(&[0x02]);
        requested.aal = Attr::Present(Aal {
            kind: AalType::Aal5,
            sscs: SscsType::Null,
            forward_max_sdu: 9189,
            backward_max_sdu: 0,
        });
        assert!(!attributes_shareable(
            Side::Caller,
            &shareable(&[0x01]),
            &requested
        ));
    }

    #[test]
    fn test_best_effort_required_on_both() {
        let mut requested = shareable(&[0x02]);
        requested.traffic = Attr::Present(TrafficDescriptor {
            forward_peak_cell_rate: 100,
            backward_peak_cell_rate: 100,
            best_effort: false,
        });
        assert!(!attributes_shareable(
            Side::Caller,
            &shareable(&[0x01]),
            &requested
        ));
    }

    #[test]
    fn test_callee_circuit_uses_calling_address_and_swapped_directions() {
        let mut accepted = shareable(&[0x01]);
        accepted.called = Attr::Present(PartyAddress::new([0x47, 0x00, 0x01]));
        accepted.calling = Attr::Present(PartyAddress::new([0x47, 0x00, 0x05]));
        accepted.qos = Attr::Present(Qos {
            forward: QosClass::Class3,
            backward: QosClass::Class1,
        });
        accepted.aal = Attr::Present(Aal {
            kind: AalType::Aal5,
            sscs: SscsType::Null,
            forward_max_sdu: 1024,
            backward_max_sdu: 9188,
        });

        assert!(attributes_shareable(
            Side::Callee,
            &accepted,
            &shareable(&[0x02])
        ));
        // The same attributes read from the caller side do not fit
        assert!(!attributes_shareable(
            Side::Caller,
            &accepted,
            &shareable(&[0x02])
        ));
    }

    #[test]
    fn test_callee_without_calling_address_is_not_shareable() {
        let accepted = shareable(&[0x01]);
        assert!(!attributes_shareable(
            Side::Callee,
            &accepted,
            &shareable(&[0x02])
        ));
    }

    #[test]
    fn test_different_bearer_class() {
        let mut requested = shareable(&[0x02]);
        requested.bearer = Attr::Present(Bearer {
            class: BearerClass::C,
            configuration: ConnectionConfiguration::PointToPoint,
            clipping: false,
        });
        assert!(!attributes_shareable(
            Side::Caller,
            &shareable(&[0x01]),
            &requested
        ));
    }
}
