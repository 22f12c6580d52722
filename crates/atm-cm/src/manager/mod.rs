//! The connection manager state machine.
//!
//! `ConnectionManager` owns every circuit and connection. It is synchronous
//! and single-owner: the actor in [`crate::actor`] serialises all calls into
//! it. Work that must happen later (call-queue passes, circuit timers) is
//! recorded as [`DeferredWork`] and drained by the owner with
//! [`ConnectionManager::take_deferred`].
//!
//! # Storage
//!
//! Circuits and connections live in `Slab` arenas. Ids carry the slab key and
//! an allocation serial; a lookup whose serial does not match the occupant of
//! the slot is treated as unknown. A circuit's member list is an ordered
//! `Vec<ConnectionId>` whose first element is the head connection, so
//! removing the head promotes the next sibling.
//!
//! # Submodules
//!
//! - `connect`: outbound connect, call connected, stack binding
//! - `listen`: listener registry and incoming call processing
//! - `share`: circuit sharing and added LLC connections
//! - `teardown`: release, abort, close routine and timers
//! - `dispatch`: upcall demultiplexing and downcall submission

mod connect;
mod dispatch;
mod listen;
mod share;
pub mod stats;
mod teardown;

pub use connect::validate_connect_attrs;
pub use dispatch::llc_frame;
pub use listen::{listener_matches, validate_listen_attrs};
pub use share::attributes_shareable;

use crate::adapter::{ProtocolAdapter, Upcall};
use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::errors::CmError;
use crate::signaling::SignalingManager;
use atm_common::{
    ApiFamily, Attr, AttributeSet, Cause, CircuitId, ConnectionId, Encapsulation, EndpointToken,
    InterfaceId, Llc, SignalingHandle,
};
use serde::Serialize;
use slab::Slab;
use stats::{CmStats, CmStatsSnapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// Circuit (VCC) states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Outbound call placed, awaiting connection.
    Setup,
    /// Connected; adapter stack being bound.
    Init,
    /// Incoming call accepted, awaiting connection.
    Accept,
    Active,
    /// Incoming call queued for listener matching.
    Incoming,
    /// Incoming call being rejected.
    Reject,
    /// Call being released.
    Release,
    /// Call cleared by the network.
    Clear,
    /// Waiting to unbind the adapter stack.
    Term,
    Free,
}

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Outbound, circuit not yet active.
    OutConn,
    Listen,
    /// Offered to an endpoint; not yet linked to its circuit.
    InConn,
    /// Accepted by an endpoint, circuit not yet active.
    InAccept,
    Active,
    Clear,
    Free,
}

/// Which side placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Caller,
    Callee,
}

/// Result of a successful connect or added connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectStatus {
    /// The connection is active; `on_connected` has been delivered.
    Connected,
    /// The circuit is still negotiating; `on_connected` or `on_cleared` follows.
    InProgress,
}

/// Work the owner of the manager must schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredWork {
    /// Run [`ConnectionManager::process_call_queue`] soon.
    ProcessCallQueue,
    /// Call [`ConnectionManager::timer_expired`] after `ticks` timer ticks.
    Timer {
        circuit: CircuitId,
        generation: u64,
        ticks: u32,
    },
}

pub(crate) struct Circuit {
    serial: u64,
    handle: Option<SignalingHandle>,
    attrs: AttributeSet,
    api: Option<ApiFamily>,
    side: Side,
    state: CircuitState,
    members: Vec<ConnectionId>,
    rcvq: VecDeque<Upcall>,
    up_count: u32,
    down_count: u32,
    /// Generation of the armed timer, if any.
    timer: Option<u64>,
    aborting: bool,
    stack_bound: bool,
    created_at: i64,
}

impl Circuit {
    fn nif(&self) -> Option<InterfaceId> {
        self.attrs.nif
    }

    fn head(&self) -> Option<ConnectionId> {
        self.members.first().copied()
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            CircuitState::Setup
                | CircuitState::Init
                | CircuitState::Accept
                | CircuitState::Active
                | CircuitState::Incoming
        )
    }
}

pub(crate) struct Connection {
    serial: u64,
    endpoint: Arc<dyn Endpoint>,
    token: Option<EndpointToken>,
    state: ConnectionState,
    encapsulation: Encapsulation,
    llc: Option<Llc>,
    circuit: Option<CircuitId>,
    /// Private copy of the registered attributes; listeners only.
    listen_attrs: Option<AttributeSet>,
}

impl Connection {
    fn new(
        endpoint: Arc<dyn Endpoint>,
        token: Option<EndpointToken>,
        state: ConnectionState,
        llc: Option<Llc>,
    ) -> Self {
        let encapsulation = if llc.is_some() {
            Encapsulation::Llc
        } else {
            Encapsulation::Null
        };
        Self {
            serial: 0,
            endpoint,
            token,
            state,
            encapsulation,
            llc,
            circuit: None,
            listen_attrs: None,
        }
    }

    fn is_shareable(&self) -> bool {
        self.encapsulation == Encapsulation::Llc
            && self.llc.as_ref().is_some_and(|llc| llc.shareable)
    }
}

/// Snapshot of one circuit.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitInfo {
    pub id: CircuitId,
    pub nif: Option<InterfaceId>,
    pub state: CircuitState,
    pub side: Side,
    pub api: Option<ApiFamily>,
    /// Member connections, head first.
    pub members: Vec<ConnectionId>,
    pub aborting: bool,
    pub stack_bound: bool,
    /// Upcalls in delivery. Always zero between manager calls.
    pub up_count: u32,
    /// Downcalls submitted but not yet completed by the adapter.
    pub down_count: u32,
    pub queued_pdus: usize,
    pub timer_armed: bool,
    pub cause: Option<Cause>,
    /// Unix timestamp of creation.
    pub created_at: i64,
}

/// Snapshot of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub circuit: Option<CircuitId>,
    pub encapsulation: Encapsulation,
    pub llc: Option<Llc>,
    pub token: Option<EndpointToken>,
}

/// Manager-wide status.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub cm_id: String,
    pub interfaces: Vec<InterfaceId>,
    pub circuits: usize,
    pub connections: usize,
    pub listeners: usize,
    pub queued_calls: usize,
    pub shutting_down: bool,
    pub stats: CmStatsSnapshot,
}

/// The virtual-circuit connection manager.
pub struct ConnectionManager {
    cm_id: String,
    callq_max: usize,
    rcvq_max: usize,
    signaling: HashMap<InterfaceId, Box<dyn SignalingManager>>,
    adapter: Box<dyn ProtocolAdapter>,
    connections: Slab<Connection>,
    circuits: Slab<Circuit>,
    /// Circuits in creation order; the sharing search takes the first fit.
    circuit_order: Vec<CircuitId>,
    /// Listener connections in registration order.
    listeners: Vec<ConnectionId>,
    call_queue: VecDeque<CircuitId>,
    call_queue_armed: bool,
    deferred: Vec<DeferredWork>,
    next_serial: u64,
    next_timer_generation: u64,
    stats: Arc<CmStats>,
    shutting_down: bool,
}

impl ConnectionManager {
    /// Create a manager with no interfaces attached.
    #[must_use]
    pub fn new(config: &Config, adapter: Box<dyn ProtocolAdapter>) -> Self {
        info!(
            target: "atm.cm.call",
            cm_id = %config.cm_id,
            callq_max = config.callq_max,
            rcvq_max = config.rcvq_max,
            "Connection manager created"
        );
        Self {
            cm_id: config.cm_id.clone(),
            callq_max: config.callq_max,
            rcvq_max: config.rcvq_max,
            signaling: HashMap::new(),
            adapter,
            connections: Slab::new(),
            circuits: Slab::new(),
            circuit_order: Vec::new(),
            listeners: Vec::new(),
            call_queue: VecDeque::new(),
            call_queue_armed: false,
            deferred: Vec::new(),
            next_serial: 1,
            next_timer_generation: 1,
            stats: Arc::new(CmStats::default()),
            shutting_down: false,
        }
    }

    #[must_use]
    pub fn cm_id(&self) -> &str {
        &self.cm_id
    }

    /// Shared statistics counters.
    #[must_use]
    pub fn stats(&self) -> Arc<CmStats> {
        Arc::clone(&self.stats)
    }

    /// Register the signaling manager serving `nif`.
    pub fn attach_interface(
        &mut self,
        nif: InterfaceId,
        signaling: Box<dyn SignalingManager>,
    ) -> Result<(), CmError> {
        if self.shutting_down {
            return Err(CmError::ShuttingDown);
        }
        if self.signaling.contains_key(&nif) {
            return Err(CmError::AddressInUse);
        }
        self.signaling.insert(nif, signaling);
        info!(target: "atm.cm.call", nif = %nif, "Interface attached");
        Ok(())
    }

    /// Drain work scheduled since the last call.
    pub fn take_deferred(&mut self) -> Vec<DeferredWork> {
        std::mem::take(&mut self.deferred)
    }

    /// No circuit remains in the table.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.circuits.is_empty()
    }

    #[must_use]
    pub fn circuit_count(&self) -> usize {
        self.circuits.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn call_queue_len(&self) -> usize {
        self.call_queue.len()
    }

    #[must_use]
    pub fn status(&self) -> ManagerStatus {
        let mut interfaces: Vec<InterfaceId> = self.signaling.keys().copied().collect();
        interfaces.sort();
        ManagerStatus {
            cm_id: self.cm_id.clone(),
            interfaces,
            circuits: self.circuits.len(),
            connections: self.connections.len(),
            listeners: self.listeners.len(),
            queued_calls: self.call_queue.len(),
            shutting_down: self.shutting_down,
            stats: self.stats.snapshot(),
        }
    }

    #[must_use]
    pub fn circuit_info(&self, id: CircuitId) -> Option<CircuitInfo> {
        let circuit = self.circuit(id)?;
        Some(CircuitInfo {
            id,
            nif: circuit.nif(),
            state: circuit.state,
            side: circuit.side,
            api: circuit.api,
            members: circuit.members.clone(),
            aborting: circuit.aborting,
            stack_bound: circuit.stack_bound,
            up_count: circuit.up_count,
            down_count: circuit.down_count,
            queued_pdus: circuit.rcvq.len(),
            timer_armed: circuit.timer.is_some(),
            cause: circuit.attrs.cause.present().cloned(),
            created_at: circuit.created_at,
        })
    }

    #[must_use]
    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let conn = self.connection(id)?;
        Some(ConnectionInfo {
            id,
            state: conn.state,
            circuit: conn.circuit,
            encapsulation: conn.encapsulation,
            llc: conn.llc.clone(),
            token: conn.token,
        })
    }

    /// Circuits in creation order.
    #[must_use]
    pub fn circuit_ids(&self) -> Vec<CircuitId> {
        self.circuit_order.clone()
    }

    /// Listener connections in registration order.
    #[must_use]
    pub fn listener_ids(&self) -> Vec<ConnectionId> {
        self.listeners.clone()
    }

    // ------------------------------------------------------------------
    // Table helpers
    // ------------------------------------------------------------------

    fn allocate_serial(&mut self) -> u64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        serial
    }

    fn insert_circuit(
        &mut self,
        attrs: AttributeSet,
        side: Side,
        state: CircuitState,
        handle: Option<SignalingHandle>,
    ) -> CircuitId {
        let serial = self.allocate_serial();
        let api = attrs.api;
        let key = self.circuits.insert(Circuit {
            serial,
            handle,
            attrs,
            api,
            side,
            state,
            members: Vec::new(),
            rcvq: VecDeque::new(),
            up_count: 0,
            down_count: 0,
            timer: None,
            aborting: false,
            stack_bound: false,
            created_at: chrono::Utc::now().timestamp(),
        });
        let id = CircuitId::new(key, serial);
        self.circuit_order.push(id);
        debug!(
            target: "atm.cm.call",
            circuit = %id,
            slab_index = key,
            side = ?side,
            state = ?state,
            "Circuit allocated"
        );
        id
    }

    fn insert_connection(&mut self, mut conn: Connection) -> ConnectionId {
        let serial = self.allocate_serial();
        conn.serial = serial;
        let key = self.connections.insert(conn);
        ConnectionId::new(key, serial)
    }

    fn circuit(&self, id: CircuitId) -> Option<&Circuit> {
        self.circuits
            .get(id.key())
            .filter(|circuit| circuit.serial == id.serial())
    }

    fn circuit_mut(&mut self, id: CircuitId) -> Option<&mut Circuit> {
        self.circuits
            .get_mut(id.key())
            .filter(|circuit| circuit.serial == id.serial())
    }

    fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections
            .get(id.key())
            .filter(|conn| conn.serial == id.serial())
    }

    fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections
            .get_mut(id.key())
            .filter(|conn| conn.serial == id.serial())
    }

    fn remove_connection_entry(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connection(id)?;
        self.connections.try_remove(id.key())
    }

    fn remove_circuit_entry(&mut self, id: CircuitId) -> Option<Circuit> {
        self.circuit(id)?;
        self.circuit_order.retain(|c| *c != id);
        self.call_queue.retain(|c| *c != id);
        self.circuits.try_remove(id.key())
    }

    fn set_circuit_state(&mut self, id: CircuitId, state: CircuitState) {
        if let Some(circuit) = self.circuit_mut(id) {
            debug!(
                target: "atm.cm.call",
                circuit = %id,
                from = ?circuit.state,
                to = ?state,
                "Circuit state change"
            );
            circuit.state = state;
        }
    }

    fn record_cause(&mut self, id: CircuitId, cause: Cause) {
        if let Some(circuit) = self.circuit_mut(id) {
            circuit.attrs.cause = Attr::Present(cause);
        }
    }

    /// Recorded cause, or normal clearing if none was recorded.
    fn circuit_cause(&self, id: CircuitId) -> Cause {
        self.circuit(id)
            .and_then(|circuit| circuit.attrs.cause.present().cloned())
            .unwrap_or_default()
    }

    /// Arm the circuit's single timer slot, replacing any armed timer.
    fn arm_timer(&mut self, id: CircuitId, ticks: u32) {
        let generation = self.next_timer_generation;
        self.next_timer_generation += 1;
        if let Some(circuit) = self.circuit_mut(id) {
            circuit.timer = Some(generation);
            self.deferred.push(DeferredWork::Timer {
                circuit: id,
                generation,
                ticks,
            });
        }
    }

    fn cancel_timer(&mut self, id: CircuitId) {
        if let Some(circuit) = self.circuit_mut(id) {
            circuit.timer = None;
        }
    }

    fn schedule_call_queue(&mut self) {
        if !self.call_queue_armed {
            self.call_queue_armed = true;
            self.deferred.push(DeferredWork::ProcessCallQueue);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::adapter::NullAdapter;

    fn manager() -> ConnectionManager {
        let config = Config {
            cm_id: "atmcm-test".to_string(),
            ..Config::default()
        };
        ConnectionManager::new(&config, Box::new(NullAdapter::default()))
    }

    #[test]
    fn test_stale_circuit_id_does_not_resolve() {
        let mut cm = manager();
        let first = cm.insert_circuit(
            AttributeSet::default(),
            Side::Caller,
            CircuitState::Setup,
            None,
        );
        cm.remove_circuit_entry(first).unwrap();

        let second = cm.insert_circuit(
            AttributeSet::default(),
            Side::Caller,
            CircuitState::Setup,
            None,
        );

        assert_eq!(first.key(), second.key());
        assert!(cm.circuit_info(first).is_none());
        assert!(cm.circuit_info(second).is_some());
        assert_eq!(cm.circuit_ids(), vec![second]);
    }

    #[test]
    fn test_timer_replaces_previous_generation() {
        let mut cm = manager();
        let id = cm.insert_circuit(
            AttributeSet::default(),
            Side::Caller,
            CircuitState::Active,
            None,
        );

        cm.arm_timer(id, 1);
        cm.arm_timer(id, 0);
        let work = cm.take_deferred();

        assert_eq!(work.len(), 2);
        let latest = work
            .iter()
            .rev()
            .find_map(|w| match w {
                DeferredWork::Timer { generation, .. } => Some(*generation),
                DeferredWork::ProcessCallQueue => None,
            })
            .unwrap();
        assert_eq!(cm.circuit(id).unwrap().timer, Some(latest));
        assert!(cm.take_deferred().is_empty());
    }

    #[test]
    fn test_call_queue_scheduled_once() {
        let mut cm = manager();
        cm.schedule_call_queue();
        cm.schedule_call_queue();
        assert_eq!(cm.take_deferred(), vec![DeferredWork::ProcessCallQueue]);
    }

    #[test]
    fn test_attach_interface_twice_is_address_in_use() {
        let mut cm = manager();
        cm.attach_interface(
            InterfaceId(1),
            Box::new(crate::signaling::LoopbackSignaling::new(InterfaceId(1))),
        )
        .unwrap();
        let result = cm.attach_interface(
            InterfaceId(1),
            Box::new(crate::signaling::LoopbackSignaling::new(InterfaceId(1))),
        );
        assert_eq!(result, Err(CmError::AddressInUse));
        assert_eq!(cm.status().interfaces, vec![InterfaceId(1)]);
    }

    #[test]
    fn test_default_cause_is_normal_clearing() {
        let mut cm = manager();
        let id = cm.insert_circuit(
            AttributeSet::default(),
            Side::Caller,
            CircuitState::Active,
            None,
        );
        assert_eq!(cm.circuit_cause(id), Cause::normal());

        let busy = Cause::new(atm_common::CauseValue::UserBusy);
        cm.record_cause(id, busy.clone());
        assert_eq!(cm.circuit_cause(id), busy);
    }
}
