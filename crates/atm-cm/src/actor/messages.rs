//! Messages accepted by the manager actor.
//!
//! Request-reply messages carry a `oneshot` sender; notifications from the
//! adapter on the data path (`Upcall`, `DowncallComplete`) are fire-and-forget.

use crate::adapter::{Downcall, Upcall};
use crate::endpoint::Endpoint;
use crate::errors::CmError;
use crate::manager::{CircuitInfo, ConnectStatus, ConnectionInfo, ManagerStatus};
use crate::signaling::SignalingManager;
use atm_common::{
    AttributeSet, Cause, CircuitId, ConnectionId, EndpointToken, InterfaceId, Llc,
    SignalingHandle,
};
use std::sync::Arc;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<Result<T, CmError>>;

/// Messages sent to the connection manager actor.
pub enum CmMessage {
    // Interface management
    AttachInterface {
        nif: InterfaceId,
        signaling: Box<dyn SignalingManager>,
        respond_to: Reply<()>,
    },
    DetachInterface {
        nif: InterfaceId,
        respond_to: Reply<()>,
    },

    // Endpoint API
    Connect {
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        attrs: AttributeSet,
        respond_to: Reply<(ConnectionId, ConnectStatus)>,
    },
    Listen {
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        attrs: AttributeSet,
        respond_to: Reply<ConnectionId>,
    },
    AddShared {
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        llc: Llc,
        existing: ConnectionId,
        respond_to: Reply<(ConnectionId, ConnectStatus)>,
    },
    AddParty {
        connection: ConnectionId,
        respond_to: Reply<()>,
    },
    DropParty {
        connection: ConnectionId,
        respond_to: Reply<()>,
    },
    Release {
        connection: ConnectionId,
        cause: Cause,
        respond_to: Reply<()>,
    },
    Submit {
        connection: ConnectionId,
        downcall: Downcall,
        respond_to: Reply<()>,
    },

    // Signaling notifications
    IncomingCall {
        nif: InterfaceId,
        handle: SignalingHandle,
        attrs: AttributeSet,
        respond_to: Reply<CircuitId>,
    },
    CallConnected {
        circuit: CircuitId,
        respond_to: Reply<()>,
    },
    CallCleared {
        circuit: CircuitId,
        cause: Cause,
        respond_to: Reply<()>,
    },

    // Adapter notifications
    Upcall {
        circuit: CircuitId,
        upcall: Upcall,
    },
    DowncallComplete {
        circuit: CircuitId,
    },
    Abort {
        circuit: CircuitId,
        cause: Cause,
        respond_to: Reply<()>,
    },

    // Introspection and lifecycle
    GetStatus {
        respond_to: oneshot::Sender<ManagerStatus>,
    },
    GetCircuit {
        circuit: CircuitId,
        respond_to: oneshot::Sender<Option<CircuitInfo>>,
    },
    GetConnection {
        connection: ConnectionId,
        respond_to: oneshot::Sender<Option<ConnectionInfo>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

impl CmMessage {
    /// Label used for latency metrics and logs.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            CmMessage::AttachInterface { .. } => "attach_interface",
            CmMessage::DetachInterface { .. } => "detach_interface",
            CmMessage::Connect { .. } => "connect",
            CmMessage::Listen { .. } => "listen",
            CmMessage::AddShared { .. } => "add_shared",
            CmMessage::AddParty { .. } => "add_party",
            CmMessage::DropParty { .. } => "drop_party",
            CmMessage::Release { .. } => "release",
            CmMessage::Submit { .. } => "submit",
            CmMessage::IncomingCall { .. } => "incoming_call",
            CmMessage::CallConnected { .. } => "call_connected",
            CmMessage::CallCleared { .. } => "call_cleared",
            CmMessage::Upcall { .. } => "upcall",
            CmMessage::DowncallComplete { .. } => "downcall_complete",
            CmMessage::Abort { .. } => "abort",
            CmMessage::GetStatus { .. } => "get_status",
            CmMessage::GetCircuit { .. } => "get_circuit",
            CmMessage::GetConnection { .. } => "get_connection",
            CmMessage::Shutdown { .. } => "shutdown",
        }
    }
}
