//! `ConnectionManagerActor` - owns the [`ConnectionManager`] and serialises
//! every call into it.
//!
//! The actor also runs the work the manager defers:
//!
//! - circuit timers, on a `DelayQueue` keyed by circuit and timer generation
//! - call-queue passes, run between messages so a burst of incoming calls
//!   cannot starve the mailbox
//!
//! # Graceful Shutdown
//!
//! A `Shutdown` message:
//! 1. Stops new connects, listens and incoming calls
//! 2. Clears every listener and closes every live circuit
//! 3. Keeps running timers until the circuit table is empty, then exits
//!
//! Cancelling the token skips step 3.

use super::mailbox::MailboxMonitor;
use super::messages::CmMessage;
use crate::adapter::{Downcall, ProtocolAdapter, Upcall};
use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::errors::CmError;
use crate::manager::{
    CircuitInfo, ConnectStatus, ConnectionInfo, ConnectionManager, DeferredWork, ManagerStatus,
};
use crate::observability::metrics as obs;
use crate::signaling::SignalingManager;
use atm_common::{
    AttributeSet, Cause, CircuitId, ConnectionId, EndpointToken, InterfaceId, Llc,
    SignalingHandle,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, instrument, trace};

/// Handle to the `ConnectionManagerActor`.
///
/// Cloned freely by endpoints, signaling managers and adapters. Every
/// request-reply method fails with `CmError::Internal` once the actor has
/// stopped.
#[derive(Clone)]
pub struct ConnectionManagerHandle {
    sender: mpsc::Sender<CmMessage>,
    cancel_token: CancellationToken,
}

impl ConnectionManagerHandle {
    /// Spawn the actor and return a handle plus the task's join handle.
    #[must_use]
    pub fn spawn(config: &Config, adapter: Box<dyn ProtocolAdapter>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(config.mailbox_size);
        let cancel_token = CancellationToken::new();

        let actor = ConnectionManagerActor::new(config, adapter, receiver, cancel_token.clone());
        let task = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task,
        )
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CmMessage,
    ) -> Result<T, CmError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CmError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CmError::Internal(format!("response receive failed: {e}")))
    }

    async fn notify(&self, message: CmMessage) -> Result<(), CmError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CmError::Internal(format!("channel send failed: {e}")))
    }

    /// Attach the signaling manager for a network interface.
    pub async fn attach_interface(
        &self,
        nif: InterfaceId,
        signaling: Box<dyn SignalingManager>,
    ) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::AttachInterface {
            nif,
            signaling,
            respond_to,
        })
        .await?
    }

    /// Detach an interface, closing its circuits and listeners.
    pub async fn detach_interface(&self, nif: InterfaceId) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::DetachInterface { nif, respond_to })
            .await?
    }

    /// Place an outbound call, or join a shareable circuit.
    pub async fn connect(
        &self,
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        attrs: AttributeSet,
    ) -> Result<(ConnectionId, ConnectStatus), CmError> {
        self.request(|respond_to| CmMessage::Connect {
            endpoint,
            token,
            attrs,
            respond_to,
        })
        .await?
    }

    /// Register a listener.
    pub async fn listen(
        &self,
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        attrs: AttributeSet,
    ) -> Result<ConnectionId, CmError> {
        self.request(|respond_to| CmMessage::Listen {
            endpoint,
            token,
            attrs,
            respond_to,
        })
        .await?
    }

    /// Add an LLC connection to the circuit of `existing`.
    pub async fn add_shared(
        &self,
        endpoint: Arc<dyn Endpoint>,
        token: EndpointToken,
        llc: Llc,
        existing: ConnectionId,
    ) -> Result<(ConnectionId, ConnectStatus), CmError> {
        self.request(|respond_to| CmMessage::AddShared {
            endpoint,
            token,
            llc,
            existing,
            respond_to,
        })
        .await?
    }

    pub async fn add_party(&self, connection: ConnectionId) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::AddParty {
            connection,
            respond_to,
        })
        .await?
    }

    pub async fn drop_party(&self, connection: ConnectionId) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::DropParty {
            connection,
            respond_to,
        })
        .await?
    }

    /// Release a connection; the endpoint gets no `on_cleared` for it.
    pub async fn release(&self, connection: ConnectionId, cause: Cause) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::Release {
            connection,
            cause,
            respond_to,
        })
        .await?
    }

    /// Submit outbound data or a control primitive on a connection.
    pub async fn submit(
        &self,
        connection: ConnectionId,
        downcall: Downcall,
    ) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::Submit {
            connection,
            downcall,
            respond_to,
        })
        .await?
    }

    /// Signaling: an incoming call arrived on `nif`.
    pub async fn incoming_call(
        &self,
        nif: InterfaceId,
        handle: SignalingHandle,
        attrs: AttributeSet,
    ) -> Result<CircuitId, CmError> {
        self.request(|respond_to| CmMessage::IncomingCall {
            nif,
            handle,
            attrs,
            respond_to,
        })
        .await?
    }

    /// Signaling: the call of `circuit` is connected.
    pub async fn call_connected(&self, circuit: CircuitId) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::CallConnected {
            circuit,
            respond_to,
        })
        .await?
    }

    /// Signaling: the network cleared the call of `circuit`.
    pub async fn call_cleared(&self, circuit: CircuitId, cause: Cause) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::CallCleared {
            circuit,
            cause,
            respond_to,
        })
        .await?
    }

    /// Adapter: inbound data or primitive. Does not wait for processing.
    pub async fn upcall(&self, circuit: CircuitId, upcall: Upcall) -> Result<(), CmError> {
        self.notify(CmMessage::Upcall { circuit, upcall }).await
    }

    /// Adapter: an in-flight downcall finished. Does not wait for processing.
    pub async fn downcall_complete(&self, circuit: CircuitId) -> Result<(), CmError> {
        self.notify(CmMessage::DowncallComplete { circuit }).await
    }

    /// Force a circuit down.
    pub async fn abort(&self, circuit: CircuitId, cause: Cause) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::Abort {
            circuit,
            cause,
            respond_to,
        })
        .await?
    }

    pub async fn status(&self) -> Result<ManagerStatus, CmError> {
        self.request(|respond_to| CmMessage::GetStatus { respond_to })
            .await
    }

    pub async fn circuit_info(&self, circuit: CircuitId) -> Result<Option<CircuitInfo>, CmError> {
        self.request(|respond_to| CmMessage::GetCircuit {
            circuit,
            respond_to,
        })
        .await
    }

    pub async fn connection_info(
        &self,
        connection: ConnectionId,
    ) -> Result<Option<ConnectionInfo>, CmError> {
        self.request(|respond_to| CmMessage::GetConnection {
            connection,
            respond_to,
        })
        .await
    }

    /// Begin graceful shutdown. The actor exits once every circuit is freed.
    pub async fn shutdown(&self) -> Result<(), CmError> {
        self.request(|respond_to| CmMessage::Shutdown { respond_to })
            .await
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The actor owning the connection manager state.
pub struct ConnectionManagerActor {
    cm_id: String,
    manager: ConnectionManager,
    receiver: mpsc::Receiver<CmMessage>,
    cancel_token: CancellationToken,
    mailbox: MailboxMonitor,
    /// Armed circuit timers; the value carries the timer generation.
    timers: DelayQueue<(CircuitId, u64)>,
    tick: Duration,
    call_queue_pending: bool,
    draining: bool,
}

impl ConnectionManagerActor {
    fn new(
        config: &Config,
        adapter: Box<dyn ProtocolAdapter>,
        receiver: mpsc::Receiver<CmMessage>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            cm_id: config.cm_id.clone(),
            manager: ConnectionManager::new(config, adapter),
            receiver,
            cancel_token,
            mailbox: MailboxMonitor::new(config.cm_id.clone(), config.mailbox_size),
            timers: DelayQueue::new(),
            tick: config.tick,
            call_queue_pending: false,
            draining: false,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "atm.cm.actor", fields(cm_id = %self.cm_id))]
    async fn run(mut self) {
        info!(
            target: "atm.cm.actor",
            cm_id = %self.cm_id,
            "ConnectionManagerActor started"
        );

        loop {
            let call_work = self.call_queue_pending;
            let timers_armed = !self.timers.is_empty();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "atm.cm.actor",
                        cm_id = %self.cm_id,
                        "ConnectionManagerActor received cancellation signal"
                    );
                    self.manager.shutdown();
                    break;
                }

                Some(expired) = std::future::poll_fn(|cx| self.timers.poll_expired(cx)),
                    if timers_armed =>
                {
                    let (circuit, generation) = expired.into_inner();
                    trace!(
                        target: "atm.cm.actor",
                        circuit = %circuit,
                        generation,
                        "Circuit timer expired"
                    );
                    self.manager.timer_expired(circuit, generation);
                }

                () = std::future::ready(()), if call_work => {
                    self.call_queue_pending = false;
                    self.manager.process_call_queue();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_receive(self.receiver.len());
                            let message_type = message.message_type();
                            let start = Instant::now();
                            self.handle_message(message);
                            obs::record_message_latency(message_type, start.elapsed());
                            self.mailbox.record_processed();
                        }
                        None => {
                            info!(
                                target: "atm.cm.actor",
                                cm_id = %self.cm_id,
                                "ConnectionManagerActor channel closed, exiting"
                            );
                            self.manager.shutdown();
                            break;
                        }
                    }
                }
            }

            self.schedule_deferred();
            self.publish_gauges();

            if self.draining && self.manager.is_quiescent() {
                info!(
                    target: "atm.cm.actor",
                    cm_id = %self.cm_id,
                    "All circuits freed, shutdown complete"
                );
                break;
            }
        }

        self.publish_gauges();
        info!(
            target: "atm.cm.actor",
            cm_id = %self.cm_id,
            circuits_remaining = self.manager.circuit_count(),
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionManagerActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: CmMessage) {
        match message {
            CmMessage::AttachInterface {
                nif,
                signaling,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.attach_interface(nif, signaling));
            }
            CmMessage::DetachInterface { nif, respond_to } => {
                let _ = respond_to.send(self.manager.detach_interface(nif));
            }
            CmMessage::Connect {
                endpoint,
                token,
                attrs,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.connect(endpoint, token, attrs));
            }
            CmMessage::Listen {
                endpoint,
                token,
                attrs,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.listen(endpoint, token, attrs));
            }
            CmMessage::AddShared {
                endpoint,
                token,
                llc,
                existing,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.add_shared(endpoint, token, llc, existing));
            }
            CmMessage::AddParty {
                connection,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.add_party(connection));
            }
            CmMessage::DropParty {
                connection,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.drop_party(connection));
            }
            CmMessage::Release {
                connection,
                cause,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.release(connection, cause));
            }
            CmMessage::Submit {
                connection,
                downcall,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.submit(connection, downcall));
            }
            CmMessage::IncomingCall {
                nif,
                handle,
                attrs,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.incoming_call(nif, handle, attrs));
            }
            CmMessage::CallConnected {
                circuit,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.call_connected(circuit));
            }
            CmMessage::CallCleared {
                circuit,
                cause,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.call_cleared(circuit, cause));
            }
            CmMessage::Upcall { circuit, upcall } => {
                if let Err(e) = self.manager.stack_upcall(circuit, upcall) {
                    debug!(
                        target: "atm.cm.actor",
                        circuit = %circuit,
                        error = %e,
                        "Upcall rejected"
                    );
                }
            }
            CmMessage::DowncallComplete { circuit } => {
                self.manager.downcall_complete(circuit);
            }
            CmMessage::Abort {
                circuit,
                cause,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.abort(circuit, cause));
            }
            CmMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.manager.status());
            }
            CmMessage::GetCircuit {
                circuit,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.circuit_info(circuit));
            }
            CmMessage::GetConnection {
                connection,
                respond_to,
            } => {
                let _ = respond_to.send(self.manager.connection_info(connection));
            }
            CmMessage::Shutdown { respond_to } => {
                self.manager.shutdown();
                self.draining = true;
                let _ = respond_to.send(());
            }
        }
    }

    /// Move work deferred by the manager onto the call-queue flag and the
    /// timer wheel.
    fn schedule_deferred(&mut self) {
        for work in self.manager.take_deferred() {
            match work {
                DeferredWork::ProcessCallQueue => {
                    self.call_queue_pending = true;
                }
                DeferredWork::Timer {
                    circuit,
                    generation,
                    ticks,
                } => {
                    let delay = self.tick * ticks;
                    trace!(
                        target: "atm.cm.actor",
                        circuit = %circuit,
                        generation,
                        ticks,
                        "Circuit timer armed"
                    );
                    self.timers.insert((circuit, generation), delay);
                }
            }
        }
    }

    fn publish_gauges(&self) {
        obs::set_circuits(self.manager.circuit_count());
        obs::set_connections(self.manager.connection_count());
        obs::set_listeners(self.manager.listener_count());
        obs::set_call_queue_depth(self.manager.call_queue_len());
    }
}
