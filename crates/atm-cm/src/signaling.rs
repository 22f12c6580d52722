//! Signaling manager boundary.
//!
//! One signaling manager serves each attached network interface. The
//! connection manager calls it synchronously; the signaling manager reports
//! asynchronous events back through `incoming_call`, `call_connected` and
//! `call_cleared` on the manager handle.

use crate::errors::CmError;
use atm_common::{AttributeSet, Cause, CircuitId, InterfaceId, SignalingHandle};
use tracing::debug;

/// Progress of a call after `setup` or `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallProgress {
    /// The call is connected now.
    Connected,
    /// The call is proceeding; `call_connected` or `call_cleared` follows.
    Proceeding,
}

/// Wire-level call control for one interface.
pub trait SignalingManager: Send {
    /// Place an outbound call for `circuit`.
    fn setup(
        &mut self,
        circuit: CircuitId,
        attrs: &AttributeSet,
    ) -> Result<(SignalingHandle, CallProgress), CmError>;

    /// Accept an incoming call.
    fn accept(
        &mut self,
        handle: SignalingHandle,
        attrs: &AttributeSet,
    ) -> Result<CallProgress, CmError>;

    /// Reject an incoming call. `Ok` means the call is cleared.
    fn reject(&mut self, handle: SignalingHandle, cause: &Cause) -> Result<(), CmError>;

    /// Release an established or proceeding call. `Ok` means the call is cleared.
    fn release(&mut self, handle: SignalingHandle, cause: &Cause) -> Result<(), CmError>;

    /// Forget the call handle.
    fn free(&mut self, handle: SignalingHandle);
}

/// In-process signaling manager that connects every call immediately.
#[derive(Debug)]
pub struct LoopbackSignaling {
    nif: InterfaceId,
    next_handle: u64,
    open_calls: usize,
}

impl LoopbackSignaling {
    #[must_use]
    pub fn new(nif: InterfaceId) -> Self {
        Self {
            nif,
            next_handle: 1,
            open_calls: 0,
        }
    }

    /// Calls set up or accepted and not yet freed.
    #[must_use]
    pub fn open_calls(&self) -> usize {
        self.open_calls
    }

    fn allocate(&mut self) -> SignalingHandle {
        let handle = SignalingHandle(self.next_handle);
        self.next_handle += 1;
        self.open_calls += 1;
        handle
    }
}

impl SignalingManager for LoopbackSignaling {
    fn setup(
        &mut self,
        circuit: CircuitId,
        _attrs: &AttributeSet,
    ) -> Result<(SignalingHandle, CallProgress), CmError> {
        let handle = self.allocate();
        debug!(
            target: "atm.cm.call",
            nif = %self.nif,
            circuit = %circuit,
            handle = %handle,
            "Loopback setup connected"
        );
        Ok((handle, CallProgress::Connected))
    }

    fn accept(
        &mut self,
        handle: SignalingHandle,
        _attrs: &AttributeSet,
    ) -> Result<CallProgress, CmError> {
        debug!(target: "atm.cm.call", nif = %self.nif, handle = %handle, "Loopback accept");
        Ok(CallProgress::Connected)
    }

    fn reject(&mut self, handle: SignalingHandle, cause: &Cause) -> Result<(), CmError> {
        debug!(
            target: "atm.cm.call",
            nif = %self.nif,
            handle = %handle,
            cause = cause.value.code(),
            "Loopback reject"
        );
        Ok(())
    }

    fn release(&mut self, handle: SignalingHandle, cause: &Cause) -> Result<(), CmError> {
        debug!(
            target: "atm.cm.call",
            nif = %self.nif,
            handle = %handle,
            cause = cause.value.code(),
            "Loopback release"
        );
        Ok(())
    }

    fn free(&mut self, handle: SignalingHandle) {
        self.open_calls = self.open_calls.saturating_sub(1);
        debug!(target: "atm.cm.call", nif = %self.nif, handle = %handle, "Loopback free");
    }
}
