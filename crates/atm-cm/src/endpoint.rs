//! Endpoint boundary.
//!
//! Endpoints own connections and receive notifications about them. Every
//! connection that was not rejected synchronously receives exactly one of
//! `on_connected` or `on_cleared`. A released connection receives neither,
//! since its token is unlinked before teardown.

use crate::adapter::{SegmentedPrimitive, SessionPrimitive};
use atm_common::{AttributeSet, Cause, ConnectionId, EndpointToken};
use bytes::Bytes;

/// Application endpoint callbacks.
///
/// Callbacks run on the manager task and must not block.
pub trait Endpoint: Send + Sync {
    /// The connection's circuit is active.
    fn on_connected(&self, token: EndpointToken);

    /// The connection was cleared by the network, an abort, or shutdown.
    fn on_cleared(&self, token: EndpointToken, cause: &Cause);

    /// An incoming call matched the listener registered with `listener`.
    ///
    /// Return the token for the new `connection` to accept it, or a cause to
    /// refuse. A refusal lets the next matching listener try.
    fn on_incoming(
        &self,
        listener: EndpointToken,
        connection: ConnectionId,
        attrs: &AttributeSet,
    ) -> Result<EndpointToken, Cause>;

    /// Bulk frame, LLC header already stripped.
    fn on_bulk_data(&self, _token: EndpointToken, _frame: Bytes) {}

    fn on_session(&self, _token: EndpointToken, _primitive: SessionPrimitive) {}

    fn on_segmented(&self, _token: EndpointToken, _primitive: SegmentedPrimitive) {}
}
