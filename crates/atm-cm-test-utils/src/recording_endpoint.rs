//! Endpoint that records every callback it receives.
//!
//! Incoming calls are accepted with freshly numbered tokens by default, or
//! refused with a fixed cause.
//!
//! # Example
//!
//! ```rust,ignore
//! use atm_cm_test_utils::RecordingEndpoint;
//!
//! let endpoint = RecordingEndpoint::new();
//! let refusing = RecordingEndpoint::refusing(CauseValue::UserBusy);
//!
//! // ... drive the manager ...
//! assert_eq!(endpoint.connected(), vec![EndpointToken(1)]);
//! ```

use atm_cm::adapter::{SegmentedPrimitive, SessionPrimitive};
use atm_cm::endpoint::Endpoint;
use atm_common::{AttributeSet, Cause, CauseValue, ConnectionId, EndpointToken};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Token numbering for accepted incoming connections starts here.
pub const FIRST_ACCEPTED_TOKEN: u64 = 1000;

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    Connected(EndpointToken),
    Cleared(EndpointToken, CauseValue),
    Incoming {
        listener: EndpointToken,
        connection: ConnectionId,
        accepted: Option<EndpointToken>,
    },
    Bulk(EndpointToken, Bytes),
    Session(EndpointToken, SessionPrimitive),
    Segmented(EndpointToken, SegmentedPrimitive),
}

#[derive(Debug)]
struct RecordingEndpointInner {
    refuse_with: Option<CauseValue>,
    next_token: u64,
    events: Vec<EndpointEvent>,
    incoming_attrs: Vec<AttributeSet>,
}

/// Recording endpoint; share it with the manager as `Arc<dyn Endpoint>`.
#[derive(Debug)]
pub struct RecordingEndpoint {
    inner: Mutex<RecordingEndpointInner>,
}

impl RecordingEndpoint {
    /// Endpoint that accepts every incoming call.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_policy(None))
    }

    /// Endpoint that refuses every incoming call with `cause`.
    #[must_use]
    pub fn refusing(cause: CauseValue) -> Arc<Self> {
        Arc::new(Self::with_policy(Some(cause)))
    }

    fn with_policy(refuse_with: Option<CauseValue>) -> Self {
        Self {
            inner: Mutex::new(RecordingEndpointInner {
                refuse_with,
                next_token: FIRST_ACCEPTED_TOKEN,
                events: Vec::new(),
                incoming_attrs: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<EndpointEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    /// Tokens that received `on_connected`, in order.
    #[must_use]
    pub fn connected(&self) -> Vec<EndpointToken> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EndpointEvent::Connected(token) => Some(token),
                _ => None,
            })
            .collect()
    }

    /// Tokens that received `on_cleared`, with the cause, in order.
    #[must_use]
    pub fn cleared(&self) -> Vec<(EndpointToken, CauseValue)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EndpointEvent::Cleared(token, cause) => Some((token, cause)),
                _ => None,
            })
            .collect()
    }

    /// Tokens handed out for accepted incoming calls, in order.
    #[must_use]
    pub fn accepted(&self) -> Vec<EndpointToken> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EndpointEvent::Incoming { accepted, .. } => accepted,
                _ => None,
            })
            .collect()
    }

    /// Number of incoming offers, accepted or not.
    #[must_use]
    pub fn offers(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, EndpointEvent::Incoming { .. }))
            .count()
    }

    /// Attribute sets of the calls offered, in order.
    #[must_use]
    pub fn incoming_attrs(&self) -> Vec<AttributeSet> {
        self.inner.lock().unwrap().incoming_attrs.clone()
    }

    /// Bulk frames delivered to `token`, in order.
    #[must_use]
    pub fn bulk_frames(&self, token: EndpointToken) -> Vec<Bytes> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EndpointEvent::Bulk(t, frame) if t == token => Some(frame),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` events are recorded or `timeout` passes.
    ///
    /// Returns whether the count was reached. Uses tokio time, so it
    /// auto-advances under a paused clock.
    pub async fn wait_for_events(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.lock().unwrap().events.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn record(&self, event: EndpointEvent) {
        self.inner.lock().unwrap().events.push(event);
    }
}

impl Endpoint for RecordingEndpoint {
    fn on_connected(&self, token: EndpointToken) {
        self.record(EndpointEvent::Connected(token));
    }

    fn on_cleared(&self, token: EndpointToken, cause: &Cause) {
        self.record(EndpointEvent::Cleared(token, cause.value));
    }

    fn on_incoming(
        &self,
        listener: EndpointToken,
        connection: ConnectionId,
        attrs: &AttributeSet,
    ) -> Result<EndpointToken, Cause> {
        let mut inner = self.inner.lock().unwrap();
        inner.incoming_attrs.push(attrs.clone());
        let result = match inner.refuse_with {
            Some(cause) => Err(Cause::new(cause)),
            None => {
                let token = EndpointToken(inner.next_token);
                inner.next_token += 1;
                Ok(token)
            }
        };
        inner.events.push(EndpointEvent::Incoming {
            listener,
            connection,
            accepted: result.as_ref().ok().copied(),
        });
        result
    }

    fn on_bulk_data(&self, token: EndpointToken, frame: Bytes) {
        self.record(EndpointEvent::Bulk(token, frame));
    }

    fn on_session(&self, token: EndpointToken, primitive: SessionPrimitive) {
        self.record(EndpointEvent::Session(token, primitive));
    }

    fn on_segmented(&self, token: EndpointToken, primitive: SegmentedPrimitive) {
        self.record(EndpointEvent::Segmented(token, primitive));
    }
}
