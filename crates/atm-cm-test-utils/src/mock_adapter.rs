//! Mock protocol adapter for connection manager testing.
//!
//! Records every init, terminate and submission. Can be configured to:
//! - Fail stack initialisation
//! - Hold downcalls in flight until the test completes them
//! - Fail submissions

use atm_cm::adapter::{Delivery, Downcall, ProtocolAdapter};
use atm_cm::errors::CmError;
use atm_common::{ApiFamily, AttributeSet, CircuitId};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// One call made into the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Init { circuit: CircuitId, api: ApiFamily },
    Terminate { circuit: CircuitId },
    Submit { circuit: CircuitId, downcall: Downcall },
}

#[derive(Debug, Default)]
struct MockAdapterInner {
    init_failures: VecDeque<CmError>,
    submit_failure: Option<CmError>,
    hold_downcalls: bool,
    bound: HashSet<CircuitId>,
    calls: Vec<AdapterCall>,
}

/// Recording protocol adapter. Clone it before handing it to the manager.
#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    inner: Arc<Mutex<MockAdapterInner>>,
}

impl MockAdapter {
    /// Adapter that binds every circuit and completes every downcall.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next stack initialisation with `error`.
    #[must_use]
    pub fn failing_next_init(self, error: CmError) -> Self {
        self.inner.lock().unwrap().init_failures.push_back(error);
        self
    }

    /// Report every downcall as in flight.
    #[must_use]
    pub fn holding_downcalls(self) -> Self {
        self.inner.lock().unwrap().hold_downcalls = true;
        self
    }

    /// Fail every submission with `error`.
    #[must_use]
    pub fn failing_submit(self, error: CmError) -> Self {
        self.inner.lock().unwrap().submit_failure = Some(error);
        self
    }

    #[must_use]
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    #[must_use]
    pub fn inits(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AdapterCall::Init { .. }))
            .count()
    }

    #[must_use]
    pub fn terminations(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AdapterCall::Terminate { .. }))
            .count()
    }

    /// Submissions in order, as the adapter received them.
    #[must_use]
    pub fn submitted(&self) -> Vec<(CircuitId, Downcall)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                AdapterCall::Submit { circuit, downcall } => Some((circuit, downcall)),
                _ => None,
            })
            .collect()
    }

    /// Whether the stack is currently bound to `circuit`.
    #[must_use]
    pub fn is_bound(&self, circuit: CircuitId) -> bool {
        self.inner.lock().unwrap().bound.contains(&circuit)
    }
}

impl ProtocolAdapter for MockAdapter {
    fn init(
        &mut self,
        circuit: CircuitId,
        api: ApiFamily,
        _attrs: &AttributeSet,
    ) -> Result<(), CmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(AdapterCall::Init { circuit, api });
        if let Some(error) = inner.init_failures.pop_front() {
            return Err(error);
        }
        inner.bound.insert(circuit);
        Ok(())
    }

    fn terminate(&mut self, circuit: CircuitId) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(AdapterCall::Terminate { circuit });
        inner.bound.remove(&circuit);
    }

    fn submit(&mut self, circuit: CircuitId, downcall: Downcall) -> Result<Delivery, CmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(AdapterCall::Submit { circuit, downcall });
        if let Some(error) = inner.submit_failure.clone() {
            return Err(error);
        }
        if inner.hold_downcalls {
            Ok(Delivery::InFlight)
        } else {
            Ok(Delivery::Complete)
        }
    }
}
