//! Mock signaling manager for connection manager testing.
//!
//! Provides a signaling manager that can be configured to:
//! - Connect or proceed on setup and accept
//! - Fail the next setup/accept with a given error
//! - Fail release or reject a number of times (e.g. `OutOfMemory` retries)
//!
//! The mock is `Clone`; keep one clone in the test and hand the other to the
//! manager. Every call is appended to a shared log.
//!
//! # Example
//!
//! ```rust,ignore
//! use atm_cm_test_utils::MockSignaling;
//!
//! let signaling = MockSignaling::builder()
//!     .setup_proceeds()
//!     .fail_release(3, CmError::OutOfMemory)
//!     .build();
//! ```

use atm_cm::errors::CmError;
use atm_cm::signaling::{CallProgress, SignalingManager};
use atm_common::{AttributeSet, Cause, CauseValue, CircuitId, SignalingHandle};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One call made into the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingCall {
    Setup {
        circuit: CircuitId,
        handle: Option<SignalingHandle>,
    },
    Accept {
        handle: SignalingHandle,
    },
    Reject {
        handle: SignalingHandle,
        cause: CauseValue,
    },
    Release {
        handle: SignalingHandle,
        cause: CauseValue,
    },
    Free {
        handle: SignalingHandle,
    },
}

#[derive(Debug)]
struct MockSignalingInner {
    next_handle: u64,
    setup_progress: CallProgress,
    accept_progress: CallProgress,
    setup_failures: VecDeque<CmError>,
    accept_failures: VecDeque<CmError>,
    release_failures: VecDeque<CmError>,
    reject_failures: VecDeque<CmError>,
    calls: Vec<SignalingCall>,
    setup_attrs: Vec<AttributeSet>,
}

/// Scriptable signaling manager.
#[derive(Debug, Clone)]
pub struct MockSignaling {
    inner: Arc<Mutex<MockSignalingInner>>,
}

impl Default for MockSignaling {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockSignaling {
    /// Create a new `MockSignaling` builder.
    #[must_use]
    pub fn builder() -> MockSignalingBuilder {
        MockSignalingBuilder::default()
    }

    /// All calls so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<SignalingCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Attribute sets passed to `setup`, oldest first.
    #[must_use]
    pub fn setup_attrs(&self) -> Vec<AttributeSet> {
        self.inner.lock().unwrap().setup_attrs.clone()
    }

    #[must_use]
    pub fn setups(&self) -> usize {
        self.count(|c| matches!(c, SignalingCall::Setup { .. }))
    }

    #[must_use]
    pub fn accepts(&self) -> usize {
        self.count(|c| matches!(c, SignalingCall::Accept { .. }))
    }

    /// Release attempts, including failed ones.
    #[must_use]
    pub fn releases(&self) -> usize {
        self.count(|c| matches!(c, SignalingCall::Release { .. }))
    }

    /// Reject attempts, including failed ones.
    #[must_use]
    pub fn rejects(&self) -> usize {
        self.count(|c| matches!(c, SignalingCall::Reject { .. }))
    }

    #[must_use]
    pub fn frees(&self) -> usize {
        self.count(|c| matches!(c, SignalingCall::Free { .. }))
    }

    /// Cause of the most recent reject.
    #[must_use]
    pub fn last_reject_cause(&self) -> Option<CauseValue> {
        self.calls().into_iter().rev().find_map(|c| match c {
            SignalingCall::Reject { cause, .. } => Some(cause),
            _ => None,
        })
    }

    /// Cause of the most recent release.
    #[must_use]
    pub fn last_release_cause(&self) -> Option<CauseValue> {
        self.calls().into_iter().rev().find_map(|c| match c {
            SignalingCall::Release { cause, .. } => Some(cause),
            _ => None,
        })
    }

    /// Queue one more failure for the next release attempt.
    pub fn push_release_failure(&self, error: CmError) {
        self.inner.lock().unwrap().release_failures.push_back(error);
    }

    fn count(&self, predicate: impl Fn(&SignalingCall) -> bool) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| predicate(c))
            .count()
    }
}

impl SignalingManager for MockSignaling {
    fn setup(
        &mut self,
        circuit: CircuitId,
        attrs: &AttributeSet,
    ) -> Result<(SignalingHandle, CallProgress), CmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.setup_attrs.push(attrs.clone());
        if let Some(error) = inner.setup_failures.pop_front() {
            inner.calls.push(SignalingCall::Setup {
                circuit,
                handle: None,
            });
            return Err(error);
        }
        let handle = SignalingHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.calls.push(SignalingCall::Setup {
            circuit,
            handle: Some(handle),
        });
        Ok((handle, inner.setup_progress))
    }

    fn accept(
        &mut self,
        handle: SignalingHandle,
        _attrs: &AttributeSet,
    ) -> Result<CallProgress, CmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(SignalingCall::Accept { handle });
        if let Some(error) = inner.accept_failures.pop_front() {
            return Err(error);
        }
        Ok(inner.accept_progress)
    }

    fn reject(&mut self, handle: SignalingHandle, cause: &Cause) -> Result<(), CmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(SignalingCall::Reject {
            handle,
            cause: cause.value,
        });
        inner.reject_failures.pop_front().map_or(Ok(()), Err)
    }

    fn release(&mut self, handle: SignalingHandle, cause: &Cause) -> Result<(), CmError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(SignalingCall::Release {
            handle,
            cause: cause.value,
        });
        inner.release_failures.pop_front().map_or(Ok(()), Err)
    }

    fn free(&mut self, handle: SignalingHandle) {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push(SignalingCall::Free { handle });
    }
}

/// Builder for `MockSignaling` configuration.
#[derive(Debug)]
pub struct MockSignalingBuilder {
    first_handle: u64,
    setup_progress: CallProgress,
    accept_progress: CallProgress,
    setup_failures: VecDeque<CmError>,
    accept_failures: VecDeque<CmError>,
    release_failures: VecDeque<CmError>,
    reject_failures: VecDeque<CmError>,
}

impl Default for MockSignalingBuilder {
    fn default() -> Self {
        Self {
            first_handle: 1,
            setup_progress: CallProgress::Connected,
            accept_progress: CallProgress::Connected,
            setup_failures: VecDeque::new(),
            accept_failures: VecDeque::new(),
            release_failures: VecDeque::new(),
            reject_failures: VecDeque::new(),
        }
    }
}

impl MockSignalingBuilder {
    /// Setup connects the call immediately (default).
    #[must_use]
    pub fn setup_connects(mut self) -> Self {
        self.setup_progress = CallProgress::Connected;
        self
    }

    /// Setup reports the call proceeding; the test drives `call_connected`.
    #[must_use]
    pub fn setup_proceeds(mut self) -> Self {
        self.setup_progress = CallProgress::Proceeding;
        self
    }

    /// Accept connects the call immediately (default).
    #[must_use]
    pub fn accept_connects(mut self) -> Self {
        self.accept_progress = CallProgress::Connected;
        self
    }

    #[must_use]
    pub fn accept_proceeds(mut self) -> Self {
        self.accept_progress = CallProgress::Proceeding;
        self
    }

    /// Fail the next setup with `error`.
    #[must_use]
    pub fn fail_setup(mut self, error: CmError) -> Self {
        self.setup_failures.push_back(error);
        self
    }

    /// Fail the next accept with `error`.
    #[must_use]
    pub fn fail_accept(mut self, error: CmError) -> Self {
        self.accept_failures.push_back(error);
        self
    }

    /// Fail the next `times` release attempts with `error`.
    #[must_use]
    pub fn fail_release(mut self, times: usize, error: CmError) -> Self {
        for _ in 0..times {
            self.release_failures.push_back(error.clone());
        }
        self
    }

    /// Fail the next `times` reject attempts with `error`.
    #[must_use]
    pub fn fail_reject(mut self, times: usize, error: CmError) -> Self {
        for _ in 0..times {
            self.reject_failures.push_back(error.clone());
        }
        self
    }

    /// First handle value handed out by setup.
    #[must_use]
    pub fn first_handle(mut self, handle: u64) -> Self {
        self.first_handle = handle;
        self
    }

    /// Build the `MockSignaling`.
    #[must_use]
    pub fn build(self) -> MockSignaling {
        MockSignaling {
            inner: Arc::new(Mutex::new(MockSignalingInner {
                next_handle: self.first_handle,
                setup_progress: self.setup_progress,
                accept_progress: self.accept_progress,
                setup_failures: self.setup_failures,
                accept_failures: self.accept_failures,
                release_failures: self.release_failures,
                reject_failures: self.reject_failures,
                calls: Vec::new(),
                setup_attrs: Vec::new(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_connects_and_logs() {
        let mut signaling = MockSignaling::default();
        let observer = signaling.clone();

        let (handle, progress) = signaling
            .setup(CircuitId::new(0, 1), &AttributeSet::default())
            .unwrap();
        assert_eq!(handle, SignalingHandle(1));
        assert_eq!(progress, CallProgress::Connected);

        signaling.release(handle, &Cause::normal()).unwrap();
        signaling.free(handle);

        assert_eq!(observer.setups(), 1);
        assert_eq!(observer.releases(), 1);
        assert_eq!(observer.frees(), 1);
    }

    #[test]
    fn test_scripted_release_failures_run_out() {
        let mut signaling = MockSignaling::builder()
            .fail_release(2, CmError::OutOfMemory)
            .build();
        let handle = SignalingHandle(9);

        assert_eq!(
            signaling.release(handle, &Cause::normal()),
            Err(CmError::OutOfMemory)
        );
        assert_eq!(
            signaling.release(handle, &Cause::normal()),
            Err(CmError::OutOfMemory)
        );
        assert_eq!(signaling.release(handle, &Cause::normal()), Ok(()));
        assert_eq!(signaling.releases(), 3);
    }
}
