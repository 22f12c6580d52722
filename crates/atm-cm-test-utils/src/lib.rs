//! # ATM CM Test Utilities
//!
//! Shared test utilities for the ATM connection manager.
//!
//! This crate provides mock collaborators and attribute fixtures for
//! driving the manager without a network interface or protocol stack.
//!
//! ## Modules
//!
//! - `mock_signaling` - Scriptable signaling manager with a call log
//! - `mock_adapter` - Protocol adapter that records bindings and submissions
//! - `recording_endpoint` - Endpoint that records every callback
//! - `fixtures` - Attribute set builders and test configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use atm_cm::ConnectionManager;
//! use atm_cm_test_utils::*;
//!
//! let signaling = MockSignaling::builder().setup_connects().build();
//! let adapter = MockAdapter::new();
//! let mut cm = ConnectionManager::new(&test_config(), Box::new(adapter.clone()));
//! cm.attach_interface(TEST_NIF, Box::new(signaling.clone())).unwrap();
//!
//! let endpoint = RecordingEndpoint::new();
//! let attrs = CallAttrs::outbound().with_llc(&[0xaa, 0xaa, 0x03, 0x01], true).build();
//! let (conn, status) = cm.connect(endpoint.clone(), EndpointToken(1), attrs).unwrap();
//! ```

pub mod fixtures;
pub mod mock_adapter;
pub mod mock_signaling;
pub mod recording_endpoint;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_adapter::*;
pub use mock_signaling::*;
pub use recording_endpoint::*;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `atm=debug`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atm=debug".into()),
        )
        .with_test_writer()
        .try_init();
}
