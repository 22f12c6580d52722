//! ATM Connection Manager Library
//!
//! The connection manager sits between endpoints (sockets), per-interface
//! signaling managers and the protocol adapter stack. It owns the lifecycle
//! of every virtual circuit and of the connections multiplexed onto it:
//!
//! - Outbound calls, with reuse of shareable LLC-multiplexed circuits
//! - Listener registration and incoming call matching
//! - Circuit teardown with deferred retries while signaling is short of resources
//! - Demultiplexing of inbound data by LLC header
//!
//! # Architecture
//!
//! ```text
//! Endpoint ──┐                        ┌── SignalingManager (per interface)
//!            ├── ConnectionManagerHandle ── ConnectionManagerActor
//! Adapter ───┘                        └── ProtocolAdapter
//! ```
//!
//! # Modules
//!
//! - [`actor`] - Actor and handle that serialise access to the manager
//! - [`manager`] - The circuit/connection state machine
//! - [`adapter`], [`endpoint`], [`signaling`] - Boundary traits
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types with cause mapping
//! - [`observability`] - Metrics and log targets

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actor;
pub mod adapter;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod manager;
pub mod observability;
pub mod signaling;

pub use actor::ConnectionManagerHandle;
pub use config::Config;
pub use errors::CmError;
pub use manager::{ConnectStatus, ConnectionManager};
