//! Actor wrapper around the connection manager.
//!
//! ```text
//! ConnectionManagerActor (one per manager instance)
//! ├── owns ConnectionManager (circuits, connections, listeners)
//! ├── DelayQueue of circuit timers
//! └── call-queue pass scheduling
//! ```
//!
//! Endpoints, signaling managers and adapters talk to it through a cloneable
//! [`ConnectionManagerHandle`]. All communication is via a bounded
//! `tokio::sync::mpsc` mailbox; replies come back on `oneshot` channels.
//!
//! # Modules
//!
//! - [`manager_actor`] - `ConnectionManagerActor` and its handle
//! - [`messages`] - Mailbox message types
//! - [`mailbox`] - Mailbox depth monitoring

pub mod mailbox;
pub mod manager_actor;
pub mod messages;

pub use mailbox::{MailboxLevel, MailboxMonitor};
pub use manager_actor::{ConnectionManagerActor, ConnectionManagerHandle};
pub use messages::*;
