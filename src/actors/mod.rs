//! Actor pipeline
//!
//! All mutable monitoring state is owned by single-threaded actor tasks
//! that communicate over channels; no locks are shared across tasks. The
//! channel actors (see [`crate::channel`]) own connection state, the
//! monitor actor owns the registry and the engines. Handles are cheap to
//! clone and safe to use from any task.

pub mod messages;
pub mod monitor;

pub use messages::{AgentCommand, Dispatch, MonitorCommand};
pub use monitor::{MonitorHandle, MonitorSettings};
