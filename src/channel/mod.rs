//! Reconnecting multiplexed channel manager
//!
//! Each named channel owns one transport connection and runs as an
//! independent async task. The task handles connect, exponential-backoff
//! reconnect, heartbeats and the subscription handshake, routes inbound
//! frames to registered handlers and mirrors everything onto a
//! channel-agnostic event tap for cross-cutting consumers.
//!
//! ## Message Flow
//!
//! ```text
//! transport ──frames──▶ channel actor ──▶ (channel, data-type) handler
//!     ▲                      │       └──▶ broadcast event tap
//!     └──── heartbeat / handshake / send ┘
//! ```

pub mod backoff;
pub mod frame;
pub mod manager;
pub mod transport;

pub use frame::{EntityUpdate, Frame, FrameBody};
pub use manager::{
    ChannelEvent, ChannelHandle, ChannelManager, ChannelOptions, ChannelState, InboundMessage,
};
pub use transport::{Connection, Connector, InProcessConnector, InProcessPeer, WebSocketConnector};
