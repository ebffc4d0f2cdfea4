//! Channel actor and manager
//!
//! One actor task per named channel. The actor owns the connection state
//! machine; reconnection is strictly sequential and a disconnect during a
//! pending backoff cancels it, because the backoff sleep and the command
//! channel live in the same `select!`. A stale reconnect can never fire
//! after the channel was deliberately closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, instrument, trace, warn};

use super::backoff::{DEFAULT_BASE_BACKOFF, DEFAULT_MAX_RECONNECT_ATTEMPTS, reconnect_delay};
use super::frame::{Frame, FrameBody};
use super::transport::{Connection, Connector};

/// Per-channel connection options.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub url: String,

    /// Reconnect with exponential backoff after an unclean close
    pub auto_reconnect: bool,

    /// Send periodic heartbeat frames while open
    pub heartbeat: bool,

    pub heartbeat_interval: Duration,
    pub base_backoff: Duration,

    /// Scheduled reconnects per outage before the channel goes terminal
    pub max_reconnect_attempts: u32,
}

impl ChannelOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: true,
            heartbeat: true,
            heartbeat_interval: Duration::from_secs(30),
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Externally observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    /// Terminal until a caller issues `connect` again
    Closed,
}

/// Channel-agnostic event tap for cross-cutting consumers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    StateChanged {
        channel_id: String,
        state: ChannelState,
    },
    Message {
        channel_id: String,
        frame: Frame,
    },
}

/// A frame delivered to a (channel, data-type) handler.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub frame: Frame,
}

enum ChannelCommand {
    /// (Re)connect; a no-op while the channel is open
    Connect,
    Subscribe {
        data_type: String,
        handler: mpsc::UnboundedSender<InboundMessage>,
    },
    Unsubscribe {
        data_type: String,
    },
    Send {
        frame: Frame,
        respond_to: oneshot::Sender<bool>,
    },
    State {
        respond_to: oneshot::Sender<ChannelState>,
    },
    Subscriptions {
        respond_to: oneshot::Sender<Vec<String>>,
    },
    /// Terminal, intentional close
    Disconnect,
}

enum ServeExit {
    /// Transport closed or failed underneath us
    Remote,
    /// Caller asked for a disconnect
    Disconnect,
    /// Command channel gone, tear down
    CommandsClosed,
}

struct ChannelActor {
    channel_id: String,
    options: ChannelOptions,
    connector: Arc<dyn Connector>,
    command_rx: mpsc::Receiver<ChannelCommand>,
    events_tx: broadcast::Sender<ChannelEvent>,
    subscriptions: HashMap<String, mpsc::UnboundedSender<InboundMessage>>,
    state: ChannelState,
    attempts: u32,
}

impl ChannelActor {
    #[instrument(skip(self), fields(channel = %self.channel_id))]
    async fn run(mut self) {
        debug!("starting channel actor");

        'lifecycle: loop {
            self.set_state(ChannelState::Connecting);

            match self.connector.connect(&self.options.url).await {
                Ok(connection) => {
                    self.attempts = 0;
                    self.set_state(ChannelState::Open);

                    match self.serve(connection).await {
                        ServeExit::Remote => {
                            warn!("connection lost");
                            self.set_state(ChannelState::Connecting);
                        }
                        ServeExit::Disconnect => {
                            self.set_state(ChannelState::Closed);
                            break 'lifecycle;
                        }
                        ServeExit::CommandsClosed => {
                            self.set_state(ChannelState::Closed);
                            break 'lifecycle;
                        }
                    }
                }
                Err(e) => {
                    warn!("connect failed: {e:#}");
                }
            }

            if !self.options.auto_reconnect || self.attempts >= self.options.max_reconnect_attempts
            {
                if self.options.auto_reconnect {
                    warn!(
                        "giving up after {} reconnect attempts",
                        self.options.max_reconnect_attempts
                    );
                }
                self.set_state(ChannelState::Closed);
                if !self.wait_for_connect().await {
                    break 'lifecycle;
                }
                self.attempts = 0;
                continue 'lifecycle;
            }

            let delay = reconnect_delay(self.options.base_backoff, self.attempts);
            self.attempts += 1;
            debug!("scheduling reconnect attempt {} in {delay:?}", self.attempts);

            let backoff = tokio::time::sleep(delay);
            tokio::pin!(backoff);

            loop {
                tokio::select! {
                    _ = &mut backoff => continue 'lifecycle,

                    cmd = self.command_rx.recv() => match cmd {
                        Some(ChannelCommand::Disconnect) | None => {
                            // cancels the pending reconnect
                            self.set_state(ChannelState::Closed);
                            break 'lifecycle;
                        }
                        Some(ChannelCommand::Connect) => {
                            self.attempts = 0;
                            continue 'lifecycle;
                        }
                        Some(cmd) => self.handle_offline_command(cmd),
                    }
                }
            }
        }

        debug!("channel actor stopped");
    }

    /// Serve an open connection until it closes or a command ends it.
    async fn serve(&mut self, mut connection: Connection) -> ServeExit {
        if self.send_handshake(&connection).await.is_err() {
            return ServeExit::Remote;
        }

        let mut heartbeat = interval_at(
            Instant::now() + self.options.heartbeat_interval,
            self.options.heartbeat_interval,
        );

        loop {
            tokio::select! {
                inbound = connection.inbound.recv() => match inbound {
                    Some(frame) => self.dispatch(frame),
                    None => return ServeExit::Remote,
                },

                _ = heartbeat.tick(), if self.options.heartbeat => {
                    let frame = Frame::with_timestamp(
                        FrameBody::Heartbeat,
                        Utc::now().timestamp_millis(),
                    );
                    if connection.outbound.send(frame).await.is_err() {
                        return ServeExit::Remote;
                    }
                }

                cmd = self.command_rx.recv() => match cmd {
                    None => return ServeExit::CommandsClosed,

                    Some(ChannelCommand::Disconnect) => {
                        self.set_state(ChannelState::Closing);
                        return ServeExit::Disconnect;
                    }

                    Some(ChannelCommand::Connect) => {
                        trace!("connect while open, ignoring");
                    }

                    Some(ChannelCommand::Subscribe { data_type, handler }) => {
                        self.subscriptions.insert(data_type, handler);
                        if self.send_handshake(&connection).await.is_err() {
                            return ServeExit::Remote;
                        }
                    }

                    Some(ChannelCommand::Unsubscribe { data_type }) => {
                        self.subscriptions.remove(&data_type);
                        if self.send_handshake(&connection).await.is_err() {
                            return ServeExit::Remote;
                        }
                    }

                    Some(ChannelCommand::Send { frame, respond_to }) => {
                        let sent = connection.outbound.send(frame).await.is_ok();
                        let _ = respond_to.send(sent);
                        if !sent {
                            return ServeExit::Remote;
                        }
                    }

                    Some(ChannelCommand::State { respond_to }) => {
                        let _ = respond_to.send(self.state);
                    }

                    Some(ChannelCommand::Subscriptions { respond_to }) => {
                        let _ = respond_to.send(self.subscription_set());
                    }
                }
            }
        }
    }

    /// Handle commands while no connection exists.
    fn handle_offline_command(&mut self, cmd: ChannelCommand) {
        match cmd {
            ChannelCommand::Subscribe { data_type, handler } => {
                // takes effect with the next handshake
                self.subscriptions.insert(data_type, handler);
            }
            ChannelCommand::Unsubscribe { data_type } => {
                self.subscriptions.remove(&data_type);
            }
            ChannelCommand::Send { respond_to, .. } => {
                warn!("dropping send, channel is not open");
                let _ = respond_to.send(false);
            }
            ChannelCommand::State { respond_to } => {
                let _ = respond_to.send(self.state);
            }
            ChannelCommand::Subscriptions { respond_to } => {
                let _ = respond_to.send(self.subscription_set());
            }
            ChannelCommand::Connect | ChannelCommand::Disconnect => {
                // handled by the callers' select loops
            }
        }
    }

    /// Park in terminal state until an explicit connect.
    ///
    /// Returns false if the actor should exit instead.
    async fn wait_for_connect(&mut self) -> bool {
        loop {
            match self.command_rx.recv().await {
                None | Some(ChannelCommand::Disconnect) => return false,
                Some(ChannelCommand::Connect) => return true,
                Some(cmd) => self.handle_offline_command(cmd),
            }
        }
    }

    /// Re-send the subscription set so the server-side filter stays in
    /// sync.
    async fn send_handshake(&self, connection: &Connection) -> Result<(), ()> {
        let frame = Frame::new(FrameBody::Subscribe {
            subscriptions: self.subscription_set(),
        });
        trace!("sending subscription handshake");
        connection.outbound.send(frame).await.map_err(|_| ())
    }

    fn subscription_set(&self) -> Vec<String> {
        let mut set: Vec<String> = self.subscriptions.keys().cloned().collect();
        set.sort();
        set
    }

    fn dispatch(&mut self, frame: Frame) {
        // heartbeat echoes are transport noise
        if frame.body == FrameBody::Heartbeat {
            trace!("heartbeat echo");
            return;
        }

        let data_type = frame.data_type();
        if let Some(handler) = self.subscriptions.get(data_type) {
            let message = InboundMessage {
                channel_id: self.channel_id.clone(),
                frame: frame.clone(),
            };
            if handler.send(message).is_err() {
                trace!("handler for {data_type} dropped, removing subscription");
                self.subscriptions.remove(data_type);
            }
        }

        // cross-cutting consumers see everything except heartbeats
        let _ = self.events_tx.send(ChannelEvent::Message {
            channel_id: self.channel_id.clone(),
            frame,
        });
    }

    fn set_state(&mut self, state: ChannelState) {
        if self.state == state {
            return;
        }
        trace!("state {:?} -> {state:?}", self.state);
        self.state = state;
        let _ = self.events_tx.send(ChannelEvent::StateChanged {
            channel_id: self.channel_id.clone(),
            state,
        });
    }
}

/// Handle for controlling a single channel.
///
/// Cloneable; all methods are commands to the channel's actor task.
#[derive(Clone)]
pub struct ChannelHandle {
    sender: mpsc::Sender<ChannelCommand>,
    pub channel_id: String,
}

impl ChannelHandle {
    /// Register a handler for a data type; re-sends the handshake if the
    /// channel is open.
    pub async fn subscribe(
        &self,
        data_type: impl Into<String>,
        handler: mpsc::UnboundedSender<InboundMessage>,
    ) -> anyhow::Result<()> {
        self.sender
            .send(ChannelCommand::Subscribe {
                data_type: data_type.into(),
                handler,
            })
            .await
            .context("failed to send Subscribe command")
    }

    pub async fn unsubscribe(&self, data_type: impl Into<String>) -> anyhow::Result<()> {
        self.sender
            .send(ChannelCommand::Unsubscribe {
                data_type: data_type.into(),
            })
            .await
            .context("failed to send Unsubscribe command")
    }

    /// Write a frame if the channel is open. Returns false (after a
    /// warning on the actor side) when it is not; queueing is the
    /// caller's responsibility.
    pub async fn send(&self, frame: Frame) -> anyhow::Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Send {
                frame,
                respond_to: tx,
            })
            .await
            .context("failed to send Send command")?;
        rx.await.context("failed to receive send result")
    }

    pub async fn state(&self) -> anyhow::Result<ChannelState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::State { respond_to: tx })
            .await
            .context("failed to send State command")?;
        rx.await.context("failed to receive channel state")
    }

    /// The active subscription set, sorted.
    pub async fn subscriptions(&self) -> anyhow::Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Subscriptions { respond_to: tx })
            .await
            .context("failed to send Subscriptions command")?;
        rx.await.context("failed to receive subscription set")
    }

    /// Re-issue a connect, e.g. after reconnect exhaustion.
    pub async fn reconnect(&self) -> anyhow::Result<()> {
        self.sender
            .send(ChannelCommand::Connect)
            .await
            .context("failed to send Connect command")
    }

    /// Terminal, intentional close. Cancels heartbeats and any pending
    /// reconnect.
    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.sender
            .send(ChannelCommand::Disconnect)
            .await
            .context("failed to send Disconnect command")
    }
}

/// Owns one actor per named channel and the shared event tap.
pub struct ChannelManager {
    connector: Arc<dyn Connector>,
    channels: HashMap<String, ChannelHandle>,
    events_tx: broadcast::Sender<ChannelEvent>,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            connector,
            channels: HashMap::new(),
            events_tx,
        }
    }

    /// Manager backed by the production websocket transport.
    pub fn websocket() -> Self {
        Self::new(Arc::new(super::transport::WebSocketConnector))
    }

    /// Create (or revive) the channel. Idempotent per channel id: a
    /// second connect for a live channel just re-issues a connect
    /// command, which is a no-op while the channel is open.
    pub async fn connect(&mut self, channel_id: &str, options: ChannelOptions) -> ChannelHandle {
        if let Some(handle) = self.channels.get(channel_id) {
            let _ = handle.reconnect().await;
            return handle.clone();
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = ChannelActor {
            channel_id: channel_id.to_string(),
            options,
            connector: Arc::clone(&self.connector),
            command_rx: cmd_rx,
            events_tx: self.events_tx.clone(),
            subscriptions: HashMap::new(),
            state: ChannelState::Closed,
            attempts: 0,
        };

        tokio::spawn(actor.run());

        let handle = ChannelHandle {
            sender: cmd_tx,
            channel_id: channel_id.to_string(),
        };
        self.channels.insert(channel_id.to_string(), handle.clone());
        handle
    }

    pub fn channel(&self, channel_id: &str) -> Option<&ChannelHandle> {
        self.channels.get(channel_id)
    }

    /// Tear the channel down and remove it from the active set.
    pub async fn disconnect(&mut self, channel_id: &str) {
        if let Some(handle) = self.channels.remove(channel_id) {
            let _ = handle.disconnect().await;
        }
    }

    /// Subscribe to the channel-agnostic event tap.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events_tx.subscribe()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.keys().cloned().collect();
        ids.sort();
        ids
    }
}
