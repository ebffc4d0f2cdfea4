//! Channel transports
//!
//! A transport hands the channel actor a [`Connection`]: an outbound frame
//! sink and an inbound frame stream. Frames are validated exactly once
//! here, at the boundary; malformed payloads are logged and dropped and
//! never reach a handler.
//!
//! Two connectors exist:
//! - [`WebSocketConnector`] for production use
//! - [`InProcessConnector`], an in-memory loopback useful for testing
//!   without a websocket server

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use super::frame::Frame;

/// An established bidirectional frame stream.
///
/// Dropping the connection closes the outbound side; the inbound receiver
/// yielding `None` means the transport closed (cleanly or not).
pub struct Connection {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

/// Seam between the channel actor and the actual transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> anyhow::Result<Connection>;
}

/// Parse one wire message into a frame.
///
/// Anything that does not match a known frame tag is logged and dropped.
pub fn parse_frame(text: &str) -> Option<Frame> {
    match serde_json::from_str::<Frame>(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!("dropping malformed frame: {e}");
            None
        }
    }
}

/// Production websocket transport (tokio-tungstenite).
#[derive(Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<Connection> {
        debug!("connecting to {url}");

        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(64);

        // write pump: frames from the actor onto the socket
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to serialize outbound frame: {e}");
                        continue;
                    }
                };
                if write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        // read pump: socket messages into validated frames
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(frame) = parse_frame(&text) {
                            if in_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        trace!("transport closed by server");
                        break;
                    }
                    Ok(_) => {
                        // pings/pongs/binary are transport noise
                    }
                    Err(e) => {
                        warn!("transport error: {e}");
                        break;
                    }
                }
            }
            // dropping in_tx signals the close to the actor
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// The far end of an in-process connection.
///
/// Dropping the peer (or just `to_channel`) simulates an unclean close.
pub struct InProcessPeer {
    pub url: String,

    /// Feed inbound frames to the channel
    pub to_channel: mpsc::Sender<Frame>,

    /// Observe frames the channel sent (handshakes, heartbeats, commands)
    pub from_channel: mpsc::Receiver<Frame>,
}

/// In-memory transport without a websocket server.
///
/// Every successful `connect` emits an [`InProcessPeer`] on the receiver
/// returned by [`InProcessConnector::new`]. `fail_next` makes the next n
/// connect attempts fail, which is how reconnect behavior is exercised.
pub struct InProcessConnector {
    peers: mpsc::UnboundedSender<InProcessPeer>,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl InProcessConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<InProcessPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                peers,
                failures: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
            }),
            peer_rx,
        )
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Total connect attempts observed so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("connection refused (scripted failure)");
        }

        let (out_tx, out_rx) = mpsc::channel::<Frame>(64);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(64);

        self.peers
            .send(InProcessPeer {
                url: url.to_string(),
                to_channel: in_tx,
                from_channel: out_rx,
            })
            .map_err(|_| anyhow::anyhow!("peer receiver dropped"))?;

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
