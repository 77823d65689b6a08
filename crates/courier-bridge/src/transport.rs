//! Duplex text transport to the bridge endpoint.
//!
//! A [`Connector`] opens a [`Link`]: a pair of channels that hide the socket.
//! The session pushes [`Outbound`] frames into one and drains [`Inbound`]
//! lifecycle events from the other.  [`WebSocketConnector`] is the production
//! implementation; tests substitute an in-memory one.

use async_trait::async_trait;
use courier_types::BridgeError;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Something the session wants written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    /// Close the socket and stop the pump.
    Close,
}

/// Something the socket produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(String),
    /// The peer closed the connection, optionally with a reason.
    Closed(Option<String>),
    Error(String),
}

/// An open connection.  Dropping `outbound` closes the socket.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<Inbound>,
}

/// Opens transport links.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`.  `queue_depth` bounds the outbound queue.
    async fn connect(&self, url: &str, queue_depth: usize) -> Result<Link, BridgeError>;
}

/// WebSocket transport built on `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str, queue_depth: usize) -> Result<Link, BridgeError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| BridgeError::Transport(format!("connect to {url}: {e}")))?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(queue_depth.max(1));
        let (in_tx, in_rx) = mpsc::channel::<Inbound>(queue_depth.max(1));
        let peer = url.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    // ── Dashboard → bridge ──────────────────────────────────
                    out = out_rx.recv() => {
                        match out {
                            Some(Outbound::Frame(text)) => {
                                if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                    let _ = in_tx.send(Inbound::Error(format!("send failed: {e}"))).await;
                                    break;
                                }
                            }
                            Some(Outbound::Close) | None => {
                                if let Err(e) = ws_tx.send(Message::Close(None)).await {
                                    debug!(peer = %peer, error = %e, "close frame not delivered");
                                }
                                let _ = ws_tx.close().await;
                                break;
                            }
                        }
                    }
                    // ── Bridge → dashboard ──────────────────────────────────
                    msg = ws_rx.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                if in_tx.send(Inbound::Frame(text.as_str().to_owned())).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame
                                    .map(|f| f.reason.as_str().to_owned())
                                    .filter(|r| !r.is_empty());
                                let _ = in_tx.send(Inbound::Closed(reason)).await;
                                break;
                            }
                            None => {
                                let _ = in_tx.send(Inbound::Closed(None)).await;
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(peer = %peer, error = %e, "websocket error");
                                let _ = in_tx.send(Inbound::Error(e.to_string())).await;
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!(peer = %peer, "websocket pump finished");
        });

        Ok(Link { outbound: out_tx, inbound: in_rx })
    }
}

// ---------------------------------------------------------------------------
// In-memory transport for tests
// ---------------------------------------------------------------------------
