//! Loopback WebSocket server for display clients
//!
//! Every client gets the full push stream (`state`, `show`) and can ask for
//! the latest snapshot at any time. A slow or broken client is dropped on
//! its own; the others and the session worker never wait on it.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::events::{BusEvent, StateSnapshot};

use super::protocol::{Message, Request, MAX_MESSAGE_LEN};

/// Upper bound for a single write to one client, and for the handshake
const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a single client was dropped
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("client write timed out")]
    Timeout,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bus server handling client connections
pub struct Server {
    listener: TcpListener,
    events: broadcast::Sender<BusEvent>,
    snapshots: watch::Receiver<StateSnapshot>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the listener
    ///
    /// `events` is only used to subscribe new clients; `snapshots` answers
    /// `get_state`.
    pub async fn bind(
        addr: SocketAddr,
        events: broadcast::Sender<BusEvent>,
        snapshots: watch::Receiver<StateSnapshot>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound address")?;

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(url = %format!("ws://{local_addr}"), "bus server listening");

        Ok(Self {
            listener,
            events,
            snapshots,
            shutdown_tx,
        })
    }

    #[cfg(test)]
    fn local_addr(&self) -> SocketAddr {
        self.listener
            .local_addr()
            .expect("bound listener has an address")
    }

    /// Run the server, accepting connections until shutdown
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_client(stream, peer),
                    Err(e) => {
                        error!(?e, "accept error");
                    }
                },
                _ = shutdown_rx.recv() => {
                    debug!("accept loop stopping");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_client(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, ?e, "failed to set TCP_NODELAY");
        }
        // Subscribe before spawning so nothing published after accept is missed
        let events = self.events.subscribe();
        let snapshots = self.snapshots.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        debug!(%peer, "connection accepted");

        tokio::spawn(async move {
            tokio::select! {
                result = Self::handle_client(stream, peer, events, snapshots) => {
                    match result {
                        Ok(()) => info!(%peer, "client disconnected"),
                        Err(e) => warn!(%peer, error = %e, "dropping client"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!(%peer, "client handler shutting down");
                }
            }
        });
    }

    /// Handle a single client connection
    async fn handle_client(
        stream: TcpStream,
        peer: SocketAddr,
        mut events: broadcast::Receiver<BusEvent>,
        snapshots: watch::Receiver<StateSnapshot>,
    ) -> Result<(), ClientError> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_MESSAGE_LEN);
        config.max_frame_size = Some(MAX_MESSAGE_LEN);

        let ws = timeout(
            SEND_TIMEOUT,
            tokio_tungstenite::accept_async_with_config(stream, Some(config)),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        info!(%peer, "client connected");

        let (mut sink, mut incoming) = ws.split();

        // `next()` on the websocket stream is cancel-safe: partial frames
        // stay buffered inside it when a push wins the select
        loop {
            tokio::select! {
                frame = incoming.next() => {
                    let reply = match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<Request>(&text) {
                                Ok(request) => {
                                    debug!(?request, "received request");
                                    Self::process_request(request, &snapshots)
                                }
                                Err(e) => {
                                    debug!(error = %e, "rejecting request");
                                    Message::error("bad_request", e.to_string())
                                }
                            }
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            Message::error("bad_request", "expected a text frame")
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                        // Ping/pong are answered by the protocol layer
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                    };
                    send_message(&mut sink, &reply).await?;
                }
                event = events.recv() => match event {
                    Ok(event) => send_message(&mut sink, &Message::from(&event)).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client lagged, skipping missed events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
            }
        }
    }

    fn process_request(request: Request, snapshots: &watch::Receiver<StateSnapshot>) -> Message {
        match request {
            Request::Ping => Message::Pong,
            Request::GetState => Message::State(snapshots.borrow().clone()),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("bus server shutdown complete");
    }
}

/// Send one JSON message as a text frame
async fn send_message<S>(sink: &mut S, msg: &Message) -> Result<(), ClientError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let json = serde_json::to_string(msg)?;
    timeout(SEND_TIMEOUT, sink.send(WsMessage::text(json)))
        .await
        .map_err(|_| ClientError::Timeout)??;
    Ok(())
}
