//! WebSocket transport for the active conversation view.
//!
//! A [`SocketConnector`] opens a [`SocketHandle`]: an outbound frame queue
//! and an inbound event queue, pumped by two background tasks. The
//! [`ChatTransport`] wrapper owns at most one handle and tracks
//! [`ConnectionStatus`] for the UI.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::chat_types::{parse_server_frame, ClientFrame, ServerEvent};
use crate::error::{ExoError, Result};

/// Connection state shown in the conversation header.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Dropped; one reconnect attempt is scheduled.
    Reconnecting,
    /// Gave up; sends go over REST.
    Disconnected,
    Closed,
}

/// Events surfaced by an open socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Frame(ServerEvent),
    Closed(Option<String>),
}

/// One open socket. Dropping it shuts the pump tasks down.
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    inbound: mpsc::UnboundedReceiver<SocketEvent>,
    shutdown: CancellationToken,
}

impl SocketHandle {
    /// Build a handle over existing channels; the socket tasks (or a test
    /// double) sit on the other ends.
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<ClientFrame>,
        inbound: mpsc::UnboundedReceiver<SocketEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound,
            shutdown,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.outbound.is_closed()
    }

    pub fn send(&self, frame: ClientFrame) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| ExoError::TransportError("Socket is closed".to_string()))
    }

    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.inbound.recv().await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Opens sockets for the signed-in user.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self) -> Result<SocketHandle>;
}

/// Real connector: `ws(s)://<host>/<prefix>/ws?token=...`.
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// The token travels as a query parameter; browsers and most WS stacks
    /// cannot set headers on the handshake.
    pub fn new(base_url: &Url, ws_path: &str, token: &str) -> Result<Self> {
        let mut url = base_url
            .join(ws_path)
            .map_err(|e| ExoError::ConfigError(format!("Build socket URL: {}", e)))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ExoError::ConfigError(format!("Cannot use {} for a socket", url)))?;
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self) -> Result<SocketHandle> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ExoError::TransportError(format!("Socket connect: {}", e)))?;
        log::info!("Chat socket connected to {}", self.url.path());

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketEvent>();
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(e) => {
                                log::warn!("Dropping unserializable frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(WsMessage::text(text)).await {
                            log::warn!("Socket write failed: {}", e);
                            writer_shutdown.cancel();
                            break;
                        }
                    }
                }
            }
        });

        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break None,
                    incoming = source.next() => match incoming {
                        Some(Ok(WsMessage::Text(text))) => match parse_server_frame(text.as_str()) {
                            Ok(event) => {
                                log::debug!("Socket frame: {:?}", event);
                                if in_tx.send(SocketEvent::Frame(event)).is_err() {
                                    break None;
                                }
                            }
                            Err(e) => log::warn!("Ignoring unrecognised frame: {}", e),
                        },
                        Some(Ok(WsMessage::Close(frame))) => {
                            break Some(frame.map(|f| f.reason.to_string()).unwrap_or_default());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break Some("stream ended".to_string()),
                    }
                }
            };
            reader_shutdown.cancel();
            let _ = in_tx.send(SocketEvent::Closed(reason));
        });

        Ok(SocketHandle::from_channels(out_tx, in_rx, shutdown))
    }
}

/// Owns the socket for one conversation view.
pub struct ChatTransport {
    connector: std::sync::Arc<dyn SocketConnector>,
    handle: Option<SocketHandle>,
    status: ConnectionStatus,
}

impl ChatTransport {
    pub fn new(connector: std::sync::Arc<dyn SocketConnector>) -> Self {
        Self {
            connector,
            handle: None,
            status: ConnectionStatus::Closed,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    pub fn is_open(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_open())
    }

    /// Open the socket. On failure the transport stays closed and callers
    /// fall back to REST.
    pub async fn connect(&mut self) -> Result<()> {
        self.close_handle();
        self.status = ConnectionStatus::Connecting;
        match self.connector.connect().await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.status = ConnectionStatus::Connected;
                Ok(())
            }
            Err(e) => {
                self.status = ConnectionStatus::Disconnected;
                Err(e)
            }
        }
    }

    /// Push a frame if the socket is open.
    pub fn send(&self, frame: ClientFrame) -> Result<()> {
        match &self.handle {
            Some(handle) if handle.is_open() => handle.send(frame),
            _ => Err(ExoError::TransportError("Socket is not open".to_string())),
        }
    }

    /// Next inbound event. Pending forever while no socket is held.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        match self.handle.as_mut() {
            Some(handle) => handle.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Drop the current socket after it reported closure.
    pub fn detach(&mut self) {
        self.close_handle();
    }

    /// Tear down. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.close_handle();
        self.status = ConnectionStatus::Closed;
    }

    fn close_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}
