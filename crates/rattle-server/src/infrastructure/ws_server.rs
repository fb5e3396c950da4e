//! WebSocket transport: listener, handshake and frame adapters.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting TCP connections in a background task.
//! 3. Upgrading each one to a WebSocket in its own task, rejecting upgrades
//!    aimed at any path other than `ws_path` with `404 Not Found`.
//! 4. Handing finished connections to the server through
//!    [`TransportAcceptor::accept`].
//!
//! One WebSocket message is one frame.  Text and binary messages are both
//! accepted; outgoing frames are sent as text when they are valid UTF-8 (the
//! usual case for a browser client) and as binary otherwise.
//!
//! # Portability
//!
//! Uses only `tokio::net` APIs, which behave the same on Windows, Linux and
//! macOS.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::application::transport::{Accepted, FrameReader, FrameWriter, TransportAcceptor, TransportError};
use crate::domain::ServerConfig;

/// Finished handshakes waiting for the server to pick them up.
const ACCEPT_BACKLOG: usize = 64;

/// Pause after a failed `accept()` (e.g. out of file descriptors) before
/// trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

type WsStream = WebSocketStream<TcpStream>;

/// Per-listener handshake settings shared by every handshake task.
#[derive(Debug)]
struct HandshakeSettings {
    ws_path: String,
    max_message_bytes: usize,
}

impl HandshakeSettings {
    fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_bytes);
        config.max_frame_size = Some(self.max_message_bytes);
        config
    }

    fn path_allowed(&self, path: &str) -> bool {
        self.ws_path.is_empty() || path == self.ws_path
    }
}

// ── Acceptor ──────────────────────────────────────────────────────────────────

/// Accepts WebSocket connections on a TCP listener.
///
/// Dropping the acceptor stops the background accept loop.
#[derive(Debug)]
pub struct WsAcceptor {
    incoming: mpsc::Receiver<Accepted>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl WsAcceptor {
    /// Binds `config.bind_addr` and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound (port in use, no
    /// permission) or its local address cannot be read.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("failed to read the listener's local address")?;

        info!("Rattle listening on ws://{local_addr}{}", config.ws_path);

        let settings = Arc::new(HandshakeSettings {
            ws_path: config.ws_path.clone(),
            // Upload slices travel as single messages and may exceed the
            // ordinary frame limit; the reader enforces the real bound.
            max_message_bytes: config.max_frame_bytes.max(config.max_upload_bytes),
        });
        let (tx, incoming) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(listener, settings, tx));

        Ok(Self {
            incoming,
            local_addr,
            accept_task,
        })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl TransportAcceptor for WsAcceptor {
    async fn accept(&mut self) -> Result<Accepted, TransportError> {
        self.incoming.recv().await.ok_or(TransportError::Closed)
    }
}

impl Drop for WsAcceptor {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, settings: Arc<HandshakeSettings>, tx: mpsc::Sender<Accepted>) {
    while !tx.is_closed() {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!("TCP connection from {peer_addr}");
                let settings = Arc::clone(&settings);
                let tx = tx.clone();

                // The handshake runs in its own task so one slow client never
                // holds up the next accept.
                tokio::spawn(async move {
                    match handshake(stream, peer_addr, &settings).await {
                        Ok(accepted) => {
                            if tx.send(accepted).await.is_err() {
                                debug!("acceptor dropped; discarding connection from {peer_addr}");
                            }
                        }
                        Err(e) => warn!("WebSocket handshake with {peer_addr} failed: {e}"),
                    }
                });
            }
            Err(e) => {
                error!("accept error: {e}");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

async fn handshake(
    stream: TcpStream,
    peer_addr: SocketAddr,
    settings: &HandshakeSettings,
) -> Result<Accepted, WsError> {
    let check_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let path = request.uri().path();
        if settings.path_allowed(path) {
            Ok(response)
        } else {
            debug!("rejecting upgrade from {peer_addr} for path {path}");
            let mut rejection = ErrorResponse::new(Some(format!("no WebSocket endpoint at {path}")));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws = accept_hdr_async_with_config(stream, check_path, Some(settings.websocket_config())).await?;
    info!("WebSocket session established: {peer_addr}");

    let (sink, stream) = ws.split();
    Ok(Accepted {
        peer: peer_addr.to_string(),
        reader: Box::new(WsFrameReader { stream }),
        writer: Box::new(WsFrameWriter { sink }),
    })
}

// ── Frame adapters ────────────────────────────────────────────────────────────

/// Reading half of a WebSocket connection.
pub struct WsFrameReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn read_frame(&mut self, limit: usize) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            };

            let frame = match message {
                WsMessage::Text(text) => text.into_bytes(),
                WsMessage::Binary(bytes) => bytes,
                WsMessage::Close(_) => return Ok(None),
                // tungstenite answers pings on its own.
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };

            if frame.len() > limit {
                return Err(TransportError::FrameTooLarge {
                    len: frame.len(),
                    limit,
                });
            }
            return Ok(Some(frame));
        }
    }
}

/// Writing half of a WebSocket connection.
pub struct WsFrameWriter {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let message = match std::str::from_utf8(frame) {
            Ok(text) => WsMessage::Text(text.to_owned()),
            Err(_) => WsMessage::Binary(frame.to_vec()),
        };
        self.sink.send(message).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            other => TransportError::Io(other.to_string()),
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("WebSocket close failed: {e}");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
