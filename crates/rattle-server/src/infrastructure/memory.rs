//! In-process transport built on unbounded tokio channels.
//!
//! [`memory_listener`] returns a connector/acceptor pair.  Every
//! [`MemoryConnector::connect`] call hands the acceptor a server-side
//! [`Accepted`] and returns the matching [`MemoryClient`].  Frames cross the
//! channel whole, exactly as WebSocket messages do, so the full server stack
//! can be exercised without opening a socket.

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::application::transport::{Accepted, FrameReader, FrameWriter, TransportAcceptor, TransportError};

/// Creates a connected connector/acceptor pair.
pub fn memory_listener() -> (MemoryConnector, MemoryAcceptor) {
    let (tx, rx) = unbounded_channel();
    (MemoryConnector { tx }, MemoryAcceptor { rx })
}

/// Opens client connections.  Clone it to connect from several tasks.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    tx: UnboundedSender<Accepted>,
}

impl MemoryConnector {
    /// Opens a connection labelled `peer`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if the acceptor was dropped.
    pub fn connect(&self, peer: &str) -> Result<MemoryClient, TransportError> {
        let (to_server, from_client) = unbounded_channel();
        let (to_client, from_server) = unbounded_channel();

        self.tx
            .send(Accepted {
                peer: peer.to_string(),
                reader: Box::new(MemoryReader { rx: from_client }),
                writer: Box::new(MemoryWriter { tx: Some(to_client) }),
            })
            .map_err(|_| TransportError::Closed)?;

        Ok(MemoryClient {
            tx: Some(to_server),
            rx: from_server,
        })
    }
}

/// Yields the connections opened through the paired [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    rx: UnboundedReceiver<Accepted>,
}

#[async_trait]
impl TransportAcceptor for MemoryAcceptor {
    async fn accept(&mut self) -> Result<Accepted, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

/// The client end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    tx: Option<UnboundedSender<Vec<u8>>>,
    rx: UnboundedReceiver<Vec<u8>>,
}

impl MemoryClient {
    /// Sends one frame to the server.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] after [`MemoryClient::close`] or once the
    /// server dropped its reader.
    pub fn send(&self, frame: impl AsRef<[u8]>) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(frame.as_ref().to_vec())
            .map_err(|_| TransportError::Closed)
    }

    /// Waits for the next frame from the server; `None` once the server
    /// closed the connection.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Returns a frame that already arrived, if any.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    /// Ends the client-to-server direction; the server sees end of stream.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Stops accepting frames from the server.  Later server writes fail
    /// while the server still considers the connection open.
    pub fn close_read(&mut self) {
        self.rx.close();
    }
}

struct MemoryReader {
    rx: UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self, limit: usize) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.recv().await {
            Some(frame) if frame.len() > limit => Err(TransportError::FrameTooLarge {
                len: frame.len(),
                limit,
            }),
            other => Ok(other),
        }
    }
}

struct MemoryWriter {
    tx: Option<UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::Closed)?
            .send(frame.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
