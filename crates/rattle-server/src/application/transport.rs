//! Transport abstraction consumed by the dispatcher and connection manager.
//!
//! A transport is anything that moves whole frames in both directions: a
//! WebSocket (one frame per message), or an in-process channel pair in tests.
//! It is split in two halves so the per-connection read loop can own the
//! reader while handlers, acknowledgments and broadcasts share the writer.
//!
//! Infrastructure implements these traits; the application layer never sees
//! a socket type.

use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer went away or the transport was closed locally.
    #[error("transport closed")]
    Closed,

    /// The underlying stream failed.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// A frame arrived that was larger than the caller allowed.  The frame
    /// was consumed; the transport itself is still usable.
    #[error("frame of {len} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { len: usize, limit: usize },
}

impl TransportError {
    /// Returns `true` if the connection cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::FrameTooLarge { .. })
    }
}

/// The receiving half of a transport.
#[async_trait]
pub trait FrameReader: Send {
    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream.  Frames longer than
    /// `limit` bytes are discarded and reported as
    /// [`TransportError::FrameTooLarge`].
    async fn read_frame(&mut self, limit: usize) -> Result<Option<Vec<u8>>, TransportError>;
}

/// The sending half of a transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameWriter: Send {
    /// Writes one complete frame.
    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Closes the transport.  Further writes fail with
    /// [`TransportError::Closed`].
    async fn close(&mut self);
}

/// A freshly accepted connection, ready to be served.
pub struct Accepted {
    /// Human-readable peer label for logs, e.g. `127.0.0.1:53122`.
    pub peer: String,
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// Source of new connections.
#[async_trait]
pub trait TransportAcceptor: Send {
    /// Waits for the next connection.
    ///
    /// An error means the acceptor itself is broken (listener gone); it is
    /// fatal for the server, not for any single connection.
    async fn accept(&mut self) -> Result<Accepted, TransportError>;
}
