//! Live connection handles and the registry that tracks them.
//!
//! A [`ConnectionHandle`] is the cheap, cloneable face of one connection:
//! an identity, a peer label and the shared writer half.  Handlers, the
//! broadcaster and lifecycle hooks all hold clones; the read loop in the
//! connection manager is the only owner of the reader half.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::application::transport::{FrameWriter, TransportError};

/// Unique identity of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Shared handle to one connection's writer.
///
/// Writes are serialized by an async mutex, so a response, an upload
/// acknowledgment and a broadcast never interleave inside one frame.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Arc<str>,
    writer: Arc<Mutex<Box<dyn FrameWriter>>>,
    closed: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(peer: impl Into<Arc<str>>, writer: Box<dyn FrameWriter>) -> Self {
        Self {
            id: ConnectionId::new(),
            peer: peer.into(),
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// `true` once the connection was closed or a write to it failed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes one already-serialized frame.
    ///
    /// A failed write marks the handle closed so later writers fail fast;
    /// it does not remove the connection from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the handle is already closed,
    /// otherwise whatever the transport reported.
    pub async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut writer = self.writer.lock().await;
        let result = writer.write(frame).await;
        if result.is_err() {
            self.closed.store(true, Ordering::Release);
        }
        result
    }

    /// Closes the underlying transport.  Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.writer.lock().await.close().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Concurrency-safe set of live connections keyed by [`ConnectionId`].
///
/// Broadcasts take a snapshot under the read lock, so they run concurrently
/// with each other; accept and teardown hold the write lock only for the
/// insert or remove itself.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: ConnectionHandle) {
        self.inner.write().await.insert(handle.id(), handle);
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.inner.write().await.remove(&id)
    }

    pub async fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Clones every live handle.  Connections that close after the snapshot
    /// simply fail their write.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
