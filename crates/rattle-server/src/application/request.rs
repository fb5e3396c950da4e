//! Per-invocation handler context.

use std::sync::Arc;

use rattle_core::{CompletedUpload, OutgoingMessage};

use crate::application::connection::{ConnectionHandle, ConnectionRegistry};
use crate::application::responder::{self, BroadcastReport, ResponderError};

/// What a handler knows about the frame that invoked it.
///
/// Cloning is cheap: every field is reference counted.  Streaming handlers
/// usually move their `Request` into the spawned task and keep pushing
/// through [`Request::send`] until it fails.
#[derive(Debug, Clone)]
pub struct Request {
    target: Arc<str>,
    connection: ConnectionHandle,
    connections: ConnectionRegistry,
    payload: Arc<[u8]>,
    upload: Option<Arc<CompletedUpload>>,
}

impl Request {
    pub(crate) fn new(
        target: Arc<str>,
        connection: ConnectionHandle,
        connections: ConnectionRegistry,
        payload: &[u8],
        upload: Option<CompletedUpload>,
    ) -> Self {
        Self {
            target,
            connection,
            connections,
            payload: Arc::from(payload),
            upload: upload.map(Arc::new),
        }
    }

    /// The routed method's registered `Controller.Method` name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The connection the frame arrived on.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Every live connection, for handlers that address other peers.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// The raw payload bytes, before decoding.  Empty when the frame had none.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The reassembled upload, when the method was reached through a
    /// `stream` frame.
    pub fn upload(&self) -> Option<&CompletedUpload> {
        self.upload.as_deref()
    }

    /// A message addressed back to the routed method.
    pub fn reply(&self, payload: impl Into<Vec<u8>>) -> OutgoingMessage {
        OutgoingMessage::new(self.target.as_ref(), payload)
    }

    /// A message addressed to any client-side target.
    pub fn new_message(&self, to: impl Into<String>, payload: impl Into<Vec<u8>>) -> OutgoingMessage {
        OutgoingMessage::new(to, payload)
    }

    /// A message to `to` with the empty object `{}` as its payload, for
    /// client functions that take no arguments.
    pub fn empty_message(&self, to: impl Into<String>) -> OutgoingMessage {
        OutgoingMessage::new(to, "{}")
    }

    /// Writes `message` to the originating connection.
    ///
    /// # Errors
    ///
    /// [`ResponderError::ConnectionClosed`] once the connection is gone; a
    /// streaming handler should stop when it sees this.
    pub async fn send(&self, message: OutgoingMessage) -> Result<(), ResponderError> {
        responder::send(&self.connection, &message).await
    }

    /// Writes `message` to every live connection, this one included.
    pub async fn broadcast(&self, message: OutgoingMessage) -> BroadcastReport {
        responder::broadcast(&self.connections, &message).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
