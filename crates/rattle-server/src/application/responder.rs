//! Writing outgoing messages to one connection or to all of them.
//!
//! Both paths serialize with [`OutgoingMessage::to_bytes`], so every frame
//! leaving the server ends in exactly one newline.  Broadcast serializes once
//! and fans the same bytes out concurrently; one slow or dead peer does not
//! hold the others back.

use futures_util::future::join_all;
use rattle_core::{OutgoingMessage, ACK_FRAME};
use thiserror::Error;
use tracing::debug;

use crate::application::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};

/// Errors from writing to a single connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResponderError {
    /// The write failed; the connection is marked closed.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was written to.
    pub delivered: usize,
    /// Connections whose write failed.
    pub skipped: usize,
}

/// Serializes `message` and writes it to `connection`.
///
/// # Errors
///
/// [`ResponderError::ConnectionClosed`] if the write fails.  The connection
/// stays registered until its read loop notices.
pub async fn send(connection: &ConnectionHandle, message: &OutgoingMessage) -> Result<(), ResponderError> {
    write(connection, &message.to_bytes()).await
}

/// Writes the `stream --` acknowledgment that releases the next upload slice.
///
/// # Errors
///
/// [`ResponderError::ConnectionClosed`] if the write fails.
pub async fn acknowledge(connection: &ConnectionHandle) -> Result<(), ResponderError> {
    write(connection, ACK_FRAME).await
}

async fn write(connection: &ConnectionHandle, frame: &[u8]) -> Result<(), ResponderError> {
    connection.write_frame(frame).await.map_err(|e| {
        debug!("write to {} ({}) failed: {e}", connection.id(), connection.peer());
        ResponderError::ConnectionClosed(connection.id())
    })
}

/// Writes `message` to every live connection.
///
/// Connections that fail are counted in [`BroadcastReport::skipped`] and
/// otherwise ignored.
pub async fn broadcast(connections: &ConnectionRegistry, message: &OutgoingMessage) -> BroadcastReport {
    let handles = connections.snapshot().await;
    let frame = message.to_bytes();

    let results = join_all(handles.iter().map(|handle| handle.write_frame(&frame))).await;

    let delivered = results.iter().filter(|r| r.is_ok()).count();
    let report = BroadcastReport {
        delivered,
        skipped: results.len() - delivered,
    };
    debug!(
        "broadcast to {}: delivered {}, skipped {}",
        message.target, report.delivered, report.skipped
    );
    report
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::{MockFrameWriter, TransportError};

    fn accepting_writer(expected: &'static [u8]) -> MockFrameWriter {
        let mut writer = MockFrameWriter::new();
        writer
            .expect_write()
            .withf(move |frame: &[u8]| frame == expected)
            .times(1)
            .returning(|_| Ok(()));
        writer
    }

    #[tokio::test]
    async fn test_send_serializes_with_single_newline() {
        let handle = ConnectionHandle::new("peer", Box::new(accepting_writer(b"Echo.Relay {}\n")));
        let msg = OutgoingMessage::new("Echo.Relay", "{}\n\n");

        tokio_test::assert_ok!(send(&handle, &msg).await);
    }

    #[tokio::test]
    async fn test_acknowledge_writes_ack_frame() {
        let handle = ConnectionHandle::new("peer", Box::new(accepting_writer(b"stream --\n")));
        tokio_test::assert_ok!(acknowledge(&handle).await);
    }

    #[tokio::test]
    async fn test_send_failure_is_connection_closed() {
        // Arrange
        let mut writer = MockFrameWriter::new();
        writer
            .expect_write()
            .returning(|_| Err(TransportError::Io("reset".to_string())));
        let handle = ConnectionHandle::new("peer", Box::new(writer));

        // Act
        let result = send(&handle, &OutgoingMessage::new("A.B", "x")).await;

        // Assert
        assert_eq!(result, Err(ResponderError::ConnectionClosed(handle.id())));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_broadcast_skips_failing_connections() {
        // Arrange: two healthy connections and one whose write fails
        let registry = ConnectionRegistry::new();
        registry
            .insert(ConnectionHandle::new("a", Box::new(accepting_writer(b"=#news hi\n"))))
            .await;
        registry
            .insert(ConnectionHandle::new("b", Box::new(accepting_writer(b"=#news hi\n"))))
            .await;
        let mut broken = MockFrameWriter::new();
        broken.expect_write().returning(|_| Err(TransportError::Closed));
        registry.insert(ConnectionHandle::new("c", Box::new(broken))).await;

        // Act
        let report = broadcast(&registry, &OutgoingMessage::new("=#news", "hi")).await;

        // Assert
        assert_eq!(report, BroadcastReport { delivered: 2, skipped: 1 });
        assert_eq!(registry.len().await, 3, "broadcast never deregisters");
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let report = broadcast(&ConnectionRegistry::new(), &OutgoingMessage::new("A.B", "")).await;
        assert_eq!(report, BroadcastReport::default());
    }
}
