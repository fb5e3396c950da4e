//! Integration tests for chunked uploads through a running server.
//!
//! # The upload flow
//!
//! ```text
//! Client                                   Server
//! ──────                                   ──────
//! Main.File stream {"name":..,"size":..,"slicesize":..}
//!                                          ◄── stream --
//! <slice 1>
//! Main.File chunk                          ◄── stream --
//! <slice 2>
//! ...
//! <last slice>
//! Main.File finish                         handler runs with the whole payload
//! ```
//!
//! The client here follows the flow control strictly: it waits for each
//! acknowledgment before sending the next slice.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rattle_core::{encode_envelope, CompletedUpload, Envelope, Kind, TargetName, ACK_FRAME};
use rattle_server::application::{HandlerSet, Request};
use rattle_server::domain::ServerConfig;
use rattle_server::infrastructure::{memory_listener, MemoryClient, MemoryConnector, RattleServer};

const WAIT: Duration = Duration::from_secs(2);

type Received = Arc<Mutex<Vec<(String, CompletedUpload)>>>;

/// Starts a server whose `Main.File` records every completed upload along
/// with the header payload, and answers `Main.Ping` so tests can tell the
/// upload handler has already run.
fn start(config: ServerConfig) -> (MemoryConnector, Received) {
    let received: Received = Arc::default();
    let sink = Arc::clone(&received);

    let mut server = RattleServer::new(config);
    server.register_controller(
        "Main",
        HandlerSet::new()
            .responding("File", move |_: serde_json::Value, req: Request| {
                let sink = Arc::clone(&sink);
                async move {
                    let upload = req.upload()?.clone();
                    let payload = String::from_utf8_lossy(req.payload()).into_owned();
                    sink.lock().unwrap().push((payload, upload));
                    Some(req.reply("saved"))
                }
            })
            .responding("Ping", |_: (), req: Request| async move { Some(req.reply("pong")) }),
    );

    let (connector, acceptor) = memory_listener();
    tokio::spawn(server.serve(acceptor));
    (connector, received)
}

async fn recv(client: &mut MemoryClient) -> Vec<u8> {
    tokio::time::timeout(WAIT, client.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
}

fn file_target() -> TargetName {
    TargetName::parse("Main.File").unwrap()
}

fn header(payload: Option<&[u8]>, name: &str, size: usize, slice_size: usize) -> Vec<u8> {
    let meta = format!("{{\"name\":\"{name}\",\"size\":{size},\"slicesize\":{slice_size}}}");
    encode_envelope(&Envelope::stream(file_target(), payload, meta))
}

fn control(kind: Kind) -> Vec<u8> {
    encode_envelope(&Envelope::control(file_target(), kind))
}

/// Uploads `data` in `slice_size` slices and returns how many
/// acknowledgments the server sent.
async fn upload(client: &mut MemoryClient, data: &[u8], slice_size: usize) -> usize {
    client.send(header(None, "blob.bin", data.len(), slice_size)).unwrap();
    assert_eq!(recv(client).await, ACK_FRAME.to_vec());
    let mut acks = 1;

    let slices: Vec<&[u8]> = data.chunks(slice_size).collect();
    for (i, slice) in slices.iter().enumerate() {
        client.send(slice).unwrap();
        if i + 1 < slices.len() {
            client.send(control(Kind::Chunk)).unwrap();
            assert_eq!(recv(client).await, ACK_FRAME.to_vec());
            acks += 1;
        }
    }
    client.send(control(Kind::Finish)).unwrap();
    acks
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_abcdef_upload_reaches_handler() {
    // Arrange
    let (connector, received) = start(ServerConfig::default());
    let mut client = connector.connect("client").unwrap();

    // Act
    client
        .send(header(Some(b"{\"dir\":\"docs\"}"), "a.txt", 6, 3))
        .unwrap();
    assert_eq!(recv(&mut client).await, b"stream --\n".to_vec());
    client.send("abc").unwrap();
    client.send(control(Kind::Chunk)).unwrap();
    assert_eq!(recv(&mut client).await, b"stream --\n".to_vec());
    client.send("def").unwrap();
    client.send(control(Kind::Finish)).unwrap();

    // Assert: the reply proves no acknowledgment followed `finish`
    assert_eq!(recv(&mut client).await, b"Main.File saved\n".to_vec());
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, "{\"dir\":\"docs\"}");
    assert_eq!(received[0].1.name, "a.txt");
    assert_eq!(received[0].1.declared_size, 6);
    assert_eq!(received[0].1.data, b"abcdef".to_vec());
}

#[tokio::test]
async fn test_reassembly_is_independent_of_slice_size() {
    let data: Vec<u8> = (0..10_000u32).map(|i| b'a' + (i % 26) as u8).collect();

    for slice_size in [1, 17, 4096] {
        // Arrange
        let (connector, received) = start(ServerConfig::default());
        let mut client = connector.connect("client").unwrap();

        // Act
        let acks = upload(&mut client, &data, slice_size).await;

        // Assert
        assert_eq!(recv(&mut client).await, b"Main.File saved\n".to_vec());
        assert_eq!(acks, data.len().div_ceil(slice_size), "slice size {slice_size}");
        assert_eq!(received.lock().unwrap()[0].1.data, data, "slice size {slice_size}");
    }
}

#[tokio::test]
async fn test_oversized_slice_aborts_upload_but_keeps_connection() {
    // Arrange
    let (connector, received) = start(ServerConfig::default());
    let mut client = connector.connect("client").unwrap();
    client.send(header(None, "a.txt", 6, 3)).unwrap();
    assert_eq!(recv(&mut client).await, ACK_FRAME.to_vec());

    // Act
    client.send("abcd").unwrap();
    client.send("Main.Ping data").unwrap();

    // Assert
    assert_eq!(recv(&mut client).await, b"Main.Ping pong\n".to_vec());
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_limit_is_enforced() {
    // Arrange
    let (connector, received) = start(ServerConfig {
        max_upload_bytes: 4,
        ..ServerConfig::default()
    });
    let mut client = connector.connect("client").unwrap();
    client.send(header(None, "a.txt", 6, 3)).unwrap();
    assert_eq!(recv(&mut client).await, ACK_FRAME.to_vec());

    // Act
    client.send("abc").unwrap();
    client.send(control(Kind::Chunk)).unwrap();
    assert_eq!(recv(&mut client).await, ACK_FRAME.to_vec());
    client.send("def").unwrap();
    client.send("Main.Ping data").unwrap();

    // Assert
    assert_eq!(recv(&mut client).await, b"Main.Ping pong\n".to_vec());
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_disconnect_mid_upload_discards_partial_payload() {
    // Arrange
    let (connector, received) = start(ServerConfig::default());
    let mut client = connector.connect("client").unwrap();
    client.send(header(None, "a.txt", 6, 3)).unwrap();
    assert_eq!(recv(&mut client).await, ACK_FRAME.to_vec());

    // Act
    client.send("abc").unwrap();
    client.close();

    // Assert: the server tears the connection down without running the handler
    let end = tokio::time::timeout(WAIT, client.recv()).await.unwrap();
    assert_eq!(end, None);
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_header_gets_no_acknowledgment() {
    let (connector, _) = start(ServerConfig::default());
    let mut client = connector.connect("client").unwrap();

    client
        .send(encode_envelope(&Envelope::stream(file_target(), None, "{\"name\":\"a\"}")))
        .unwrap();
    client.send("Main.Ping data").unwrap();

    assert_eq!(recv(&mut client).await, b"Main.Ping pong\n".to_vec());
}
