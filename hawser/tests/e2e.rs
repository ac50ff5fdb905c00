//! End-to-end tests over real TCP sockets.
//!
//! These tests exercise the endpoint lifecycle including:
//! - Server bind/accept and client connect against loopback
//! - Invoke round trips across a real socket
//! - Chunked payload integrity and ordering
//! - Router eviction when a peer disconnects

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use hawser::{ConnectionRouter, IpcClient, IpcServer, LifecycleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
enum MsgKind {
    Ping,
    Chunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PayloadChunk {
    seq: u32,
    bytes: Vec<u8>,
}

/// Bind a server on an ephemeral loopback port and connect a client to it.
async fn connected_endpoints() -> (
    Arc<IpcServer<MsgKind, hawser::TcpNetworkProvider, hawser::JsonCodec>>,
    IpcClient<MsgKind, hawser::TcpNetworkProvider, hawser::JsonCodec>,
) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();

    let server: Arc<IpcServer<MsgKind, _, _>> = Arc::new(IpcServer::tcp());
    server
        .initialize("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = server.local_addr().expect("bound listener has an address");

    let accept = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.wait_for_connection(CancellationToken::new()).await }
    });

    let client: IpcClient<MsgKind, _, _> = IpcClient::tcp();
    client.initialize(addr);
    assert!(client.connect(Duration::from_secs(5)).await);
    assert!(accept.await.expect("accept task"));

    (server, client)
}

/// Poll `probe` every 10ms until it holds, failing after `limit`.
async fn wait_until(what: &str, limit: Duration, probe: impl Fn() -> bool) {
    let deadline = Instant::now() + limit;
    while !probe() {
        assert!(Instant::now() < deadline, "timed out waiting until {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test the full lifecycle walk: bind, accept, connect, read, invoke, close.
#[tokio::test]
async fn test_client_server_lifecycle_round_trip() {
    let (server, client) = connected_endpoints().await;
    assert_eq!(server.state(), LifecycleState::Connected);
    assert_eq!(client.state(), LifecycleState::Connected);

    server
        .connection()
        .on_invoke(MsgKind::Ping, |text: String| async move {
            format!("{text} Pong")
        });
    server.begin_read(CancellationToken::new());
    client.begin_read(CancellationToken::new());
    assert_eq!(server.state(), LifecycleState::ReadActive);
    assert_eq!(client.state(), LifecycleState::ReadActive);

    let reply: String = client
        .connection()
        .invoke(MsgKind::Ping, &"hello".to_string(), Duration::from_secs(5))
        .await
        .expect("invoke should resolve");
    assert_eq!(reply, "hello Pong");

    client.close().await;
    server.close().await;
    assert_eq!(client.state(), LifecycleState::Closed);
    assert_eq!(server.state(), LifecycleState::Closed);
}

/// Test that both directions work on one socket: the server can invoke the
/// client just as the client invokes the server.
#[tokio::test]
async fn test_connection_is_symmetric() {
    let (server, client) = connected_endpoints().await;

    client
        .connection()
        .on_invoke(MsgKind::Ping, |n: u32| async move { n + 1 });
    server
        .connection()
        .on_invoke(MsgKind::Ping, |n: u32| async move { n * 2 });
    server.begin_read(CancellationToken::new());
    client.begin_read(CancellationToken::new());

    let from_client: u32 = client
        .connection()
        .invoke(MsgKind::Ping, &10u32, Duration::from_secs(5))
        .await
        .expect("client invoke");
    let from_server: u32 = server
        .connection()
        .invoke(MsgKind::Ping, &10u32, Duration::from_secs(5))
        .await
        .expect("server invoke");

    assert_eq!(from_client, 20);
    assert_eq!(from_server, 11);
}

/// Test that a 2MB payload sent as 100 sequential chunks arrives intact,
/// byte for byte and in order.
#[tokio::test]
async fn test_chunked_payload_arrives_intact_and_in_order() {
    let (server, client) = connected_endpoints().await;

    let received = Arc::new(Mutex::new(Vec::<PayloadChunk>::new()));
    let sink = Arc::clone(&received);
    server
        .connection()
        .on(MsgKind::Chunk, move |chunk: PayloadChunk| {
            sink.lock().unwrap().push(chunk);
        });
    server.begin_read(CancellationToken::new());
    client.begin_read(CancellationToken::new());

    // 2MB of patterned bytes, split into 100 chunks.
    let payload: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let chunk_len = payload.len().div_ceil(100);
    let connection = client.connection();
    for (seq, bytes) in payload.chunks(chunk_len).enumerate() {
        connection
            .send(
                MsgKind::Chunk,
                &PayloadChunk {
                    seq: seq as u32,
                    bytes: bytes.to_vec(),
                },
                Duration::from_secs(5),
            )
            .await
            .expect("chunk send should succeed");
    }

    let received_probe = Arc::clone(&received);
    wait_until("all 100 chunks received", Duration::from_secs(30), move || {
        received_probe.lock().unwrap().len() == 100
    })
    .await;

    let received = received.lock().unwrap();
    let sequence: Vec<u32> = received.iter().map(|c| c.seq).collect();
    assert_eq!(sequence, (0..100).collect::<Vec<u32>>(), "chunks out of order");
    let reassembled: Vec<u8> = received.iter().flat_map(|c| c.bytes.clone()).collect();
    assert_eq!(reassembled, payload, "payload corrupted in transit");
}

/// Test that the router evicts a registered connection when its peer
/// disconnects and the read loop ends.
#[tokio::test]
async fn test_router_evicts_disconnected_peer() {
    let (server, client) = connected_endpoints().await;

    let router = Arc::new(ConnectionRouter::new());
    assert!(router.register("session", server.connection()));
    assert_eq!(router.len(), 1);
    assert!(router.lookup("session").is_some());

    server.begin_read(CancellationToken::new());
    client.close().await;

    let router_probe = Arc::clone(&router);
    wait_until("router evicts the session", Duration::from_secs(2), move || {
        router_probe.is_empty()
    })
    .await;
    assert!(router.lookup("session").is_none());
}
