#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests: malformed streams, resource limits, and misuse of the API

mod common;

use common::{config, eventually, registry, start_server, Blob, Notice, Ping, Pong};
use packet_tcp::core::envelope::EnvelopeCodec;
use packet_tcp::core::serialization::SerializationFormat;
use packet_tcp::{Client, PacketId, ProtocolError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

// ============================================================================
// MALFORMED STREAMS
// ============================================================================

async fn assert_server_hangs_up(raw: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(2), raw.read(&mut buf))
        .await
        .expect("server should close the connection");
    // orderly close or reset, never data
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected read: {read:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_length_below_floor_closes_connection() {
    let (server, _config) = start_server(config()).await;
    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();
    assert!(eventually(|| server.client_count() == 1).await);

    let mut frame = 20u32.to_le_bytes().to_vec();
    frame.extend_from_slice(&[0u8; 20]);
    raw.write_all(&frame).await.unwrap();

    assert_server_hangs_up(&mut raw).await;
    assert!(eventually(|| server.client_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_length_above_max_closes_connection() {
    let (server, _config) = start_server(config()).await;
    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();

    raw.write_all(&(1u32 << 24).to_le_bytes()).await.unwrap();

    assert_server_hangs_up(&mut raw).await;
    assert!(eventually(|| server.client_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_type_id_closes_connection() {
    let (server, _config) = start_server(config()).await;
    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();

    let mut frame = Vec::new();
    frame.extend_from_slice(&48u32.to_le_bytes());
    frame.extend_from_slice(PacketId::from_name("nobody.registered.this").as_bytes());
    frame.extend_from_slice(&[1u8; 16]);
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.extend_from_slice(&[0u8; 12]);
    raw.write_all(&frame).await.unwrap();

    assert_server_hangs_up(&mut raw).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_undecodable_body_closes_connection() {
    let (server, _config) = start_server(config()).await;
    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();

    let body = b"{not json";
    let mut frame = Vec::new();
    frame.extend_from_slice(&48u32.to_le_bytes());
    frame.extend_from_slice(PacketId::from_name("test.Ping").as_bytes());
    frame.extend_from_slice(&[2u8; 16]);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(body);
    frame.resize(4 + 48, 0);
    raw.write_all(&frame).await.unwrap();

    assert_server_hangs_up(&mut raw).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_keeps_serving_after_bad_peer() {
    let (server, config) = start_server(config()).await;
    server
        .on(|ctx, ping: &Ping| {
            ctx.reply(Pong { seq: ping.seq })?;
            Ok(())
        })
        .unwrap();

    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();
    raw.write_all(&1u32.to_le_bytes()).await.unwrap();
    assert_server_hangs_up(&mut raw).await;

    let client = Client::connect(&config, registry()).await.unwrap();
    let pong = client.request::<Ping, Pong>(Ping { seq: 11 }).await.unwrap();
    assert_eq!(pong.map(|p| p.seq), Some(11));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_frames_split_across_writes_are_reassembled() {
    let (server, _config) = start_server(config()).await;
    server
        .on(|ctx, ping: &Ping| {
            ctx.reply(Pong { seq: ping.seq })?;
            Ok(())
        })
        .unwrap();

    let codec = EnvelopeCodec::new(registry(), SerializationFormat::Json, None, 4096);
    let first = codec.encode(&Ping { seq: 1 }, None).unwrap();
    let second = codec.encode(&Ping { seq: 2 }, None).unwrap();
    let mut stream = first.frame.to_vec();
    stream.extend_from_slice(&second.frame);

    let mut raw = TcpStream::connect(server.local_addr()).await.unwrap();
    for chunk in stream.chunks(7) {
        raw.write_all(chunk).await.unwrap();
        raw.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // read both replies back through a framer
    let mut framer = packet_tcp::StreamFramer::new();
    let mut replies = Vec::new();
    let mut buf = [0u8; 512];
    while replies.len() < 2 {
        let n = tokio::time::timeout(Duration::from_secs(2), raw.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "server closed early");
        for frame in framer.resolve(&buf[..n]) {
            replies.push(codec.decode(&frame).unwrap());
        }
    }

    assert_eq!(replies[0].correlation_id, first.correlation_id);
    assert_eq!(replies[1].correlation_id, second.correlation_id);
    assert_eq!(replies[1].payload.downcast_ref::<Pong>(), Some(&Pong { seq: 2 }));
}

// ============================================================================
// RESOURCE LIMITS
// ============================================================================

#[tokio::test]
async fn test_queue_full_then_recovers() {
    let mut base = config();
    base.client.max_outbound_queue_depth = 2;
    let (server, config) = start_server(base).await;
    let received = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    server
        .on(move |_ctx, _notice: &Notice| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let client = Client::connect(&config, registry()).await.unwrap();

    // single-threaded runtime: the send loop cannot drain between these calls
    client.send(Notice { text: "a".into() }).unwrap();
    client.send(Notice { text: "b".into() }).unwrap();
    let overflow = client.send(Notice { text: "c".into() });
    assert!(matches!(overflow, Err(ProtocolError::QueueFull(2))));
    assert_eq!(client.connection().queued(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.connection().queued(), 0);
    client.send(Notice { text: "d".into() }).unwrap();

    assert!(eventually(|| received.load(std::sync::atomic::Ordering::SeqCst) == 3).await);
    assert!(client.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_packet_rejected_before_queueing() {
    let (_server, config) = start_server(config()).await;
    let client = Client::connect(&config, registry()).await.unwrap();

    let result = client.send(Blob {
        data: vec![0xAB; 8 * 1024],
    });
    assert!(matches!(result, Err(ProtocolError::OversizedPacket(_))));
    assert_eq!(client.connection().queued(), 0);
    assert!(client.is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_largest_frame_is_delivered() {
    let (server, config) = start_server(config()).await;
    let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&sizes);
    server
        .on(move |_ctx, blob: &Blob| {
            sink.lock().unwrap().push(blob.data.len());
            Ok(())
        })
        .unwrap();

    let client = Client::connect(&config, registry()).await.unwrap();
    // JSON renders each zero byte as "0," so this stays under the 4096 limit
    client.send(Blob { data: vec![0; 1900] }).unwrap();

    assert!(eventually(|| sizes.lock().unwrap().len() == 1).await);
    assert_eq!(sizes.lock().unwrap()[0], 1900);
}

// ============================================================================
// API MISUSE
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_start_twice_fails() {
    let (server, _config) = start_server(config()).await;
    assert!(server.start().is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unregistered_type_rejected() {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Stranger {
        x: u8,
    }

    let (_server, config) = start_server(config()).await;
    let client = Client::connect(&config, registry()).await.unwrap();
    assert!(matches!(
        client.send(Stranger { x: 1 }),
        Err(ProtocolError::UnregisteredType(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_reply_type_is_unexpected() {
    let (server, config) = start_server(config()).await;
    server
        .on(|ctx, _ping: &Ping| {
            ctx.reply(Notice {
                text: "not a pong".into(),
            })?;
            Ok(())
        })
        .unwrap();

    let client = Client::connect(&config, registry()).await.unwrap();
    let result = client.request::<Ping, Pong>(Ping { seq: 1 }).await;
    assert!(matches!(result, Err(ProtocolError::UnexpectedMessage)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_to_closed_port_fails() {
    let (server, config) = start_server(config()).await;
    server.shutdown().await.unwrap();
    drop(server);

    let result = Client::connect(&config, registry()).await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mismatched_crypto_peers_do_not_talk() {
    let mut server_config = config();
    server_config.transport.crypto = packet_tcp::CryptoConfig::Symmetric {
        key: "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
        iv: "AAAAAAAAAAAAAAAAAAAAAA==".to_string(),
    };
    let (server, config) = start_server(server_config).await;
    let mut plain = config.clone();
    plain.transport.crypto = packet_tcp::CryptoConfig::None;

    let client = Client::connect(&plain, registry()).await.unwrap();
    assert!(eventually(|| server.client_count() == 1).await);
    client.send(Notice { text: "clear".into() }).unwrap();

    tokio::time::timeout(Duration::from_secs(2), client.join())
        .await
        .expect("server should drop a peer it cannot decrypt");
    assert!(eventually(|| server.client_count() == 0).await);
}
