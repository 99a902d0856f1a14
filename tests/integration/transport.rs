//! Transport and peer behaviour over real TCP connections.

use relay_net::{PeerStats, SocketMode, Transport};

use crate::*;

/// N bytes in, N bytes out, one message counted on each side.
#[tokio::test]
async fn test_tcp_round_trip_counts_both_sides() -> Result<()> {
    let (server, client) = connected_pair("server", "client").await?;
    let message = "x".repeat(700);

    assert!(client.send_message(&message).await);
    let received = server.receive_message().await.context("server got nothing")?;
    assert_eq!(received, message);

    assert_eq!(
        client.stats(),
        PeerStats {
            messages_sent: 1,
            bytes_sent: 700,
            ..PeerStats::default()
        }
    );
    assert_eq!(
        server.stats(),
        PeerStats {
            messages_received: 1,
            bytes_received: 700,
            ..PeerStats::default()
        }
    );
    Ok(())
}

/// A fresh peer has zero counters, no latency and no connection.
#[tokio::test]
async fn test_fresh_peer_is_idle() {
    let peer = Peer::new("fresh", "10.0.0.1", 8082);
    assert_eq!(peer.stats(), PeerStats::default());
    assert!(peer.latency().is_none());
    assert!(!peer.is_connected());
    assert!(peer.mode().is_none());
}

/// Request then reply gives the requester a latency sample.
#[tokio::test]
async fn test_latency_follows_request_reply() -> Result<()> {
    let (server, client) = connected_pair("server", "client").await?;

    assert!(client.send_message("ping").await);
    assert_eq!(server.receive_message().await.as_deref(), Some("ping"));
    assert!(server.send_message("pong").await);
    assert_eq!(client.receive_message().await.as_deref(), Some("pong"));

    assert!(client.latency().is_some());
    Ok(())
}

/// A server peer reaches every accepted client.
#[tokio::test]
async fn test_server_fans_out_to_all_clients() -> Result<()> {
    let (server, port) = server_peer("server").await?;
    let a = client_peer("a", port).await?;
    let b = client_peer("b", port).await?;
    assert_eq!(server.accept_clients(2).await?, 2);

    assert!(server.send_message("hello all").await);
    assert_eq!(a.receive_message().await.as_deref(), Some("hello all"));
    assert_eq!(b.receive_message().await.as_deref(), Some("hello all"));

    let stats = server.stats();
    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.bytes_sent, 2 * "hello all".len() as u64);
    Ok(())
}

/// Closing twice is harmless and leaves the transport closed.
#[tokio::test]
async fn test_close_twice() -> Result<()> {
    let t = Transport::new(SocketMode::TcpServer);
    t.initialize("127.0.0.1", 0, false).await?;
    t.listen(5).await?;
    assert!(t.is_open());

    t.close().await;
    t.close().await;
    assert!(!t.is_open());
    Ok(())
}

/// The remote closing its end marks the local peer disconnected.
#[tokio::test]
async fn test_remote_close_disconnects() -> Result<()> {
    let (server, client) = connected_pair("server", "client").await?;
    server.close_connection().await;
    // The accepted socket lives on inside the server peer; drop it too.
    drop(server);

    assert!(client.receive_message().await.is_none());
    assert!(!client.is_connected());
    assert!(!client.send_message("anyone?").await);
    Ok(())
}
