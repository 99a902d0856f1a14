//! Registry behaviour: registration, relay and the inactivity sweep.

use relay_core::RelayError;
use relay_net::PeerManager;

use crate::*;

/// A second registration under a taken id fails and the first entry stays.
#[tokio::test]
async fn test_duplicate_registration_keeps_original() -> Result<()> {
    let registry = PeerManager::new();
    let original = Arc::new(Peer::new("dup", "10.0.0.1", 1));
    registry.add_peer(original.clone())?;

    let err = registry
        .add_peer(Arc::new(Peer::new("dup", "10.0.0.2", 2)))
        .unwrap_err();
    assert!(matches!(err, RelayError::DuplicatePeer(_)));
    assert_eq!(registry.get_peer("dup").context("entry lost")?.ip(), "10.0.0.1");
    Ok(())
}

/// Relay A→B delivers the tagged message and marks both peers active.
#[tokio::test]
async fn test_relay_delivers_tagged_message() -> Result<()> {
    let (remote_b, port) = server_peer("remote-b").await?;
    let registry = PeerManager::new();

    let a = Arc::new(Peer::new("a", "10.0.0.1", 1));
    let b = client_peer("b", port).await?;
    registry.add_peer(a.clone())?;
    registry.add_peer(b.clone())?;
    assert_eq!(remote_b.accept_clients(1).await?, 1);

    let a_before = a.last_active();
    let b_before = b.last_active();
    tokio::time::sleep(Duration::from_millis(10)).await;

    registry.relay_message("a", "b", "hello").await?;

    assert_eq!(
        remote_b.receive_message().await.as_deref(),
        Some("[Relayed] hello")
    );
    assert!(a.last_active() > a_before);
    assert!(b.last_active() > b_before);
    Ok(())
}

/// Relay to an unknown id fails and leaves the source untouched.
#[tokio::test]
async fn test_relay_to_unknown_target() -> Result<()> {
    let registry = PeerManager::new();
    let a = Arc::new(Peer::new("a", "10.0.0.1", 1));
    registry.add_peer(a.clone())?;

    let before = a.last_active();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = registry.relay_message("a", "nobody", "hello").await.unwrap_err();
    assert!(matches!(err, RelayError::PeerNotFound(ref id) if id == "nobody"));
    assert_eq!(a.last_active(), before);
    assert_eq!(a.stats().messages_sent, 0);
    Ok(())
}

/// The sweep removes the idle peer and keeps the one that stayed active.
#[tokio::test(start_paused = true)]
async fn test_inactivity_sweep() -> Result<()> {
    let registry = PeerManager::new();
    registry.add_peer(Arc::new(Peer::new("x", "10.0.0.1", 1)))?;
    registry.add_peer(Arc::new(Peer::new("y", "10.0.0.2", 1)))?;

    tokio::time::advance(Duration::from_secs(120)).await;
    registry.get_peer("y").context("y missing")?.keep_alive();

    assert_eq!(registry.remove_inactive_peers(Duration::from_secs(60)), 1);
    assert!(!registry.contains("x"));
    assert!(registry.contains("y"));
    Ok(())
}

/// Broadcast reaches connected peers and counts the rest as failures.
#[tokio::test]
async fn test_broadcast_report() -> Result<()> {
    let (remote, port) = server_peer("remote").await?;
    let registry = PeerManager::new();
    registry.add_peer(client_peer("reachable", port).await?)?;
    registry.add_peer(Arc::new(Peer::new("unreachable", "10.0.0.1", 1)))?;
    assert_eq!(remote.accept_clients(1).await?, 1);

    let report = registry.broadcast("all hands").await;
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(remote.receive_message().await.as_deref(), Some("all hands"));
    Ok(())
}
