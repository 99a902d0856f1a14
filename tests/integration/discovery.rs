//! Multicast discovery against a raw UDP probe socket.

use relay_core::wire::peer_addr_string;
use relay_core::DiscoveryMessage;
use relay_net::PeerManager;
use tokio::net::UdpSocket;

use crate::*;

/// A DISCOVERY_REQUEST gets a unicast DISCOVERY_RESPONSE back.
#[tokio::test]
async fn test_request_gets_unicast_response() -> Result<()> {
    let Some(discovery) = discovery_on(47_701).await else {
        return Ok(());
    };
    discovery.start().await;

    let probe = UdpSocket::bind("127.0.0.1:0").await?;
    probe
        .send_to(DiscoveryMessage::Request.as_bytes(), ("127.0.0.1", 47_701))
        .await?;

    let mut buf = [0u8; 64];
    let (n, _) = tokio::time::timeout(IO_TIMEOUT, probe.recv_from(&mut buf))
        .await
        .context("no discovery response")??;
    assert_eq!(&buf[..n], DiscoveryMessage::Response.as_bytes());

    discovery.stop().await;
    Ok(())
}

/// Repeated responses from one source are recorded once.
#[tokio::test]
async fn test_responses_are_deduplicated() -> Result<()> {
    let Some(discovery) = discovery_on(47_702).await else {
        return Ok(());
    };
    discovery.start().await;

    let probe = UdpSocket::bind("127.0.0.1:0").await?;
    let expected = peer_addr_string(&probe.local_addr()?);
    for _ in 0..5 {
        probe
            .send_to(DiscoveryMessage::Response.as_bytes(), ("127.0.0.1", 47_702))
            .await?;
    }

    assert!(eventually(IO_TIMEOUT, || discovery.discovered_peers().contains(&expected)).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let matches = discovery
        .discovered_peers()
        .into_iter()
        .filter(|p| *p == expected)
        .count();
    assert_eq!(matches, 1);

    discovery.stop().await;
    Ok(())
}

/// Discovered addresses are dialed on the given port and registered once.
#[tokio::test]
async fn test_connect_discovered_registers_reachable_peers() -> Result<()> {
    let Some(discovery) = discovery_on(47_703).await else {
        return Ok(());
    };
    let (remote, port) = server_peer("remote").await?;

    discovery.handle_discovery_response("127.0.0.1:47703".parse()?);
    let registry = PeerManager::new();

    let added = discovery
        .connect_discovered(&registry, Some(port), IO_TIMEOUT)
        .await;
    assert_eq!(added, 1);
    let id = format!("127.0.0.1:{port}");
    assert!(registry.contains(&id));
    assert_eq!(remote.accept_clients(1).await?, 1);

    let again = discovery
        .connect_discovered(&registry, Some(port), IO_TIMEOUT)
        .await;
    assert_eq!(again, 0);
    Ok(())
}

/// Two instances on one group find each other.
///
/// Needs two hosts: instances sharing one address and port on the same
/// machine cannot both receive unicast responses.
#[tokio::test]
#[ignore]
async fn test_two_instances_discover_each_other() -> Result<()> {
    let (Some(a), Some(b)) = (discovery_on(47_704).await, discovery_on(47_704).await) else {
        return Ok(());
    };
    a.start().await;
    b.start().await;

    let found = eventually(Duration::from_secs(15), || {
        !a.discovered_peers().is_empty() && !b.discovered_peers().is_empty()
    })
    .await;

    a.stop().await;
    b.stop().await;
    assert!(found);
    Ok(())
}
