//! UDP peer discovery: broadcasts this node's identity once a second on the
//! discovery port with a shared auth cookie, and listens for the same from
//! everyone else. Liveness is derived from beacon recency rather than a
//! connection, so the resilience idiom here is "keep listening forever,"
//! the same shape as the teacher's outer reconnect loop in `user_ws.rs`,
//! simplified because UDP has no connection to drop and reestablish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::messages::PeerEvent;
use crate::network::peers::{PeerAddr, PeerRegistry};
use crate::order::NodeId;

#[derive(Debug, Serialize, Deserialize)]
struct Beacon {
    cookie: String,
    node: NodeId,
    rpc_port: u16,
}

pub struct DiscoveryConfig {
    pub node_id: NodeId,
    pub udp_port: u16,
    pub rpc_port: u16,
    pub cookie: String,
    pub beacon_interval: Duration,
    pub peer_timeout: Duration,
}

/// Broadcasts one beacon per `beacon_interval` forever. Runs as its own
/// task; failures to send are logged and retried on the next tick rather
/// than ending the task, since a single dropped broadcast is not fatal.
pub async fn broadcast(cfg: Arc<DiscoveryConfig>) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    let dest: SocketAddr = format!("255.255.255.255:{}", cfg.udp_port).parse()?;

    let beacon = Beacon {
        cookie: cfg.cookie.clone(),
        node: cfg.node_id.clone(),
        rpc_port: cfg.rpc_port,
    };
    let payload = serde_json::to_vec(&beacon)?;

    info!(port = cfg.udp_port, "discovery beacon started");
    loop {
        if let Err(e) = socket.send_to(&payload, dest).await {
            warn!(error = %e, "failed to send discovery beacon");
        }
        tokio::time::sleep(cfg.beacon_interval).await;
    }
}

/// Listens for beacons, updates `registry`, and emits `PeerUp` the first
/// time a node is seen. A background ticker separately evicts peers that
/// have gone quiet past `peer_timeout` and emits `PeerDown` for each.
pub async fn listen(
    cfg: Arc<DiscoveryConfig>,
    registry: Arc<PeerRegistry>,
    events: mpsc::Sender<PeerEvent>,
) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", cfg.udp_port)).await?;
    let mut buf = vec![0u8; 1024];

    let eviction_cfg = cfg.clone();
    let eviction_registry = registry.clone();
    let eviction_events = events.clone();
    tokio::spawn(async move {
        let timeout = chrono::Duration::from_std(eviction_cfg.peer_timeout)
            .unwrap_or(chrono::Duration::seconds(3));
        loop {
            tokio::time::sleep(eviction_cfg.beacon_interval).await;
            for node in eviction_registry.evict_stale(chrono::Utc::now(), timeout) {
                warn!(%node, "peer timed out");
                let _ = eviction_events.send(PeerEvent::PeerDown(node)).await;
            }
        }
    });

    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        let Ok(beacon) = serde_json::from_slice::<Beacon>(&buf[..len]) else {
            continue;
        };
        if beacon.cookie != cfg.cookie || beacon.node == cfg.node_id {
            continue;
        }
        let addr = PeerAddr {
            rpc_addr: SocketAddr::new(from.ip(), beacon.rpc_port).to_string(),
        };
        let is_new = registry.mark_seen(beacon.node.clone(), addr, chrono::Utc::now());
        if is_new {
            info!(node = %beacon.node, "peer discovered");
            let _ = events.send(PeerEvent::PeerUp(beacon.node)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_round_trips_through_json() {
        let beacon = Beacon {
            cookie: "elevator-fleet".into(),
            node: NodeId::new("a"),
            rpc_port: 20001,
        };
        let bytes = serde_json::to_vec(&beacon).unwrap();
        let decoded: Beacon = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.node, beacon.node);
        assert_eq!(decoded.rpc_port, beacon.rpc_port);
    }

    #[tokio::test]
    async fn listener_ignores_beacons_with_wrong_cookie() {
        let registry = Arc::new(PeerRegistry::new());
        let cfg = Arc::new(DiscoveryConfig {
            node_id: NodeId::new("self"),
            udp_port: 0,
            rpc_port: 0,
            cookie: "correct-cookie".into(),
            beacon_interval: Duration::from_millis(10),
            peer_timeout: Duration::from_millis(50),
        });
        let socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let local_addr = socket.local_addr().unwrap();
        drop(socket);

        let listener_cfg = Arc::new(DiscoveryConfig {
            node_id: cfg.node_id.clone(),
            udp_port: local_addr.port(),
            rpc_port: 0,
            cookie: cfg.cookie.clone(),
            beacon_interval: cfg.beacon_interval,
            peer_timeout: cfg.peer_timeout,
        });
        let (tx, mut rx) = mpsc::channel(4);
        let registry_clone = registry.clone();
        let handle = tokio::spawn(listen(listener_cfg, registry_clone, tx));

        let sender = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let bad = Beacon {
            cookie: "wrong".into(),
            node: NodeId::new("intruder"),
            rpc_port: 1,
        };
        sender
            .send_to(&serde_json::to_vec(&bad).unwrap(), local_addr)
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(got.is_err() || got.unwrap().is_none());
        handle.abort();
    }
}
