//! Shared peer membership table. This is the service-registry analogue
//! called for in the design notes: rather than every actor reaching for a
//! global, each one holds an `Arc<PeerRegistry>` handed out at startup.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::order::NodeId;

#[derive(Debug, Clone)]
pub struct PeerAddr {
    pub rpc_addr: String,
}

pub struct PeerRegistry {
    peers: Mutex<HashMap<NodeId, (PeerAddr, DateTime<Utc>)>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    pub fn mark_seen(&self, node: NodeId, addr: PeerAddr, now: DateTime<Utc>) -> bool {
        let mut peers = self.peers.lock().unwrap();
        let is_new = !peers.contains_key(&node);
        peers.insert(node, (addr, now));
        is_new
    }

    /// Drops peers not seen within `timeout`, returning the ones removed so
    /// the caller can raise `PeerDown` for each.
    pub fn evict_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> Vec<NodeId> {
        let mut peers = self.peers.lock().unwrap();
        let stale: Vec<NodeId> = peers
            .iter()
            .filter(|(_, (_, last_seen))| now - *last_seen > timeout)
            .map(|(node, _)| node.clone())
            .collect();
        for node in &stale {
            peers.remove(node);
        }
        stale
    }

    pub fn known_peers(&self) -> Vec<NodeId> {
        self.peers.lock().unwrap().keys().cloned().collect()
    }

    pub fn addr_of(&self, node: &NodeId) -> Option<PeerAddr> {
        self.peers.lock().unwrap().get(node).map(|(a, _)| a.clone())
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_seen_reports_new_peers_once() {
        let reg = PeerRegistry::new();
        let now = Utc::now();
        let addr = PeerAddr {
            rpc_addr: "127.0.0.1:9".into(),
        };
        assert!(reg.mark_seen(NodeId::new("b"), addr.clone(), now));
        assert!(!reg.mark_seen(NodeId::new("b"), addr, now));
    }

    #[test]
    fn evict_stale_removes_and_reports_expired_peers() {
        let reg = PeerRegistry::new();
        let old = Utc::now() - chrono::Duration::seconds(10);
        reg.mark_seen(
            NodeId::new("b"),
            PeerAddr {
                rpc_addr: "x".into(),
            },
            old,
        );
        let removed = reg.evict_stale(Utc::now(), chrono::Duration::seconds(3));
        assert_eq!(removed, vec![NodeId::new("b")]);
        assert!(reg.known_peers().is_empty());
    }
}
