//! Order Distribution: the auctioneer. Synthesizes new orders, fans out
//! `EvaluateCost` bids to every known peer plus itself, picks a winner, and
//! broadcasts the assignment. Grounded in the teacher's fan-out-with-
//! deadline pattern (`StrategyCoordinator::tick` dispatching across
//! channels under a bounded wait).

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::messages::{CostReply, OrderServerCommand, RpcRequest, RpcResponse};
use crate::network::peers::PeerRegistry;
use crate::network::rpc::RpcClient;
use crate::order::{ButtonType, NodeId, Order, OrderIdGen};

pub struct DistributionConfig {
    pub bid_deadline: Duration,
    pub rpc_deadline: Duration,
}

pub struct Distribution {
    node_id: NodeId,
    id_gen: OrderIdGen,
    peers: Arc<PeerRegistry>,
    rpc: Arc<dyn RpcClient>,
    cfg: DistributionConfig,
    order_server_tx: mpsc::Sender<OrderServerCommand>,
    watchdog_new_order_tx: mpsc::Sender<Order>,
}

/// A single peer's answer to an `EvaluateCost` bid request.
struct Bid {
    node: NodeId,
    reply: CostReply,
}

impl Distribution {
    pub fn new(
        node_id: NodeId,
        peers: Arc<PeerRegistry>,
        rpc: Arc<dyn RpcClient>,
        cfg: DistributionConfig,
        order_server_tx: mpsc::Sender<OrderServerCommand>,
        watchdog_new_order_tx: mpsc::Sender<Order>,
    ) -> Self {
        Self {
            node_id,
            id_gen: OrderIdGen::new(),
            peers,
            rpc,
            cfg,
            order_server_tx,
            watchdog_new_order_tx,
        }
    }

    /// `NewOrder` entry point: a button press turned into a synthesized
    /// `Order` and auctioned off. Returns the order actually broadcast, or
    /// `None` if the auction was aborted because every respondent reported
    /// the call already completed.
    pub async fn new_order(&self, floor: u8, button_type: ButtonType) -> anyhow::Result<Option<Order>> {
        let id = self.id_gen.next(&self.node_id);
        let order = Order::new(
            id,
            floor,
            button_type,
            self.node_id.clone(),
            self.node_id.clone(),
            chrono::Utc::now(),
        )?;

        if button_type == ButtonType::Cab {
            // Cab orders are only ever served by their owning node, so there
            // is nothing to auction: assign immediately.
            let order = self.assign(order, self.node_id.clone()).await?;
            return Ok(Some(order));
        }

        let Some(winner) = self.run_auction(&order).await? else {
            info!(order = %order.id, "auction aborted: order already completed");
            return Ok(None);
        };

        let order = self.assign(order, winner).await?;
        Ok(Some(order))
    }

    /// Fan out `EvaluateCost` to `{self} ∪ known_peers`, each under a
    /// deadline, and pick the minimum-cost respondent, breaking ties by
    /// lexicographic node id so any two nodes computing the same bid set
    /// agree on a winner without further coordination.
    async fn run_auction(&self, order: &Order) -> anyhow::Result<Option<NodeId>> {
        let peers = self.peers.known_peers();
        let mut bids = Vec::with_capacity(peers.len() + 1);

        bids.push(self.bid_self(order).await);
        for peer in &peers {
            bids.push(self.bid_peer(peer.clone(), order).await);
        }

        if bids.iter().all(|b| matches!(b.reply, CostReply::Completed)) {
            return Ok(None);
        }

        let winner = bids
            .iter()
            .filter_map(|b| match b.reply {
                CostReply::Bid(cost) => Some((cost, &b.node)),
                CostReply::Completed => None,
            })
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
            .map(|(_, node)| node.clone());

        Ok(winner)
    }

    async fn bid_self(&self, order: &Order) -> Bid {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .order_server_tx
            .send(OrderServerCommand::EvaluateCost {
                order: order.clone(),
                reply: reply_tx,
            })
            .await;
        let reply = if sent.is_err() {
            CostReply::Bid(u32::MAX)
        } else {
            match timeout(self.cfg.bid_deadline, reply_rx).await {
                Ok(Ok(reply)) => reply,
                _ => CostReply::Bid(u32::MAX),
            }
        };
        Bid {
            node: self.node_id.clone(),
            reply,
        }
    }

    /// A peer that times out or errors votes with the worst possible bid
    /// rather than dropping out of the auction: this keeps the auction
    /// deterministic across nodes that differ only in which peers happened
    /// to answer in time.
    async fn bid_peer(&self, peer: NodeId, order: &Order) -> Bid {
        let reply = match timeout(
            self.cfg.rpc_deadline,
            self.rpc
                .call(&peer, RpcRequest::EvaluateCost { order: order.clone() }),
        )
        .await
        {
            Ok(Ok(RpcResponse::Cost(reply))) => reply,
            Ok(Ok(RpcResponse::Ack)) => CostReply::Bid(u32::MAX),
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "evaluate_cost rpc failed");
                CostReply::Bid(u32::MAX)
            }
            Err(_) => {
                warn!(%peer, "evaluate_cost rpc timed out");
                CostReply::Bid(u32::MAX)
            }
        };
        Bid { node: peer, reply }
    }

    /// Picks a random watcher from every node except the winner (or the
    /// winner itself, if it has no peers), records both on the order, and
    /// broadcasts the assignment and the watchdog registration. Returns the
    /// order as actually assigned, since `order.node`/`order.watch_dog` are
    /// rewritten here from the creating node to the winner/watcher.
    ///
    /// Dispatch to the winning cab goes through its order server, not
    /// straight to its Lift: only the order server knows whether that Lift
    /// is idle right now, and queues the order instead of dispatching it
    /// otherwise.
    async fn assign(&self, mut order: Order, winner: NodeId) -> anyhow::Result<Order> {
        let peers = self.peers.known_peers();
        let mut candidates: Vec<NodeId> = peers.into_iter().filter(|p| *p != winner).collect();
        if candidates.is_empty() {
            candidates.push(self.node_id.clone());
        }
        let watcher = candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| self.node_id.clone());

        order.node = winner.clone();
        order.watch_dog = watcher.clone();

        info!(order = %order.id, %winner, %watcher, "order assigned");

        if winner == self.node_id {
            self.order_server_tx
                .send(OrderServerCommand::NewOrder {
                    order: order.clone(),
                })
                .await?;
        } else {
            self.rpc
                .call(
                    &winner,
                    RpcRequest::NewOrder {
                        order: order.clone(),
                        watcher: watcher.clone(),
                    },
                )
                .await?;
        }

        if watcher == self.node_id {
            self.watchdog_new_order_tx.send(order.clone()).await?;
        } else {
            self.rpc
                .call(&watcher, RpcRequest::WatchdogNewOrder { order: order.clone() })
                .await?;
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::peers::PeerRegistry;
    use crate::network::rpc::RpcClient;
    use async_trait::async_trait;

    struct NoopRpc;

    #[async_trait]
    impl RpcClient for NoopRpc {
        async fn call(&self, _peer: &NodeId, _req: RpcRequest) -> anyhow::Result<RpcResponse> {
            Ok(RpcResponse::Cost(CostReply::Bid(u32::MAX)))
        }
    }

    fn node(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[tokio::test]
    async fn cab_order_assigns_immediately_without_auction() {
        let peers = Arc::new(PeerRegistry::new());
        let rpc: Arc<dyn RpcClient> = Arc::new(NoopRpc);
        let (os_tx, mut os_rx) = mpsc::channel(8);
        let (wd_tx, mut wd_rx) = mpsc::channel(8);

        let dist = Distribution::new(
            node("a"),
            peers,
            rpc,
            DistributionConfig {
                bid_deadline: Duration::from_millis(100),
                rpc_deadline: Duration::from_millis(100),
            },
            os_tx,
            wd_tx,
        );

        let order = dist.new_order(1, ButtonType::Cab).await.unwrap().unwrap();
        assert_eq!(order.node, node("a"));
        assert!(matches!(
            os_rx.recv().await,
            Some(OrderServerCommand::NewOrder { .. })
        ));
        assert!(wd_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn hall_order_with_no_peers_awards_and_watches_self() {
        let peers = Arc::new(PeerRegistry::new());
        let rpc: Arc<dyn RpcClient> = Arc::new(NoopRpc);
        let (os_tx, mut os_rx) = mpsc::channel(8);
        tokio::spawn(async move {
            while let Some(cmd) = os_rx.recv().await {
                match cmd {
                    OrderServerCommand::EvaluateCost { reply, .. } => {
                        let _ = reply.send(CostReply::Bid(3));
                    }
                    OrderServerCommand::NewOrder { .. } => {}
                    _ => {}
                }
            }
        });
        let (wd_tx, mut wd_rx) = mpsc::channel(8);

        let dist = Distribution::new(
            node("a"),
            peers,
            rpc,
            DistributionConfig {
                bid_deadline: Duration::from_millis(100),
                rpc_deadline: Duration::from_millis(100),
            },
            os_tx,
            wd_tx,
        );

        let order = dist.new_order(1, ButtonType::HallUp).await.unwrap().unwrap();
        // Sole known node: wins the auction and watches its own order.
        assert_eq!(order.node, node("a"));
        assert_eq!(order.watch_dog, node("a"));
        assert!(wd_rx.recv().await.is_some());
    }
}
