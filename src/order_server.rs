//! Order Server: the local queue of outstanding calls and the cost function
//! used to bid for them. One instance per node, talking only to its own
//! lift actor and to the distribution/auctioneer layer.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::info;

use crate::messages::{CostReply, Direction, LiftCommand, LiftPosition, LiftState, OrderServerCommand};
use crate::order::{Order, OrderKey};

/// Direction-reversal penalty applied when a bid would require the cab to
/// reverse its current direction of travel mid-trip.
const REVERSAL_PENALTY: u32 = 4;
/// Weight applied to queue depth so a busier cab is a worse bid even at
/// equal distance.
const QUEUE_WEIGHT: u32 = 1;
/// How many recently-completed order keys are remembered so a reinjection
/// racing a just-broadcast completion is answered with `Completed`, not a
/// bid as if the order still existed.
const RECENTLY_COMPLETED_CAPACITY: usize = 64;

pub struct OrderServer {
    queue: HashMap<OrderKey, Order>,
    recently_completed: RecentlyCompleted,
    position: LiftPosition,
    lift_ready: bool,
    lift_tx: mpsc::Sender<LiftCommand>,
}

/// Small fixed-capacity FIFO set. Grounded in the teacher's bounded dedup
/// caches (`DedupCache`), simplified here to order-of-insertion eviction
/// since wall-clock TTL is not needed for this use: only the most recent
/// handful of completions can ever race an in-flight auction.
struct RecentlyCompleted {
    order: std::collections::VecDeque<OrderKey>,
    set: HashSet<OrderKey>,
}

impl RecentlyCompleted {
    fn new() -> Self {
        Self {
            order: std::collections::VecDeque::new(),
            set: HashSet::new(),
        }
    }

    fn insert(&mut self, key: OrderKey) {
        if self.set.insert(key.clone()) {
            self.order.push_back(key);
            if self.order.len() > RECENTLY_COMPLETED_CAPACITY {
                if let Some(oldest) = self.order.pop_front() {
                    self.set.remove(&oldest);
                }
            }
        }
    }

    fn contains(&self, key: &OrderKey) -> bool {
        self.set.contains(key)
    }
}

impl OrderServer {
    pub fn new(lift_tx: mpsc::Sender<LiftCommand>) -> Self {
        Self {
            queue: HashMap::new(),
            recently_completed: RecentlyCompleted::new(),
            position: LiftPosition {
                state: LiftState::Init,
                floor: None,
                dir: None,
                has_order: false,
            },
            lift_ready: false,
            lift_tx,
        }
    }

    pub async fn run(mut self, mut inbox: mpsc::Receiver<OrderServerCommand>) {
        info!("order server started");
        while let Some(cmd) = inbox.recv().await {
            self.handle(cmd).await;
        }
        info!("order server shutting down");
    }

    async fn handle(&mut self, cmd: OrderServerCommand) {
        match cmd {
            OrderServerCommand::EvaluateCost { order, reply } => {
                let _ = reply.send(self.evaluate_cost(&order));
            }
            OrderServerCommand::NewOrder { order } => self.new_order(order).await,
            OrderServerCommand::OrderComplete { key } => self.order_complete(key),
            OrderServerCommand::UpdateLiftPosition { position } => {
                self.position = position;
                self.dispatch_if_idle().await;
            }
            OrderServerCommand::LiftReady => self.lift_ready = true,
        }
    }

    /// Bid for an order: a lower number is a better bid. `Completed` is
    /// returned instead of a bid whenever this node has no record of the
    /// order being outstanding and recently served it itself, which aborts
    /// any auction still in flight for a stale reinjection.
    pub fn evaluate_cost(&self, order: &Order) -> CostReply {
        if !self.lift_ready {
            return CostReply::Bid(u32::MAX);
        }
        if self.recently_completed.contains(&order.key()) && !self.queue.contains_key(&order.key())
        {
            return CostReply::Completed;
        }

        let Some(floor) = self.position.floor else {
            return CostReply::Bid(u32::MAX);
        };
        let distance = (floor as i32 - order.floor as i32).unsigned_abs();

        let direction_penalty = match self.position.dir {
            None => 0,
            Some(dir) => {
                let order_dir = if order.floor >= floor {
                    Direction::Up
                } else {
                    Direction::Down
                };
                if order_dir == dir {
                    0
                } else {
                    REVERSAL_PENALTY
                }
            }
        };

        let queue_len = self.queue.len() as u32;
        CostReply::Bid(distance + direction_penalty + QUEUE_WEIGHT * queue_len)
    }

    pub async fn new_order(&mut self, order: Order) {
        self.queue.insert(order.key(), order);
        self.dispatch_if_idle().await;
    }

    pub fn order_complete(&mut self, key: OrderKey) {
        self.queue.remove(&key);
        self.recently_completed.insert(key);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// If the Lift is idle and carrying nothing, hand it the nearest queued
    /// order — ties broken by order id so two nodes replaying the same queue
    /// after a crash pick the same one. Called both when a fresh order is
    /// queued and whenever the Lift reports a new position, since that is
    /// how we learn it just became idle.
    async fn dispatch_if_idle(&mut self) {
        if self.position.state != LiftState::Idle || self.position.has_order {
            return;
        }
        let Some(floor) = self.position.floor else {
            return;
        };
        let next = self
            .queue
            .values()
            .min_by(|a, b| {
                let da = (a.floor as i32 - floor as i32).unsigned_abs();
                let db = (b.floor as i32 - floor as i32).unsigned_abs();
                da.cmp(&db).then_with(|| a.id.cmp(&b.id))
            })
            .cloned();
        if let Some(order) = next {
            self.queue.remove(&order.key());
            let _ = self.lift_tx.send(LiftCommand::NewOrder { order }).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{ButtonType, NodeId, OrderId};

    fn order(floor: u8) -> Order {
        Order::new(
            OrderId {
                origin: NodeId::new("a"),
                seq: 0,
            },
            floor,
            ButtonType::HallUp,
            NodeId::new("a"),
            NodeId::new("a"),
            chrono::Utc::now(),
        )
        .unwrap()
    }

    fn server() -> (OrderServer, mpsc::Receiver<LiftCommand>) {
        let (lift_tx, lift_rx) = mpsc::channel(8);
        (OrderServer::new(lift_tx), lift_rx)
    }

    #[tokio::test]
    async fn idle_cab_bids_pure_distance() {
        let (mut srv, _lift_rx) = server();
        srv.handle(OrderServerCommand::LiftReady).await;
        srv.position = LiftPosition {
            state: LiftState::Idle,
            floor: Some(1),
            dir: None,
            has_order: false,
        };
        match srv.evaluate_cost(&order(3)) {
            CostReply::Bid(cost) => assert_eq!(cost, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reversal_penalty_applies_when_travel_direction_opposes() {
        let (mut srv, _lift_rx) = server();
        srv.handle(OrderServerCommand::LiftReady).await;
        srv.position = LiftPosition {
            state: LiftState::Mooving,
            floor: Some(2),
            dir: Some(Direction::Up),
            has_order: true,
        };
        match srv.evaluate_cost(&order(0)) {
            CostReply::Bid(cost) => assert_eq!(cost, 2 + REVERSAL_PENALTY),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_order_replayed_before_requeue_is_rejected() {
        let (mut srv, _lift_rx) = server();
        srv.handle(OrderServerCommand::LiftReady).await;
        srv.position = LiftPosition {
            state: LiftState::Idle,
            floor: Some(0),
            dir: None,
            has_order: false,
        };
        let o = order(1);
        srv.new_order(o.clone()).await;
        srv.order_complete(o.key());
        match srv.evaluate_cost(&o) {
            CostReply::Completed => {}
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unready_lift_bids_worst_possible() {
        let (srv, _lift_rx) = server();
        match srv.evaluate_cost(&order(1)) {
            CostReply::Bid(cost) => assert_eq!(cost, u32::MAX),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn idle_lift_is_dispatched_the_nearest_queued_order() {
        let (mut srv, mut lift_rx) = server();
        srv.position = LiftPosition {
            state: LiftState::Idle,
            floor: Some(0),
            dir: None,
            has_order: false,
        };
        srv.new_order(order(3)).await;
        let dispatched = lift_rx.recv().await.unwrap();
        match dispatched {
            LiftCommand::NewOrder { order } => assert_eq!(order.floor, 3),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(srv.queue_len(), 0);
    }

    #[tokio::test]
    async fn busy_lift_keeps_second_order_queued_until_idle_again() {
        let (mut srv, mut lift_rx) = server();
        srv.position = LiftPosition {
            state: LiftState::Mooving,
            floor: Some(0),
            dir: Some(Direction::Up),
            has_order: true,
        };
        srv.new_order(order(3)).await;
        assert!(lift_rx.try_recv().is_err());
        assert_eq!(srv.queue_len(), 1);

        srv.handle(OrderServerCommand::UpdateLiftPosition {
            position: LiftPosition {
                state: LiftState::Idle,
                floor: Some(1),
                dir: None,
                has_order: false,
            },
        })
        .await;
        let dispatched = lift_rx.recv().await.unwrap();
        match dispatched {
            LiftCommand::NewOrder { order } => assert_eq!(order.floor, 3),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(srv.queue_len(), 0);
    }
}
