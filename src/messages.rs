//! Channel payloads exchanged between actors and over the wire between nodes.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::order::{NodeId, Order, OrderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// Commands accepted by the lift actor's inbox. `CloseDoor` and `MotionStuck`
/// are self-addressed timer events, not externally issued commands, but they
/// share the inbox so the actor has one receive loop.
#[derive(Debug)]
pub enum LiftCommand {
    AtFloor {
        floor: u8,
    },
    NewOrder {
        order: Order,
    },
    GetPosition {
        reply: oneshot::Sender<LiftPosition>,
    },
    CloseDoor {
        generation: u64,
    },
    MotionStuck {
        generation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftState {
    Init,
    Idle,
    DoorOpen,
    Mooving,
}

#[derive(Debug, Clone, Copy)]
pub struct LiftPosition {
    pub state: LiftState,
    pub floor: Option<u8>,
    pub dir: Option<Direction>,
    pub has_order: bool,
}

/// Commands accepted by the order server actor's inbox.
#[derive(Debug)]
pub enum OrderServerCommand {
    EvaluateCost {
        order: Order,
        reply: oneshot::Sender<CostReply>,
    },
    NewOrder {
        order: Order,
    },
    OrderComplete {
        key: crate::order::OrderKey,
    },
    UpdateLiftPosition {
        position: LiftPosition,
    },
    LiftReady,
}

/// `Completed(0)` tells the auctioneer the bidding node already knows this
/// call was served; any live auction for it must abort rather than award a
/// winner to a call that no longer exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CostReply {
    Bid(u32),
    Completed,
}

/// Wire-level RPC request bodies, sent newline-delimited JSON over a
/// per-call TCP connection to a peer's RPC port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    EvaluateCost { order: Order },
    NewOrder { order: Order, watcher: NodeId },
    WatchdogNewOrder { order: Order },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    Cost(CostReply),
    Ack,
}

/// Events raised by the discovery layer and consumed by distribution and the
/// watchdog.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    PeerUp(NodeId),
    PeerDown(NodeId),
}

/// Commands accepted by the watchdog actor.
#[derive(Debug, Clone)]
pub enum WatchdogCommand {
    NewOrder(Order),
    OrderComplete(OrderId),
    Deadline(OrderId),
    PeerUp(NodeId),
    PeerDown(NodeId),
}
