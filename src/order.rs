//! Order identity and the hall/cab call data model.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FLOOR_COUNT;

/// Human-readable node identity, e.g. `"elevator-a"`. Uniqueness across the
/// fleet is a deployment contract, not something this crate enforces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally unique order identity: the creating node's identity concatenated
/// with a per-node monotonic counter. Lexicographic `Ord` on `(origin, seq)`
/// is what the auctioneer uses to break cost ties deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId {
    pub origin: NodeId,
    pub seq: u64,
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.seq)
    }
}

/// Per-node monotonic sequence generator backing `OrderId::seq`.
#[derive(Debug, Default)]
pub struct OrderIdGen {
    next: AtomicU64,
}

impl OrderIdGen {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    pub fn next(&self, origin: &NodeId) -> OrderId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        OrderId {
            origin: origin.clone(),
            seq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    HallUp,
    HallDown,
    Cab,
}

impl ButtonType {
    pub fn is_hall(self) -> bool {
        !matches!(self, ButtonType::Cab)
    }
}

/// The key that identifies "the same call" for dedup purposes: hall calls are
/// keyed by floor and direction alone (any cab may answer); cab calls are
/// additionally keyed by the owning node, since only that node's cab can ever
/// serve one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    pub floor: u8,
    pub button: ButtonType,
    pub cab_owner: Option<NodeId>,
}

impl OrderKey {
    pub fn hall(floor: u8, button: ButtonType) -> Self {
        debug_assert!(button.is_hall());
        Self {
            floor,
            button,
            cab_owner: None,
        }
    }

    pub fn cab(floor: u8, owner: NodeId) -> Self {
        Self {
            floor,
            button: ButtonType::Cab,
            cab_owner: Some(owner),
        }
    }
}

/// A single outstanding call: a hall button pressed on some floor, or a cab
/// button pressed inside some node's car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub floor: u8,
    pub button_type: ButtonType,
    /// Node that owns this call. For cab orders, the only node that may ever
    /// serve it. For hall orders, the node that originally observed the
    /// button press (informational only — any node may win the auction).
    pub node: NodeId,
    /// Node currently responsible for re-announcing this order if its
    /// watchdog deadline expires unserved.
    pub watch_dog: NodeId,
    pub time: DateTime<Utc>,
}

impl Order {
    /// Builds an order, rejecting floor/button combinations that can never
    /// legally occur (hall-up at the top floor, hall-down at the bottom).
    pub fn new(
        id: OrderId,
        floor: u8,
        button_type: ButtonType,
        node: NodeId,
        watch_dog: NodeId,
        time: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        if floor >= FLOOR_COUNT {
            anyhow::bail!("floor {} out of range (0..{})", floor, FLOOR_COUNT);
        }
        if button_type == ButtonType::HallUp && floor == FLOOR_COUNT - 1 {
            anyhow::bail!("hall-up order at top floor {} is illegal", floor);
        }
        if button_type == ButtonType::HallDown && floor == 0 {
            anyhow::bail!("hall-down order at bottom floor is illegal");
        }
        Ok(Self {
            id,
            floor,
            button_type,
            node,
            watch_dog,
            time,
        })
    }

    pub fn key(&self) -> OrderKey {
        match self.button_type {
            ButtonType::Cab => OrderKey::cab(self.floor, self.node.clone()),
            hall => OrderKey::hall(self.floor, hall),
        }
    }
}
