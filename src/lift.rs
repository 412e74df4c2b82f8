//! Lift State Machine: owns one physical cab's floor/direction/queue state
//! exclusively. Modeled as a single-task actor, per the teacher's
//! one-task-owns-its-state convention (`StrategyCoordinator`,
//! `InventoryManager`).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::driver::Driver;
use crate::messages::{Direction, LiftCommand, LiftPosition, LiftState, OrderServerCommand};
use crate::order::Order;
use crate::FLOOR_COUNT;

pub struct LiftConfig {
    pub door_hold: Duration,
    pub motion_stuck_timeout: Duration,
}

/// Outcome signalled to the rest of the node when the cab gets stuck mid
/// travel: per the error-handling design, the order server is torn down and
/// the process restarts with a clean queue.
pub enum LiftFault {
    MotionStuck,
}

pub struct LiftActor {
    driver: Arc<dyn Driver>,
    cfg: LiftConfig,
    state: LiftState,
    floor: Option<u8>,
    dir: Option<Direction>,
    order: Option<Order>,
    generation: u64,
    order_server_tx: mpsc::Sender<OrderServerCommand>,
    order_complete_tx: mpsc::Sender<Order>,
    fault_tx: mpsc::Sender<LiftFault>,
    self_tx: mpsc::Sender<LiftCommand>,
}

impl LiftActor {
    /// `self_tx` is the sender half of the same channel whose receiver the
    /// caller later passes to `run` — the actor needs its own sender so
    /// timer tasks can deliver `CloseDoor`/`MotionStuck` back through the
    /// same inbox.
    pub fn new(
        driver: Arc<dyn Driver>,
        cfg: LiftConfig,
        order_server_tx: mpsc::Sender<OrderServerCommand>,
        order_complete_tx: mpsc::Sender<Order>,
        fault_tx: mpsc::Sender<LiftFault>,
        self_tx: mpsc::Sender<LiftCommand>,
    ) -> Self {
        Self {
            driver,
            cfg,
            state: LiftState::Init,
            floor: None,
            dir: None,
            order: None,
            generation: 0,
            order_server_tx,
            order_complete_tx,
            fault_tx,
            self_tx,
        }
    }

    pub fn position(&self) -> LiftPosition {
        LiftPosition {
            state: self.state,
            floor: self.floor,
            dir: self.dir,
            has_order: self.order.is_some(),
        }
    }

    pub async fn run(mut self, mut inbox: mpsc::Receiver<LiftCommand>) {
        info!("lift actor started");
        while let Some(cmd) = inbox.recv().await {
            self.handle(cmd).await;
        }
        info!("lift actor shutting down");
    }

    async fn handle(&mut self, cmd: LiftCommand) {
        match cmd {
            LiftCommand::AtFloor { floor } => self.at_floor(floor).await,
            LiftCommand::NewOrder { order } => self.new_order(order).await,
            LiftCommand::GetPosition { reply } => {
                let _ = reply.send(self.position());
            }
            LiftCommand::CloseDoor { generation } => self.close_door(generation).await,
            LiftCommand::MotionStuck { generation } => self.motion_stuck(generation).await,
        }
    }

    /// `AtFloor`: the floor sensor fired. In `init`, this establishes our
    /// starting position, moves us to `idle`, and tells the order server
    /// we're ready to bid. While serving an order, arriving at its floor
    /// opens the door; otherwise we keep moving. Every branch reports our
    /// new position, since that's the only way the order server's cached
    /// position for bidding and dispatch ever gets updated.
    async fn at_floor(&mut self, floor: u8) {
        debug_assert!(floor < FLOOR_COUNT);
        self.floor = Some(floor);
        let _ = self.driver.set_button_lamp(floor, false).await;

        if self.state == LiftState::Init {
            self.state = LiftState::Idle;
            self.dir = None;
            let _ = self.driver.set_motor_direction(None).await;
            info!(floor, "lift initialized");
            self.report_position().await;
            let _ = self
                .order_server_tx
                .send(OrderServerCommand::LiftReady)
                .await;
            return;
        }

        if let Some(order) = &self.order {
            if order.floor == floor {
                self.open_door().await;
                return;
            }
        }
        self.report_position().await;
    }

    async fn open_door(&mut self) {
        self.state = LiftState::DoorOpen;
        self.dir = None;
        let _ = self.driver.set_motor_direction(None).await;
        let _ = self.driver.set_door_open_light(true).await;
        self.report_position().await;

        self.generation += 1;
        let generation = self.generation;
        let hold = self.cfg.door_hold;
        // Self-addressed timer: scheduling happens here, but delivery comes
        // back through the inbox so the actor never awaits outside select.
        let tx = self.close_door_sender();
        tokio::spawn(async move {
            sleep(hold).await;
            let _ = tx.send(LiftCommand::CloseDoor { generation }).await;
        });
    }

    /// `CloseDoor`: the door-hold timer fired. This, not door-open, is where
    /// the order is cleared and reported complete — the cab is still
    /// carrying it for the whole time the door sits open.
    async fn close_door(&mut self, generation: u64) {
        if generation != self.generation || self.state != LiftState::DoorOpen {
            return;
        }
        let _ = self.driver.set_door_open_light(false).await;
        self.state = LiftState::Idle;

        let completed = self.order.take();
        if let Some(order) = completed {
            if self.order_complete_tx.send(order).await.is_err() {
                warn!("order-complete channel closed");
            }
        }
        self.report_position().await;
        info!("door closed, lift idle");
    }

    /// `NewOrder`: assignment of a call to this cab. Sets motion toward the
    /// order's floor and arms the motion-stuck watchdog timer. The order
    /// server is only supposed to dispatch while we're idle and empty, but
    /// we refuse anyway rather than silently clobbering an order in
    /// progress.
    async fn new_order(&mut self, order: Order) {
        if self.state == LiftState::Init {
            warn!("refusing order before initial floor is known");
            return;
        }
        if self.order.is_some() {
            warn!(order = %order.id, "refusing order, cab already busy");
            return;
        }
        let target = order.floor;
        self.order = Some(order);

        match self.floor {
            Some(f) if f == target => {
                self.open_door().await;
                return;
            }
            Some(f) if f < target => {
                self.dir = Some(Direction::Up);
            }
            _ => {
                self.dir = Some(Direction::Down);
            }
        }
        self.state = LiftState::Mooving;
        let _ = self.driver.set_motor_direction(self.dir).await;
        self.report_position().await;

        self.generation += 1;
        let generation = self.generation;
        let timeout = self.cfg.motion_stuck_timeout;
        let tx = self.motion_stuck_sender();
        tokio::spawn(async move {
            sleep(timeout).await;
            let _ = tx.send(LiftCommand::MotionStuck { generation }).await;
        });
    }

    async fn report_position(&self) {
        let _ = self
            .order_server_tx
            .send(OrderServerCommand::UpdateLiftPosition {
                position: self.position(),
            })
            .await;
    }

    /// Motion-stuck timer fired: the cab has not reached a new floor within
    /// the timeout. Per the error-handling design this is unrecoverable
    /// locally — signal a fault so the node can tear down the order server
    /// and restart with a clean queue.
    async fn motion_stuck(&mut self, generation: u64) {
        if generation != self.generation || self.state != LiftState::Mooving {
            return;
        }
        warn!("motion-stuck timeout fired, cab is unresponsive");
        let _ = self.fault_tx.send(LiftFault::MotionStuck).await;
    }

    // These two helper senders exist only so timer tasks can post back into
    // our own inbox; a real wiring keeps the Sender half around for this
    // purpose (see `run` callers in `bin/elevator_node.rs`).
    fn close_door_sender(&self) -> mpsc::Sender<LiftCommand> {
        self.self_tx.clone()
    }

    fn motion_stuck_sender(&self) -> mpsc::Sender<LiftCommand> {
        self.self_tx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NullDriver;
    use crate::order::{ButtonType, NodeId, OrderId};

    fn order(floor: u8) -> Order {
        Order::new(
            OrderId {
                origin: NodeId::new("a"),
                seq: 0,
            },
            floor,
            ButtonType::Cab,
            NodeId::new("a"),
            NodeId::new("a"),
            chrono::Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn at_floor_in_init_establishes_idle_state_and_reports_ready() {
        let driver: Arc<dyn Driver> = Arc::new(NullDriver::new());
        let (os_tx, mut os_rx) = mpsc::channel(8);
        let (oc_tx, _oc_rx) = mpsc::channel(8);
        let (fault_tx, _fault_rx) = mpsc::channel(8);
        let (self_tx, self_rx) = mpsc::channel(8);
        let mut actor = LiftActor::new(
            driver,
            LiftConfig {
                door_hold: Duration::from_millis(10),
                motion_stuck_timeout: Duration::from_millis(10),
            },
            os_tx,
            oc_tx,
            fault_tx,
            self_tx,
        );
        actor.at_floor(2).await;
        assert_eq!(actor.state, LiftState::Idle);
        assert_eq!(actor.floor, Some(2));

        assert!(matches!(
            os_rx.recv().await,
            Some(OrderServerCommand::UpdateLiftPosition { .. })
        ));
        assert!(matches!(
            os_rx.recv().await,
            Some(OrderServerCommand::LiftReady)
        ));
        drop(self_rx);
    }

    #[tokio::test]
    async fn new_order_at_current_floor_opens_door_then_completes_on_close() {
        let driver: Arc<dyn Driver> = Arc::new(NullDriver::new());
        let (os_tx, _os_rx) = mpsc::channel(8);
        let (oc_tx, mut oc_rx) = mpsc::channel(8);
        let (fault_tx, _fault_rx) = mpsc::channel(8);
        let (self_tx, _self_rx) = mpsc::channel(8);
        let mut actor = LiftActor::new(
            driver,
            LiftConfig {
                door_hold: Duration::from_millis(10),
                motion_stuck_timeout: Duration::from_millis(10),
            },
            os_tx,
            oc_tx,
            fault_tx,
            self_tx,
        );
        actor.at_floor(1).await;
        actor.new_order(order(1)).await;
        assert_eq!(actor.state, LiftState::DoorOpen);
        // The order is not complete yet: it's only cleared on CloseDoor.
        assert!(oc_rx.try_recv().is_err());
        assert!(actor.order.is_some());

        let generation = actor.generation;
        actor.close_door(generation).await;
        assert_eq!(actor.state, LiftState::Idle);
        assert!(actor.order.is_none());
        let completed = oc_rx.recv().await.unwrap();
        assert_eq!(completed.floor, 1);
    }

    #[tokio::test]
    async fn new_order_is_refused_while_cab_already_busy() {
        let driver: Arc<dyn Driver> = Arc::new(NullDriver::new());
        let (os_tx, _os_rx) = mpsc::channel(8);
        let (oc_tx, _oc_rx) = mpsc::channel(8);
        let (fault_tx, _fault_rx) = mpsc::channel(8);
        let (self_tx, _self_rx) = mpsc::channel(8);
        let mut actor = LiftActor::new(
            driver,
            LiftConfig {
                door_hold: Duration::from_millis(10),
                motion_stuck_timeout: Duration::from_millis(10),
            },
            os_tx,
            oc_tx,
            fault_tx,
            self_tx,
        );
        actor.at_floor(0).await;
        actor.new_order(order(3)).await;
        assert_eq!(actor.state, LiftState::Mooving);

        actor.new_order(order(1)).await;
        assert_eq!(actor.order.as_ref().unwrap().floor, 3);
    }
}
