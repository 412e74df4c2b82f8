//! Watchdog: arms a deadline for every order handed out by the auctioneer
//! and reinjects it if nobody reports completion in time. State is kept
//! resilient to a process crash by rewriting a backup file, in full, after
//! every mutation — write to a temp path then atomically rename, the same
//! crash-safety idiom the design notes call for.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::messages::WatchdogCommand;
use crate::order::{ButtonType, NodeId, Order, OrderId};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Backup {
    active: Vec<Order>,
    standby: Vec<Order>,
}

pub struct WatchdogConfig {
    pub deadline: Duration,
    pub backup_path: PathBuf,
    pub active_staleness: ChronoDuration,
    pub standby_staleness: ChronoDuration,
}

pub struct Watchdog {
    active: HashMap<OrderId, Order>,
    standby: HashMap<OrderId, Order>,
    /// Presence in this map means a deadline task is in flight for that
    /// order; the task itself checks `active` on fire so removing an entry
    /// here and from `active` together is how cancellation works, a
    /// lighter-weight stand-in for a cancellable timer handle.
    timers: HashMap<OrderId, ()>,
    cfg: WatchdogConfig,
    self_tx: mpsc::Sender<WatchdogCommand>,
    reinject_tx: mpsc::Sender<Order>,
}

impl Watchdog {
    pub fn new(
        cfg: WatchdogConfig,
        self_tx: mpsc::Sender<WatchdogCommand>,
        reinject_tx: mpsc::Sender<Order>,
    ) -> Self {
        Self {
            active: HashMap::new(),
            standby: HashMap::new(),
            timers: HashMap::new(),
            cfg,
            self_tx,
            reinject_tx,
        }
    }

    /// Boot-time replay: read the backup file, keep `active` entries newer
    /// than `active_staleness` and `standby` entries newer than
    /// `standby_staleness`, and arm fresh deadlines for every surviving
    /// active entry (firing immediately if its original deadline has
    /// already passed). Missing or corrupt backups start empty and log a
    /// warning rather than failing node startup.
    pub async fn replay_from_backup(&mut self) {
        let backup = match tokio::fs::read_to_string(&self.cfg.backup_path).await {
            Ok(contents) => match serde_json::from_str::<Backup>(&contents) {
                Ok(backup) => backup,
                Err(e) => {
                    warn!(error = %e, "watchdog backup corrupt, starting empty");
                    return;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no watchdog backup found, starting empty");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to read watchdog backup, starting empty");
                return;
            }
        };

        let now = Utc::now();
        for order in backup.active {
            if now - order.time <= self.cfg.active_staleness {
                self.arm(order);
            }
        }
        for order in backup.standby {
            if now - order.time <= self.cfg.standby_staleness {
                self.standby.insert(order.id.clone(), order);
            }
        }
        info!(
            active = self.active.len(),
            standby = self.standby.len(),
            "watchdog replayed backup"
        );
    }

    pub async fn run(mut self, mut inbox: mpsc::Receiver<WatchdogCommand>) {
        info!("watchdog started");
        while let Some(cmd) = inbox.recv().await {
            self.handle(cmd).await;
        }
        info!("watchdog shutting down");
    }

    async fn handle(&mut self, cmd: WatchdogCommand) {
        match cmd {
            WatchdogCommand::NewOrder(order) => {
                self.arm(order);
                self.persist().await;
            }
            WatchdogCommand::OrderComplete(id) => {
                self.disarm(&id);
                self.persist().await;
            }
            WatchdogCommand::Deadline(id) => {
                self.on_deadline(id).await;
                self.persist().await;
            }
            WatchdogCommand::PeerDown(node) => {
                self.on_peer_down(&node).await;
                self.persist().await;
            }
            WatchdogCommand::PeerUp(node) => {
                self.on_peer_up(&node).await;
                self.persist().await;
            }
        }
    }

    fn arm(&mut self, order: Order) {
        let id = order.id.clone();
        self.timers.insert(id.clone(), ());
        self.active.insert(id.clone(), order);

        let tx = self.self_tx.clone();
        let deadline = self.cfg.deadline;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = tx.send(WatchdogCommand::Deadline(id)).await;
        });
    }

    fn disarm(&mut self, id: &OrderId) {
        self.active.remove(id);
        self.timers.remove(id);
    }

    /// A deadline fired; if the order is still active (not a stale timer
    /// left over from a since-completed/cancelled order) reinject it and
    /// clear our own record, since re-auctioning is the auctioneer's job.
    async fn on_deadline(&mut self, id: OrderId) {
        if let Some(order) = self.active.remove(&id) {
            self.timers.remove(&id);
            warn!(order = %id, "watchdog deadline expired, reinjecting");
            let _ = self.reinject_tx.send(order).await;
        }
    }

    /// A peer went down: any order it was actually serving (`order.node`)
    /// can no longer make progress. Hall orders are reinjected immediately
    /// (any node can serve them), but cab orders can only ever be served by
    /// their owning node, so they move to standby until that node comes
    /// back. We key off `order.node`, not `watch_dog`, since the watcher may
    /// be a third node entirely — it's the *server* crashing that demands
    /// immediate action instead of waiting out the blind deadline.
    async fn on_peer_down(&mut self, node: &NodeId) {
        let stranded: Vec<OrderId> = self
            .active
            .iter()
            .filter(|(_, o)| &o.node == node)
            .map(|(id, _)| id.clone())
            .collect();

        for id in stranded {
            let Some(order) = self.active.remove(&id) else {
                continue;
            };
            self.timers.remove(&id);
            if order.button_type == ButtonType::Cab {
                info!(order = %id, %node, "cab order moved to standby for down peer");
                self.standby.insert(id, order);
            } else {
                warn!(order = %id, %node, "hall order reinjected after peer down");
                let _ = self.reinject_tx.send(order).await;
            }
        }
    }

    /// A previously-down peer is back: replay any standby cab orders it
    /// owns by reinjecting them through the normal auction path (trivial
    /// for cab orders, since only the owner bids).
    async fn on_peer_up(&mut self, node: &NodeId) {
        let owned: Vec<OrderId> = self
            .standby
            .iter()
            .filter(|(_, o)| &o.node == node)
            .map(|(id, _)| id.clone())
            .collect();
        for id in owned {
            if let Some(order) = self.standby.remove(&id) {
                info!(order = %id, %node, "replaying standby order for returning peer");
                let _ = self.reinject_tx.send(order).await;
            }
        }
    }

    async fn persist(&self) {
        let backup = Backup {
            active: self.active.values().cloned().collect(),
            standby: self.standby.values().cloned().collect(),
        };
        if let Err(e) = write_atomic(&self.cfg.backup_path, &backup).await {
            warn!(error = %e, "failed to persist watchdog backup");
        }
    }
}

async fn write_atomic(path: &Path, backup: &Backup) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(backup)?;
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
