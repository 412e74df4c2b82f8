//! Node entry point: wires up the four core actors (lift, order server,
//! distribution, watchdog) plus the discovery and RPC network layers, and
//! keeps them alive until the process is told to stop. Modeled on the
//! teacher's `bin/polymarket_v2.rs` — channel construction up front,
//! actors spawned into tracked `JoinHandle`s, one `tracing_subscriber`
//! initialized before anything else runs.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use elevator_coord::config::NodeConfig;
use elevator_coord::distribution::{Distribution, DistributionConfig};
use elevator_coord::driver::{Driver, DriverEvent, NullDriver, TcpDriver};
use elevator_coord::lift::{LiftActor, LiftConfig, LiftFault};
use elevator_coord::messages::{
    LiftCommand, OrderServerCommand, PeerEvent, RpcRequest, RpcResponse, WatchdogCommand,
};
use elevator_coord::network::discovery::{self, DiscoveryConfig};
use elevator_coord::network::peers::PeerRegistry;
use elevator_coord::network::rpc::{self, RpcClient, TcpRpcClient};
use elevator_coord::order::OrderKey;
use elevator_coord::order_server::OrderServer;
use elevator_coord::watchdog::{Watchdog, WatchdogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = NodeConfig::from_args_and_env(&args)?;
    info!(node = %cfg.node_id, udp_port = cfg.udp_port, rpc_port = cfg.rpc_port, "starting elevator node");

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // --- channels ---
    let (lift_tx, lift_rx) = mpsc::channel::<LiftCommand>(64);
    let (order_server_tx, order_server_rx) = mpsc::channel::<OrderServerCommand>(64);
    let (watchdog_tx, watchdog_rx) = mpsc::channel::<WatchdogCommand>(64);
    let (order_complete_tx, mut order_complete_rx) = mpsc::channel(16);
    let (lift_fault_tx, mut lift_fault_rx) = mpsc::channel::<LiftFault>(4);
    let (peer_event_tx, mut peer_event_rx) = mpsc::channel::<PeerEvent>(16);
    let (watchdog_new_order_tx, mut watchdog_new_order_rx) = mpsc::channel(16);
    let (reinject_tx, mut reinject_rx) = mpsc::channel(16);

    let peers = Arc::new(PeerRegistry::new());
    let rpc_client: Arc<dyn RpcClient> = Arc::new(TcpRpcClient::new(peers.clone()));

    // --- driver: a real cab controller/simulator if one is configured,
    // otherwise an in-memory stand-in that never produces events and so
    // never leaves `Init`. ---
    let (driver, driver_events): (Arc<dyn Driver>, Option<mpsc::Receiver<DriverEvent>>) =
        match &cfg.driver_addr {
            Some(addr) => {
                let (tcp_driver, events) = TcpDriver::connect(addr).await?;
                (Arc::new(tcp_driver), Some(events))
            }
            None => {
                warn!("no ELEVATOR_DRIVER_ADDR configured, running with NullDriver");
                (Arc::new(NullDriver::new()), None)
            }
        };

    // --- lift actor ---
    let lift_actor = LiftActor::new(
        driver,
        LiftConfig {
            door_hold: cfg.door_hold,
            motion_stuck_timeout: cfg.motion_stuck_timeout,
        },
        order_server_tx.clone(),
        order_complete_tx,
        lift_fault_tx,
        lift_tx.clone(),
    );
    handles.push(tokio::spawn(lift_actor.run(lift_rx)));

    // --- order server ---
    // `LiftReady` and the first cached position come from the Lift itself
    // once it has seen a real floor sensor reading, not asserted here.
    let order_server = OrderServer::new(lift_tx.clone());
    handles.push(tokio::spawn(order_server.run(order_server_rx)));

    // --- watchdog ---
    let mut watchdog = Watchdog::new(
        WatchdogConfig {
            deadline: cfg.watchdog_deadline,
            backup_path: cfg.backup_path.clone().into(),
            active_staleness: chrono::Duration::from_std(cfg.active_staleness)?,
            standby_staleness: chrono::Duration::from_std(cfg.standby_staleness)?,
        },
        watchdog_tx.clone(),
        reinject_tx.clone(),
    );
    watchdog.replay_from_backup().await;
    handles.push(tokio::spawn(watchdog.run(watchdog_rx)));

    // --- distribution / auctioneer ---
    let distribution = Arc::new(Distribution::new(
        cfg.node_id.clone(),
        peers.clone(),
        rpc_client.clone(),
        DistributionConfig {
            bid_deadline: cfg.bid_deadline,
            rpc_deadline: cfg.rpc_deadline,
        },
        order_server_tx.clone(),
        watchdog_new_order_tx,
    ));

    // --- driver events: the only path by which external input (floor
    // sensors, button presses) enters the system. A floor sensor reading
    // goes straight to the Lift; a button press is turned into an auctioned
    // order. ---
    if let Some(mut events) = driver_events {
        let lift_tx = lift_tx.clone();
        let distribution = distribution.clone();
        handles.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    DriverEvent::FloorSensor(floor) => {
                        let _ = lift_tx.send(LiftCommand::AtFloor { floor }).await;
                    }
                    DriverEvent::ButtonPressed { floor, button } => {
                        if let Err(e) = distribution.new_order(floor, button).await {
                            error!(error = %e, "failed to create order from button press");
                        }
                    }
                }
            }
        }));
    }

    // --- discovery ---
    let discovery_cfg = Arc::new(DiscoveryConfig {
        node_id: cfg.node_id.clone(),
        udp_port: cfg.udp_port,
        rpc_port: cfg.rpc_port,
        cookie: cfg.discovery_cookie.clone(),
        beacon_interval: cfg.discovery_interval,
        peer_timeout: cfg.peer_timeout,
    });
    {
        let discovery_cfg = discovery_cfg.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = discovery::broadcast(discovery_cfg).await {
                error!(error = %e, "discovery broadcaster exited");
            }
        }));
    }
    {
        let discovery_cfg = discovery_cfg.clone();
        let peers = peers.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = discovery::listen(discovery_cfg, peers, peer_event_tx).await {
                error!(error = %e, "discovery listener exited");
            }
        }));
    }

    // --- rpc listener ---
    let (rpc_handler_tx, mut rpc_handler_rx) = mpsc::channel(64);
    {
        let rpc_addr = format!("0.0.0.0:{}", cfg.rpc_port);
        handles.push(tokio::spawn(async move {
            if let Err(e) = rpc::serve(&rpc_addr, rpc_handler_tx).await {
                error!(error = %e, "rpc listener exited");
            }
        }));
    }

    // --- RPC request router: decodes requests and dispatches into the
    // local order server / distribution / watchdog, mirroring what a peer
    // calling us remotely expects to happen locally. ---
    {
        let order_server_tx = order_server_tx.clone();
        let watchdog_tx = watchdog_tx.clone();
        handles.push(tokio::spawn(async move {
            while let Some((req, reply)) = rpc_handler_rx.recv().await {
                let resp = match req {
                    RpcRequest::EvaluateCost { order } => {
                        let (tx, rx) = tokio::sync::oneshot::channel();
                        if order_server_tx
                            .send(OrderServerCommand::EvaluateCost { order, reply: tx })
                            .await
                            .is_ok()
                        {
                            match rx.await {
                                Ok(cost) => RpcResponse::Cost(cost),
                                Err(_) => RpcResponse::Ack,
                            }
                        } else {
                            RpcResponse::Ack
                        }
                    }
                    RpcRequest::NewOrder { order, .. } => {
                        // Dispatch goes through the order server, not straight
                        // to the Lift: only it knows whether the Lift is idle
                        // right now, and queues the order otherwise.
                        let _ = order_server_tx
                            .send(OrderServerCommand::NewOrder { order })
                            .await;
                        RpcResponse::Ack
                    }
                    RpcRequest::WatchdogNewOrder { order } => {
                        let _ = watchdog_tx.send(WatchdogCommand::NewOrder(order)).await;
                        RpcResponse::Ack
                    }
                };
                let _ = reply.send(resp);
            }
        }));
    }

    // --- glue tasks: forward internal events between actors ---
    {
        let order_server_tx = order_server_tx.clone();
        let watchdog_tx = watchdog_tx.clone();
        handles.push(tokio::spawn(async move {
            while let Some(order) = order_complete_rx.recv().await {
                let key: OrderKey = order.key();
                let _ = order_server_tx
                    .send(OrderServerCommand::OrderComplete { key })
                    .await;
                let _ = watchdog_tx
                    .send(WatchdogCommand::OrderComplete(order.id))
                    .await;
            }
        }));
    }
    {
        let watchdog_tx = watchdog_tx.clone();
        handles.push(tokio::spawn(async move {
            while let Some(order) = watchdog_new_order_rx.recv().await {
                let _ = watchdog_tx.send(WatchdogCommand::NewOrder(order)).await;
            }
        }));
    }
    {
        let distribution = distribution.clone();
        handles.push(tokio::spawn(async move {
            while let Some(order) = reinject_rx.recv().await {
                if let Err(e) = distribution.new_order(order.floor, order.button_type).await {
                    error!(error = %e, "failed to reinject order");
                }
            }
        }));
    }
    {
        let watchdog_tx = watchdog_tx.clone();
        handles.push(tokio::spawn(async move {
            while let Some(event) = peer_event_rx.recv().await {
                let cmd = match event {
                    PeerEvent::PeerUp(node) => WatchdogCommand::PeerUp(node),
                    PeerEvent::PeerDown(node) => WatchdogCommand::PeerDown(node),
                };
                let _ = watchdog_tx.send(cmd).await;
            }
        }));
    }

    // A stuck cab is unrecoverable locally: log it and exit so a process
    // supervisor can restart us with a clean queue, per the error-handling
    // design.
    tokio::select! {
        Some(LiftFault::MotionStuck) = lift_fault_rx.recv() => {
            warn!("motion-stuck fault observed, restarting process");
            std::process::exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
        }
    }

    for handle in handles {
        handle.abort();
    }
    Ok(())
}
