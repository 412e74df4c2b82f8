//! Node configuration: CLI-provided identity plus environment-tunable
//! timings, following the teacher's `Config::from_env()` convention.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::order::NodeId;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: NodeId,
    pub udp_port: u16,
    pub rpc_port: u16,
    pub discovery_cookie: String,
    pub discovery_interval: Duration,
    pub peer_timeout: Duration,
    pub door_hold: Duration,
    pub motion_stuck_timeout: Duration,
    pub bid_deadline: Duration,
    pub rpc_deadline: Duration,
    pub watchdog_deadline: Duration,
    pub backup_path: String,
    pub active_staleness: Duration,
    pub standby_staleness: Duration,
    /// Address of a real cab controller/simulator socket, e.g. `localhost:15657`.
    /// When unset the node runs with `NullDriver` and never leaves `Init`.
    pub driver_addr: Option<String>,
}

fn env_duration_ms(key: &str, default_ms: u64) -> Result<Duration> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_millis)
            .with_context(|| format!("{key} must be an integer number of milliseconds")),
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}

impl NodeConfig {
    /// Builds config from the two mandated positional CLI args (node name,
    /// UDP discovery port) plus optional environment overrides for every
    /// timing constant. No other flags are accepted, per the external
    /// interface contract.
    pub fn from_args_and_env(args: &[String]) -> Result<Self> {
        if args.len() != 2 {
            bail!("usage: elevator_node <node-name> <udp-port>");
        }
        let node_id = NodeId::new(args[0].clone());
        let udp_port: u16 = args[1]
            .parse()
            .with_context(|| format!("invalid udp port: {}", args[1]))?;
        let rpc_port = std::env::var("ELEVATOR_RPC_PORT")
            .ok()
            .map(|v| v.parse::<u16>())
            .transpose()
            .context("ELEVATOR_RPC_PORT must be a u16")?
            .unwrap_or(udp_port + 1);

        Ok(Self {
            node_id,
            udp_port,
            rpc_port,
            discovery_cookie: std::env::var("ELEVATOR_DISCOVERY_COOKIE")
                .unwrap_or_else(|_| "elevator-fleet".to_string()),
            discovery_interval: env_duration_ms("ELEVATOR_DISCOVERY_INTERVAL_MS", 1_000)?,
            peer_timeout: env_duration_ms("ELEVATOR_PEER_TIMEOUT_MS", 3_000)?,
            door_hold: env_duration_ms("ELEVATOR_DOOR_HOLD_MS", 2_000)?,
            motion_stuck_timeout: env_duration_ms("ELEVATOR_MOTION_STUCK_MS", 3_000)?,
            bid_deadline: env_duration_ms("ELEVATOR_BID_DEADLINE_MS", 1_000)?,
            rpc_deadline: env_duration_ms("ELEVATOR_RPC_DEADLINE_MS", 1_000)?,
            watchdog_deadline: env_duration_ms("ELEVATOR_WATCHDOG_DEADLINE_MS", 30_000)?,
            backup_path: std::env::var("ELEVATOR_BACKUP_PATH")
                .unwrap_or_else(|_| "watchdog_backup.txt".to_string()),
            active_staleness: env_duration_ms("ELEVATOR_ACTIVE_STALENESS_MS", 120_000)?,
            standby_staleness: env_duration_ms("ELEVATOR_STANDBY_STALENESS_MS", 600_000)?,
            driver_addr: std::env::var("ELEVATOR_DRIVER_ADDR").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_port() {
        let cfg =
            NodeConfig::from_args_and_env(&["elevator-a".to_string(), "20000".to_string()])
                .unwrap();
        assert_eq!(cfg.node_id, NodeId::new("elevator-a"));
        assert_eq!(cfg.udp_port, 20000);
        assert_eq!(cfg.rpc_port, 20001);
    }

    #[test]
    fn rejects_wrong_arg_count() {
        assert!(NodeConfig::from_args_and_env(&["only-one".to_string()]).is_err());
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(NodeConfig::from_args_and_env(&[
            "elevator-a".to_string(),
            "not-a-port".to_string()
        ])
        .is_err());
    }
}
