//! The hardware/simulator boundary. `Driver` is the trait the lift actor
//! drives; `TcpDriver` talks to a real cab controller, `NullDriver` is an
//! in-memory stand-in for tests, mirroring the dry-run/live duality the
//! teacher uses for order execution (`Executor`'s `Option<AuthClient>`).

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::messages::Direction;
use crate::order::ButtonType;

/// Notifications a driver implementation pushes up to the lift actor and the
/// auctioneer.
#[derive(Debug, Clone, Copy)]
pub enum DriverEvent {
    FloorSensor(u8),
    ButtonPressed { floor: u8, button: ButtonType },
}

#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    async fn set_motor_direction(&self, dir: Option<Direction>) -> Result<()>;
    async fn set_door_open_light(&self, on: bool) -> Result<()>;
    async fn set_button_lamp(&self, floor: u8, on: bool) -> Result<()>;
}

/// Line-oriented TCP client for the cab controller / simulator socket.
/// Each command is written as a single newline-terminated line; no
/// acknowledgement is awaited beyond the write succeeding, matching the
/// fire-and-forget nature of motor/lamp commands described in the external
/// interface contract.
pub struct TcpDriver {
    write_half: tokio::sync::Mutex<tokio::net::tcp::OwnedWriteHalf>,
}

impl TcpDriver {
    pub async fn connect(addr: &str) -> Result<(Self, mpsc::Receiver<DriverEvent>)> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to driver at {addr}"))?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Some(event) = parse_driver_line(line.trim()) {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Ok((
            Self {
                write_half: tokio::sync::Mutex::new(write_half),
            },
            rx,
        ))
    }

    async fn send_line(&self, line: &str) -> Result<()> {
        let mut w = self.write_half.lock().await;
        w.write_all(line.as_bytes()).await?;
        w.write_all(b"\n").await?;
        Ok(())
    }
}

fn parse_driver_line(line: &str) -> Option<DriverEvent> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "floor_sensor" => parts.next()?.parse::<u8>().ok().map(DriverEvent::FloorSensor),
        "button_pressed" => {
            let floor = parts.next()?.parse::<u8>().ok()?;
            let button = match parts.next()? {
                "hall_up" => ButtonType::HallUp,
                "hall_down" => ButtonType::HallDown,
                "cab" => ButtonType::Cab,
                _ => return None,
            };
            Some(DriverEvent::ButtonPressed { floor, button })
        }
        _ => None,
    }
}

#[async_trait::async_trait]
impl Driver for TcpDriver {
    async fn set_motor_direction(&self, dir: Option<Direction>) -> Result<()> {
        let cmd = match dir {
            Some(Direction::Up) => "set_motor_direction up".to_string(),
            Some(Direction::Down) => "set_motor_direction down".to_string(),
            None => "set_motor_direction stop".to_string(),
        };
        self.send_line(&cmd).await
    }

    async fn set_door_open_light(&self, on: bool) -> Result<()> {
        self.send_line(&format!("set_door_open_light {}", on as u8))
            .await
    }

    async fn set_button_lamp(&self, floor: u8, on: bool) -> Result<()> {
        self.send_line(&format!("set_button_lamp {floor} {}", on as u8))
            .await
    }
}

/// Scriptable in-memory driver for tests: records every command it receives
/// and lets tests inject floor/button events on demand.
#[derive(Default)]
pub struct NullDriver {
    pub commands: tokio::sync::Mutex<Vec<String>>,
}

impl NullDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Driver for NullDriver {
    async fn set_motor_direction(&self, dir: Option<Direction>) -> Result<()> {
        self.commands
            .lock()
            .await
            .push(format!("motor:{dir:?}"));
        Ok(())
    }

    async fn set_door_open_light(&self, on: bool) -> Result<()> {
        self.commands.lock().await.push(format!("door_light:{on}"));
        Ok(())
    }

    async fn set_button_lamp(&self, floor: u8, on: bool) -> Result<()> {
        self.commands
            .lock()
            .await
            .push(format!("lamp:{floor}:{on}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_driver_records_commands() {
        let driver = NullDriver::new();
        driver.set_motor_direction(Some(Direction::Up)).await.unwrap();
        driver.set_door_open_light(true).await.unwrap();
        driver.set_button_lamp(2, true).await.unwrap();
        let log = driver.commands.lock().await;
        assert_eq!(log.len(), 3);
        assert!(log[0].contains("Up"));
    }

    #[test]
    fn parses_floor_sensor_line() {
        match parse_driver_line("floor_sensor 2") {
            Some(DriverEvent::FloorSensor(f)) => assert_eq!(f, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_button_pressed_line() {
        match parse_driver_line("button_pressed 1 hall_down") {
            Some(DriverEvent::ButtonPressed { floor, button }) => {
                assert_eq!(floor, 1);
                assert_eq!(button, ButtonType::HallDown);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ignores_unknown_lines() {
        assert!(parse_driver_line("garbage").is_none());
    }
}
