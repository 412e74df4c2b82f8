pub mod config;
pub mod distribution;
pub mod driver;
pub mod lift;
pub mod messages;
pub mod network;
pub mod order;
pub mod order_server;
pub mod watchdog;

/// Number of floors served by every cab. A compile-time constant because
/// mixed-height fleets are not a supported deployment shape.
pub const FLOOR_COUNT: u8 = 4;
