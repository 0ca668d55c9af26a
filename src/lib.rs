//! Environmental sensor node: BLE beacon scanning, local sensors and MQTT
//! telemetry driven by a single cooperative loop.

pub mod bluetooth;
pub mod board;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod indicator;
pub mod mock;
pub mod models;
pub mod mqtt;
pub mod node;
pub mod scheduler;
pub mod telemetry;
pub mod utils;
pub mod watchdog;
