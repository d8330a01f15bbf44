//! MotorSrv Library
//!
//! Telemetry and speed-command bridge for the motor rig.
//!
//! ## Architecture
//!
//! - `link`: the one Modbus session, its state machine and reconnect supervisor
//! - `poller`: reads RPM and torque every interval and publishes samples
//! - `command`: clamps a power request and writes the speed register
//! - `fanout`: broadcast hub feeding every WebSocket client
//! - `units`: raw register <-> physical unit conversion
//! - `api`: REST and WebSocket routes

// Core modules
pub mod api;
pub mod command;
pub mod config;
pub mod error;
pub mod fanout;
pub mod link;
pub mod poller;
pub mod reconnect;
pub mod service;
pub mod units;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used types
pub use command::{parse_power, CommandAck, CommandChannel, CommandResult};
pub use config::MotorSrvConfig;
pub use error::{MotorSrvError, Result};
pub use fanout::{EventHub, HubEvent, RecvError, Subscription, Topic};
pub use link::{LinkState, LinkStatus, MotorLink};
pub use poller::{RegisterMap, TelemetryPoller, TelemetrySample};
pub use reconnect::{ReconnectHelper, ReconnectPolicy, ReconnectStats};
pub use service::MotorService;
pub use units::{ScalingConfig, UnitConverter};
