//! Speed command channel
//!
//! Turns a requested power percentage into exactly one register write and
//! reports the outcome as a [`CommandResult`]. Failures are values, never panics.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fanout::{EventHub, HubEvent};
use crate::link::MotorLink;
use crate::units::UnitConverter;

/// Outcome of one `set_motor_speed` call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_value: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    fn accepted(applied_percent: f64, register_value: u16) -> Self {
        Self {
            accepted: true,
            applied_percent: Some(applied_percent),
            register_value: Some(register_value),
            error: None,
        }
    }

    fn failed(applied_percent: f64, register_value: u16, error: String) -> Self {
        Self {
            accepted: false,
            applied_percent: Some(applied_percent),
            register_value: Some(register_value),
            error: Some(error),
        }
    }

    /// Rejected before any conversion
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            accepted: false,
            applied_percent: None,
            register_value: None,
            error: Some(error.into()),
        }
    }
}

/// Published on the hub after a successful write
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub applied_percent: f64,
    pub register_value: u16,
}

/// Coerce a client-supplied power value to a number.
///
/// Accepts JSON numbers and numeric strings. Everything else is an error.
pub fn parse_power(value: &Value) -> Result<f64, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(power) if power.is_finite() => Ok(power),
        _ => Err(format!("Invalid power value: {value}")),
    }
}

pub struct CommandChannel {
    link: Arc<MotorLink>,
    hub: EventHub,
    converter: UnitConverter,
    register: u16,
    // Held across write and publish so acks follow write order
    ack_lock: Arc<Mutex<()>>,
}

impl CommandChannel {
    pub fn new(link: Arc<MotorLink>, hub: EventHub, converter: UnitConverter, register: u16) -> Self {
        Self {
            link,
            hub,
            converter,
            register,
            ack_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn register(&self) -> u16 {
        self.register
    }

    pub async fn set_motor_speed(&self, requested: f64) -> CommandResult {
        if !requested.is_finite() {
            warn!("[CMD] rejected non-finite power {}", requested);
            return CommandResult::rejected(format!("Invalid power value: {requested}"));
        }

        let applied = self.converter.clamp_command(requested);
        let register_value = self.converter.register_from_percent(applied);
        if applied != requested {
            debug!("[CMD] power {} clamped to {}", requested, applied);
        }

        let link = Arc::clone(&self.link);
        let hub = self.hub.clone();
        let ack_lock = Arc::clone(&self.ack_lock);
        let register = self.register;
        // Write and ack finish together even if the requester goes away
        let command = tokio::spawn(async move {
            let _order = ack_lock.lock().await;
            match link.write_register(register, register_value).await {
                Ok(()) => {
                    info!(
                        "[CMD] speed {:.1}% -> reg {}={}",
                        applied, register, register_value
                    );
                    hub.publish(HubEvent::CommandAck(CommandAck {
                        applied_percent: applied,
                        register_value,
                    }));
                    CommandResult::accepted(applied, register_value)
                },
                Err(e) => {
                    warn!("[CMD] speed {:.1}% failed: {}", applied, e);
                    CommandResult::failed(applied, register_value, e.to_string())
                },
            }
        });

        match command.await {
            Ok(result) => result,
            Err(e) => CommandResult::failed(
                applied,
                register_value,
                format!("Command task aborted: {e}"),
            ),
        }
    }

    /// [`set_motor_speed`](Self::set_motor_speed) on an uncoerced client value
    pub async fn set_motor_speed_value(&self, value: &Value) -> CommandResult {
        match parse_power(value) {
            Ok(power) => self.set_motor_speed(power).await,
            Err(e) => {
                warn!("[CMD] {}", e);
                CommandResult::rejected(e)
            },
        }
    }
}
