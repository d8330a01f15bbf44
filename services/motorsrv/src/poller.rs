//! Telemetry polling loop
//!
//! Reads the RPM and torque registers once per interval while the link is
//! Connected and publishes one converted sample per successful cycle. A
//! failed cycle is not retried: the poller backs off for the cooldown,
//! faults the session it was using and waits for the supervisor to bring
//! the link back.

use std::sync::Arc;
use std::time::Duration;

use rig_modbus::{LinkError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fanout::{EventHub, HubEvent};
use crate::link::{LinkStatus, MotorLink};
use crate::units::UnitConverter;

/// One converted telemetry reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub rpm: i64,
    pub torque: i64,
    /// Speed as percent of the rig's range, in [0, 100]
    pub percent: f64,
}

/// Holding register addresses on the drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMap {
    pub rpm: u16,
    pub torque: u16,
    /// Speed setpoint; the drive shares it with the RPM readback
    pub speed_command: u16,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            rpm: 100,
            torque: 120,
            speed_command: 100,
        }
    }
}

pub struct TelemetryPoller {
    link: Arc<MotorLink>,
    hub: EventHub,
    converter: UnitConverter,
    registers: RegisterMap,
    interval: Duration,
    cooldown: Duration,
}

impl TelemetryPoller {
    pub fn new(
        link: Arc<MotorLink>,
        hub: EventHub,
        converter: UnitConverter,
        registers: RegisterMap,
        interval: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            link,
            hub,
            converter,
            registers,
            interval,
            cooldown,
        }
    }

    async fn read_one(&self, address: u16) -> Result<u16> {
        let values = self.link.read_registers(address, 1).await?;
        values
            .first()
            .copied()
            .ok_or_else(|| LinkError::protocol(format!("Empty read of register {address}")))
    }

    /// One cycle: RPM first, then torque
    pub async fn poll_once(&self) -> Result<TelemetrySample> {
        let raw_rpm = self.read_one(self.registers.rpm).await?;
        let raw_torque = self.read_one(self.registers.torque).await?;
        Ok(self.converter.sample(raw_rpm, raw_torque))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut state_rx = self.link.subscribe_state();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles: u64 = 0;

        info!(
            "Poller started: interval {}ms, registers rpm={} torque={}",
            self.interval.as_millis(),
            self.registers.rpm,
            self.registers.torque
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.link.state().is_connected() {
                if !wait_connected(&mut state_rx, &cancel).await {
                    break;
                }
                ticker.reset();
                continue;
            }

            let session = self.link.session_id();
            match self.poll_once().await {
                Ok(sample) => {
                    cycles += 1;
                    let delivered = self.hub.publish(HubEvent::Telemetry(sample));
                    debug!(
                        "Poll #{}: rpm={} torque={} pct={:.1} -> {} subscribers",
                        cycles, sample.rpm, sample.torque, sample.percent, delivered
                    );
                },
                Err(e) => {
                    warn!("Poll failed: {}", e);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.cooldown) => {}
                    }
                    self.link
                        .mark_session_faulted(session, format!("Telemetry read failed: {e}"))
                        .await;
                    if !wait_connected(&mut state_rx, &cancel).await {
                        break;
                    }
                    ticker.reset();
                },
            }
        }

        info!("Poller stopped after {} samples", cycles);
    }
}

/// False if cancelled or the link is gone
async fn wait_connected(
    state_rx: &mut watch::Receiver<LinkStatus>,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        result = state_rx.wait_for(|status| status.state.is_connected()) => result.is_ok(),
    }
}
