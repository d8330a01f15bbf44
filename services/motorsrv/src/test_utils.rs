//! In-memory motor rig for tests
//!
//! [`FakeRig`] stands in for the drive behind a [`LinkConnector`]: a register
//! file, scripted connect/read/write failures, an offline switch and a
//! per-operation latency. Operations record how many ran concurrently.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig_modbus::{LinkConnector, LinkError, RegisterTransport, Result};
use tokio::sync::Mutex;

#[derive(Default)]
struct RigState {
    registers: HashMap<u16, u16>,
    connect_failures: usize,
    read_failures: VecDeque<LinkError>,
    write_failures: VecDeque<LinkError>,
    offline: bool,
    latency: Duration,
    writes: Vec<(u16, u16)>,
    reads: u64,
    connects: u64,
    closed: u64,
    in_flight: u32,
    max_in_flight: u32,
}

/// Shared handle to a fake rig
#[derive(Clone, Default)]
pub struct FakeRig {
    state: Arc<Mutex<RigState>>,
}

impl FakeRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn LinkConnector> {
        Arc::new(FakeConnector { rig: self.clone() })
    }

    pub async fn set_register(&self, address: u16, value: u16) {
        self.state.lock().await.registers.insert(address, value);
    }

    pub async fn register(&self, address: u16) -> Option<u16> {
        self.state.lock().await.registers.get(&address).copied()
    }

    pub async fn fail_next_connects(&self, count: usize) {
        self.state.lock().await.connect_failures += count;
    }

    pub async fn fail_next_reads(&self, errors: impl IntoIterator<Item = LinkError>) {
        self.state.lock().await.read_failures.extend(errors);
    }

    pub async fn fail_next_writes(&self, errors: impl IntoIterator<Item = LinkError>) {
        self.state.lock().await.write_failures.extend(errors);
    }

    /// Offline: connects are refused and every operation fails with an I/O error
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    pub async fn writes(&self) -> Vec<(u16, u16)> {
        self.state.lock().await.writes.clone()
    }

    pub async fn read_count(&self) -> u64 {
        self.state.lock().await.reads
    }

    pub async fn connect_count(&self) -> u64 {
        self.state.lock().await.connects
    }

    pub async fn closed_sessions(&self) -> u64 {
        self.state.lock().await.closed
    }

    pub async fn max_in_flight(&self) -> u32 {
        self.state.lock().await.max_in_flight
    }

    async fn begin_op(&self) -> Duration {
        let mut state = self.state.lock().await;
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        state.latency
    }

    async fn end_op(&self) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

struct FakeConnector {
    rig: FakeRig,
}

#[async_trait]
impl LinkConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn RegisterTransport>> {
        let mut state = self.rig.state.lock().await;
        state.connects += 1;
        if state.offline {
            return Err(LinkError::connection("Connection refused (rig offline)"));
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(LinkError::connection("Connection refused"));
        }
        Ok(Box::new(FakeTransport {
            rig: self.rig.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        "fake-rig unit=1".to_string()
    }
}

struct FakeTransport {
    rig: FakeRig,
}

#[async_trait]
impl RegisterTransport for FakeTransport {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let latency = self.rig.begin_op().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let mut state = self.rig.state.lock().await;
            state.reads += 1;
            if state.offline {
                Err(LinkError::io("Connection reset by peer"))
            } else if let Some(err) = state.read_failures.pop_front() {
                Err(err)
            } else {
                Ok((0..count)
                    .map(|i| {
                        state
                            .registers
                            .get(&address.wrapping_add(i))
                            .copied()
                            .unwrap_or(0)
                    })
                    .collect())
            }
        };

        self.rig.end_op().await;
        result
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        let latency = self.rig.begin_op().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let mut state = self.rig.state.lock().await;
            if state.offline {
                Err(LinkError::io("Connection reset by peer"))
            } else if let Some(err) = state.write_failures.pop_front() {
                Err(err)
            } else {
                state.writes.push((address, value));
                state.registers.insert(address, value);
                Ok(())
            }
        };

        self.rig.end_op().await;
        result
    }

    async fn close(&mut self) {
        self.rig.state.lock().await.closed += 1;
    }
}
