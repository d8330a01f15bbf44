//! In-process Modbus TCP motor controller
//!
//! Serves FC03/FC06 against a holding-register table on `127.0.0.1:0`.
//! Used by integration tests of this crate and of `motorsrv`.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER, MBAP_HEADER_LEN,
    MODBUS_MAX_READ_REGISTERS,
};

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_DATA_VALUE: u8 = 0x03;

#[derive(Debug, Default)]
struct SimulatorState {
    registers: HashMap<u16, u16>,
    writes: Vec<(u16, u16)>,
    exception_addresses: HashSet<u16>,
    /// Close every connection on its next request
    drop_connections: bool,
    /// Held before every response goes out
    response_delay: Duration,
    requests: u64,
}

/// Running simulator. The listener stops when this is dropped.
#[derive(Debug)]
pub struct RigSimulator {
    addr: SocketAddr,
    unit_id: u8,
    state: Arc<RwLock<SimulatorState>>,
    accept_task: JoinHandle<()>,
}

impl RigSimulator {
    pub async fn start(unit_id: u8) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(RwLock::new(SimulatorState::default()));
        info!("Simulator listening on {}", addr);

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        debug!("Simulator accept: {}", e);
                        continue;
                    },
                };
                debug!("Simulator client {}", peer);
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, unit_id, state).await {
                        debug!("Simulator client {}: {}", peer, e);
                    }
                });
            }
        });

        Ok(Self {
            addr,
            unit_id,
            state,
            accept_task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub async fn set_register(&self, address: u16, value: u16) {
        self.state.write().await.registers.insert(address, value);
    }

    pub async fn register(&self, address: u16) -> Option<u16> {
        self.state.read().await.registers.get(&address).copied()
    }

    /// Every FC06 accepted so far, in arrival order
    pub async fn writes(&self) -> Vec<(u16, u16)> {
        self.state.read().await.writes.clone()
    }

    pub async fn request_count(&self) -> u64 {
        self.state.read().await.requests
    }

    /// Answer requests touching `address` with ILLEGAL DATA ADDRESS
    pub async fn fail_address(&self, address: u16) {
        self.state.write().await.exception_addresses.insert(address);
    }

    /// Simulate a dead controller: sessions are closed on their next request
    pub async fn set_drop_connections(&self, drop: bool) {
        self.state.write().await.drop_connections = drop;
    }

    /// Slow controller: answer each request only after `delay`
    pub async fn set_response_delay(&self, delay: Duration) {
        self.state.write().await.response_delay = delay;
    }
}

impl Drop for RigSimulator {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn handle_client(
    mut stream: TcpStream,
    unit_id: u8,
    state: Arc<RwLock<SimulatorState>>,
) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(1024);

    loop {
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }

        while buffer.len() > MBAP_HEADER_LEN {
            let length = u16::from_be_bytes([buffer[4], buffer[5]]) as usize;
            let frame_length = MBAP_HEADER_LEN + length;
            if buffer.len() < frame_length {
                break;
            }
            let frame = buffer.split_to(frame_length);

            let (response, delay) = {
                let mut state = state.write().await;
                state.requests += 1;
                if state.drop_connections {
                    return Ok(());
                }
                (process_request(&frame, unit_id, &mut state), state.response_delay)
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(response) = response {
                stream.write_all(&response).await?;
                stream.flush().await?;
            }
        }
    }
}

/// Build the response frame; `None` means the request is silently ignored
fn process_request(frame: &[u8], unit_id: u8, state: &mut SimulatorState) -> Option<Vec<u8>> {
    if frame.len() < MBAP_HEADER_LEN + 2 || frame[2] != 0 || frame[3] != 0 {
        return None;
    }
    // Other units on the bus stay silent
    if frame[6] != unit_id {
        return None;
    }

    let pdu = &frame[MBAP_HEADER_LEN + 1..];
    let function = pdu[0];
    let response_pdu = match function {
        FC_READ_HOLDING_REGISTERS if pdu.len() == 5 => {
            let start = u16::from_be_bytes([pdu[1], pdu[2]]);
            let count = u16::from_be_bytes([pdu[3], pdu[4]]);
            let touches_failing =
                (0..count).any(|i| state.exception_addresses.contains(&start.wrapping_add(i)));
            if count == 0 || count > MODBUS_MAX_READ_REGISTERS {
                vec![function | EXCEPTION_FLAG, ILLEGAL_DATA_VALUE]
            } else if touches_failing {
                vec![function | EXCEPTION_FLAG, ILLEGAL_DATA_ADDRESS]
            } else {
                let mut out = vec![function, (count * 2) as u8];
                for i in 0..count {
                    let value = state
                        .registers
                        .get(&start.wrapping_add(i))
                        .copied()
                        .unwrap_or(0);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                out
            }
        },
        FC_WRITE_SINGLE_REGISTER if pdu.len() == 5 => {
            let address = u16::from_be_bytes([pdu[1], pdu[2]]);
            let value = u16::from_be_bytes([pdu[3], pdu[4]]);
            if state.exception_addresses.contains(&address) {
                vec![function | EXCEPTION_FLAG, ILLEGAL_DATA_ADDRESS]
            } else {
                state.registers.insert(address, value);
                state.writes.push((address, value));
                pdu.to_vec()
            }
        },
        _ => vec![function | EXCEPTION_FLAG, ILLEGAL_FUNCTION],
    };

    let mut response = Vec::with_capacity(MBAP_HEADER_LEN + 1 + response_pdu.len());
    response.extend_from_slice(&frame[0..4]);
    response.extend_from_slice(&((response_pdu.len() + 1) as u16).to_be_bytes());
    response.push(unit_id);
    response.extend_from_slice(&response_pdu);
    Some(response)
}
