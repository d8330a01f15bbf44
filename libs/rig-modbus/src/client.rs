//! Register-level client
//!
//! [`RegisterTransport`] is the seam between the motor link state machine and
//! the wire. [`LinkConnector`] produces a fresh transport per session so the
//! state machine never touches sockets directly.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionParams, ModbusTcpConnection};
use crate::constants::MODBUS_RESPONSE_BUFFER_SIZE;
use crate::error::{LinkError, Result};
use crate::pdu::ModbusPdu;
use crate::transport::MbapFramer;

/// Holding-register access on an established session
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    /// FC03: read `count` consecutive holding registers starting at `address`
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;

    /// FC06: write one holding register
    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()>;

    /// Release the session. Default does nothing.
    async fn close(&mut self) {}
}

/// Opens a new session (TCP connect plus unit handshake)
#[async_trait]
pub trait LinkConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RegisterTransport>>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// Modbus TCP session bound to one unit id
#[derive(Debug)]
pub struct TcpRegisterClient {
    connection: ModbusTcpConnection,
    framer: MbapFramer,
    params: ConnectionParams,
    buffer: Vec<u8>,
}

impl TcpRegisterClient {
    /// Connect and bind the unit id. Does not run the probe.
    pub async fn connect(params: ConnectionParams) -> Result<Self> {
        params.validate()?;
        let connection =
            ModbusTcpConnection::connect(&params.host, params.port, params.timeout).await?;
        Ok(Self {
            connection,
            framer: MbapFramer::new(params.unit_id),
            params,
            buffer: vec![0u8; MODBUS_RESPONSE_BUFFER_SIZE],
        })
    }

    pub fn unit_id(&self) -> u8 {
        self.framer.unit_id()
    }

    /// One request/response exchange
    async fn send_and_receive(&mut self, request: &ModbusPdu) -> Result<ModbusPdu> {
        let frame = self.framer.build_frame(request);
        self.connection.send(&frame).await?;

        let size = self
            .connection
            .receive(&mut self.buffer, self.params.timeout)
            .await?;
        self.framer.parse_frame(&self.buffer[..size])
    }
}

#[async_trait]
impl RegisterTransport for TcpRegisterClient {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let request = ModbusPdu::read_holding_registers(address, count)?;
        let response = self.send_and_receive(&request).await?;
        let registers = response.parse_read_response(count)?;
        debug!("FC03 {}x{} -> {:?}", address, count, registers);
        Ok(registers)
    }

    async fn write_single_register(&mut self, address: u16, value: u16) -> Result<()> {
        let request = ModbusPdu::write_single_register(address, value)?;
        let response = self.send_and_receive(&request).await?;
        response.parse_write_response(address, value)?;
        debug!("FC06 {} <- {}", address, value);
        Ok(())
    }

    async fn close(&mut self) {
        self.connection.shutdown().await;
    }
}

/// Connector for a real Modbus TCP motor controller
#[derive(Debug, Clone)]
pub struct TcpConnector {
    params: ConnectionParams,
}

impl TcpConnector {
    pub fn new(params: ConnectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

#[async_trait]
impl LinkConnector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn RegisterTransport>> {
        let mut client = TcpRegisterClient::connect(self.params.clone()).await?;

        if let Some(register) = self.params.probe_register {
            // An exception still proves the unit is answering
            match client.read_holding_registers(register, 1).await {
                Ok(_) => {},
                Err(e @ LinkError::Exception { .. }) => {
                    warn!("Probe unit {}: {}", client.unit_id(), e);
                },
                Err(e) => {
                    client.close().await;
                    return Err(LinkError::Connection(format!(
                        "Handshake with unit {} failed: {e}",
                        self.params.unit_id
                    )));
                },
            }
        }

        info!(
            "Session open: {} unit={}",
            self.params.address(),
            self.params.unit_id
        );
        Ok(Box::new(client))
    }

    fn endpoint(&self) -> String {
        format!("{} unit={}", self.params.address(), self.params.unit_id)
    }
}
