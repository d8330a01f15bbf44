//! Modbus TCP socket handling
//!
//! A thin wrapper around [`TcpStream`] that knows how to read one complete
//! MBAP frame. Every socket operation is bounded by a timeout.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{LinkError, Result};

/// Connection parameters for one motor controller
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Bound for connect and for each request/response exchange
    pub timeout: Duration,
    /// Register read once after connect to confirm the unit answers
    pub probe_register: Option<u16>,
}

impl ConnectionParams {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(LinkError::Config("TCP host not specified".to_string()));
        }
        if self.port == 0 {
            return Err(LinkError::Config("TCP port must be non-zero".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(LinkError::Config("Timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Open Modbus TCP socket
#[derive(Debug)]
pub struct ModbusTcpConnection {
    stream: TcpStream,
    peer: String,
}

impl ModbusTcpConnection {
    /// Open a TCP connection within `timeout_duration`
    pub async fn connect(host: &str, port: u16, timeout_duration: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(timeout_duration, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                Ok(Self { stream, peer: addr })
            },
            Ok(Err(e)) => {
                warn!("TCP err: {} - {}", addr, e);
                Err(LinkError::Connection(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(LinkError::Timeout(format!(
                    "Connection to {addr} timed out"
                )))
            },
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await.map_err(|e| {
            error!("TCP TX: {}", e);
            LinkError::Io(format!("TCP send error: {e}"))
        })?;
        debug!("TCP TX: {}B", data.len());
        Ok(())
    }

    /// Receive exactly one MBAP frame into `buffer`, returning its size
    pub async fn receive(&mut self, buffer: &mut [u8], timeout_duration: Duration) -> Result<usize> {
        let mut header = [0u8; MBAP_HEADER_LEN];
        match timeout(timeout_duration, self.stream.read_exact(&mut header)).await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => {
                error!("TCP header RX: {}", e);
                return Err(LinkError::Io(format!("TCP header read error: {e}")));
            },
            Err(_) => {
                debug!("TCP header timeout");
                return Err(LinkError::Timeout("TCP header read timeout".to_string()));
            },
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length == 0 || length > MAX_MBAP_LENGTH {
            error!("TCP invalid len: {}", length);
            return Err(LinkError::Protocol(format!(
                "Invalid TCP frame length: {}",
                length
            )));
        }

        let total_size = MBAP_HEADER_LEN + length;
        if buffer.len() < total_size {
            return Err(LinkError::Protocol(
                "Buffer too small for complete frame".to_string(),
            ));
        }
        buffer[..MBAP_HEADER_LEN].copy_from_slice(&header);

        match timeout(
            timeout_duration,
            self.stream
                .read_exact(&mut buffer[MBAP_HEADER_LEN..total_size]),
        )
        .await
        {
            Ok(Ok(_)) => {
                debug!("TCP RX: {}B", total_size);
                Ok(total_size)
            },
            Ok(Err(e)) => {
                error!("TCP PDU RX: {}", e);
                Err(LinkError::Io(format!("TCP PDU read error: {e}")))
            },
            Err(_) => {
                debug!("TCP PDU timeout");
                Err(LinkError::Timeout("TCP PDU read timeout".to_string()))
            },
        }
    }

    /// Best-effort close; errors are irrelevant once the session is dropped
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("TCP shutdown: {}", e);
        }
    }
}
