//! Modbus TCP wire layer for the motor rig
//!
//! Covers only what the rig needs: FC03 reads and FC06 writes of holding
//! registers against a single unit.
//!
//! # Architecture
//!
//! ```text
//! rig-modbus
//!     ├── ModbusPdu (request building / response decoding)
//!     ├── MbapFramer (MBAP header, transaction matching)
//!     ├── ModbusTcpConnection (socket + timeouts)
//!     └── TcpRegisterClient / TcpConnector (RegisterTransport, LinkConnector)
//! ```
//!
//! The connection state machine lives in `motorsrv`, which drives any
//! [`LinkConnector`] implementation.

mod client;
mod connection;
pub mod constants;
mod error;
mod pdu;
mod transport;

pub use client::{LinkConnector, RegisterTransport, TcpConnector, TcpRegisterClient};
pub use connection::{ConnectionParams, ModbusTcpConnection};
pub use error::{LinkError, Result};
pub use pdu::ModbusPdu;
pub use transport::{MbapFramer, MbapHeader};

#[cfg(feature = "simulator")]
pub mod simulator;
