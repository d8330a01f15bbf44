//! Modbus TCP constants
//!
//! Frame limits follow the Modbus Application Protocol specification:
//! a PDU is at most 253 bytes (RS485 ADU of 256 minus address and CRC).

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header bytes preceding the unit id:
/// Transaction ID(2) + Protocol ID(2) + Length(2)
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Receive buffer for one complete TCP frame (6 + 254 rounded up)
pub const MODBUS_RESPONSE_BUFFER_SIZE: usize = 512;

/// Default Modbus TCP port
pub const MODBUS_TCP_PORT: u16 = 502;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum registers per FC03 request: (253 - 2) / 2
pub const MODBUS_MAX_READ_REGISTERS: u16 = 125;

// ============================================================================
// Function Codes
// ============================================================================

/// FC03 Read Holding Registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// FC06 Write Single Register
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;
