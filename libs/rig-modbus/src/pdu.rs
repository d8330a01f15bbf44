//! Modbus PDU with a stack-allocated buffer
//!
//! Only the two function codes the motor link uses are built and parsed here:
//! FC03 (read holding registers) and FC06 (write single register).

use tracing::debug;

use crate::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE,
    MODBUS_MAX_READ_REGISTERS,
};
use crate::error::{LinkError, Result};

/// PDU backed by a fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(LinkError::Protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(LinkError::Protocol("PDU buffer full".to_string()));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        for byte in value.to_be_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        (self.is_exception() && self.len > 1).then(|| self.data[1])
    }

    /// Build an FC03 request
    pub fn read_holding_registers(address: u16, count: u16) -> Result<Self> {
        if count == 0 || count > MODBUS_MAX_READ_REGISTERS {
            return Err(LinkError::Protocol(format!(
                "Register count {} outside 1..={}",
                count, MODBUS_MAX_READ_REGISTERS
            )));
        }
        let mut pdu = Self::new();
        pdu.push(FC_READ_HOLDING_REGISTERS)?;
        pdu.push_u16(address)?;
        pdu.push_u16(count)?;
        Ok(pdu)
    }

    /// Build an FC06 request
    pub fn write_single_register(address: u16, value: u16) -> Result<Self> {
        let mut pdu = Self::new();
        pdu.push(FC_WRITE_SINGLE_REGISTER)?;
        pdu.push_u16(address)?;
        pdu.push_u16(value)?;
        Ok(pdu)
    }

    /// Fail with [`LinkError::Exception`] if this is an exception response,
    /// or with a protocol error if the function code does not match.
    fn expect_function(&self, expected: u8) -> Result<()> {
        if let Some(code) = self.exception_code() {
            return Err(LinkError::Exception {
                function: expected,
                code,
            });
        }
        match self.function_code() {
            Some(fc) if fc == expected => Ok(()),
            Some(fc) => Err(LinkError::Protocol(format!(
                "Unexpected FC{:02X}, expected FC{:02X}",
                fc, expected
            ))),
            None => Err(LinkError::Protocol("Empty response PDU".to_string())),
        }
    }

    /// Decode an FC03 response into register values
    pub fn parse_read_response(&self, expected_count: u16) -> Result<Vec<u16>> {
        self.expect_function(FC_READ_HOLDING_REGISTERS)?;

        let data = self.as_slice();
        if data.len() < 2 {
            return Err(LinkError::Protocol("FC03 response too short".to_string()));
        }
        let byte_count = data[1] as usize;
        if byte_count != expected_count as usize * 2 || data.len() != 2 + byte_count {
            return Err(LinkError::Protocol(format!(
                "FC03 byte count mismatch: expected {} registers, got {} bytes ({} in frame)",
                expected_count,
                byte_count,
                data.len() - 2
            )));
        }

        let registers: Vec<u16> = data[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        debug!("FC03 decoded {} registers", registers.len());
        Ok(registers)
    }

    /// Check an FC06 response echoes the request
    pub fn parse_write_response(&self, address: u16, value: u16) -> Result<()> {
        self.expect_function(FC_WRITE_SINGLE_REGISTER)?;

        let data = self.as_slice();
        if data.len() != 5 {
            return Err(LinkError::Protocol(format!(
                "FC06 response length {} (expected 5)",
                data.len()
            )));
        }
        let echo_address = u16::from_be_bytes([data[1], data[2]]);
        let echo_value = u16::from_be_bytes([data[3], data[4]]);
        if echo_address != address || echo_value != value {
            return Err(LinkError::Protocol(format!(
                "FC06 echo mismatch: sent {}={}, got {}={}",
                address, value, echo_address, echo_value
            )));
        }
        Ok(())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}
