//! Modbus TCP framing
//!
//! Wraps PDUs in an MBAP header and validates responses against the
//! request that is currently outstanding. The link never pipelines, so one
//! pending transaction is all the tracking needed.

use tracing::debug;

use crate::constants::{MAX_MBAP_LENGTH, MBAP_HEADER_LEN};
use crate::error::{LinkError, Result};
use crate::pdu::ModbusPdu;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    /// Always 0 for Modbus
    pub protocol_id: u16,
    /// Unit id + PDU byte count
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Decode the first 7 bytes of a frame
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MBAP_HEADER_LEN + 1 {
            return Err(LinkError::Protocol("TCP frame too short".to_string()));
        }
        Ok(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    transaction_id: u16,
    function_code: u8,
}

/// Builds request frames and matches responses for one unit id
#[derive(Debug)]
pub struct MbapFramer {
    unit_id: u8,
    next_transaction_id: u16,
    pending: Option<PendingRequest>,
}

impl MbapFramer {
    pub fn new(unit_id: u8) -> Self {
        Self {
            unit_id,
            next_transaction_id: 1,
            pending: None,
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Next transaction id, wrapping from 0xFFFF to 0
    fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Build a complete frame (MBAP + unit + PDU) and remember it as pending
    pub fn build_frame(&mut self, pdu: &ModbusPdu) -> Vec<u8> {
        let transaction_id = self.next_transaction_id();
        let function_code = pdu.function_code().unwrap_or(0);
        self.pending = Some(PendingRequest {
            transaction_id,
            function_code,
        });

        let length = (pdu.len() + 1) as u16;
        let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(self.unit_id);
        frame.extend_from_slice(pdu.as_slice());

        debug!(
            "TX frame: tid={:04X} unit={} FC={:02X} len={}",
            transaction_id,
            self.unit_id,
            function_code,
            frame.len()
        );
        frame
    }

    /// Validate a received frame against the pending request and extract its PDU
    pub fn parse_frame(&mut self, data: &[u8]) -> Result<ModbusPdu> {
        let header = MbapHeader::decode(data)?;

        if header.protocol_id != 0 {
            return Err(LinkError::Protocol(format!(
                "Invalid protocol ID: expected 0, got {}",
                header.protocol_id
            )));
        }
        let length = header.length as usize;
        if length < 2 || length > MAX_MBAP_LENGTH {
            return Err(LinkError::Protocol(format!(
                "Invalid TCP frame length: {}",
                length
            )));
        }
        if data.len() != MBAP_HEADER_LEN + length {
            return Err(LinkError::Protocol(format!(
                "Invalid TCP frame length: expected {}, got {}",
                MBAP_HEADER_LEN + length,
                data.len()
            )));
        }

        let pending = self
            .pending
            .take()
            .ok_or_else(|| LinkError::Protocol("Response without pending request".to_string()))?;

        if header.transaction_id != pending.transaction_id {
            return Err(LinkError::Protocol(format!(
                "Transaction ID mismatch: expected {:04X}, got {:04X}",
                pending.transaction_id, header.transaction_id
            )));
        }
        if header.unit_id != self.unit_id {
            return Err(LinkError::Protocol(format!(
                "Unit ID mismatch: expected {}, got {}",
                self.unit_id, header.unit_id
            )));
        }

        let pdu = ModbusPdu::from_slice(&data[MBAP_HEADER_LEN + 1..])?;
        let response_fc = pdu.function_code().map(|fc| fc & 0x7F).unwrap_or(0);
        if response_fc != pending.function_code {
            return Err(LinkError::Protocol(format!(
                "Function code mismatch: expected {:02X}, got {:02X}",
                pending.function_code, response_fc
            )));
        }

        debug!(
            "RX frame: tid={:04X} unit={} FC={:02X}",
            header.transaction_id,
            header.unit_id,
            pdu.function_code().unwrap_or(0)
        );
        Ok(pdu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(tid: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&tid.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
        frame.push(unit);
        frame.extend_from_slice(pdu);
        frame
    }

    #[test]
    fn test_build_frame_layout() {
        let mut framer = MbapFramer::new(1);
        let pdu = ModbusPdu::read_holding_registers(120, 1).unwrap();
        let frame = framer.build_frame(&pdu);
        assert_eq!(
            frame,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x78, 0x00, 0x01]
        );
    }

    #[test]
    fn test_transaction_id_wraps() {
        let mut framer = MbapFramer::new(1);
        framer.next_transaction_id = 0xFFFF;
        assert_eq!(framer.next_transaction_id(), 0xFFFF);
        assert_eq!(framer.next_transaction_id(), 0x0000);
    }

    #[test]
    fn test_parse_matching_response() {
        let mut framer = MbapFramer::new(1);
        let pdu = ModbusPdu::read_holding_registers(100, 1).unwrap();
        framer.build_frame(&pdu);

        let parsed = framer
            .parse_frame(&response(1, 1, &[0x03, 0x02, 0x05, 0x46]))
            .unwrap();
        assert_eq!(parsed.parse_read_response(1).unwrap(), vec![1350]);
    }

    #[test]
    fn test_parse_rejects_stale_transaction() {
        let mut framer = MbapFramer::new(1);
        let pdu = ModbusPdu::read_holding_registers(100, 1).unwrap();
        framer.build_frame(&pdu);

        let err = framer
            .parse_frame(&response(7, 1, &[0x03, 0x02, 0x00, 0x00]))
            .unwrap_err();
        assert!(err.to_string().contains("Transaction ID mismatch"));
    }

    #[test]
    fn test_parse_rejects_other_unit() {
        let mut framer = MbapFramer::new(1);
        let pdu = ModbusPdu::write_single_register(100, 3510).unwrap();
        framer.build_frame(&pdu);

        let err = framer
            .parse_frame(&response(1, 2, &[0x06, 0x00, 0x64, 0x0D, 0xB6]))
            .unwrap_err();
        assert!(err.to_string().contains("Unit ID mismatch"));
    }

    #[test]
    fn test_parse_exception_keeps_function_match() {
        let mut framer = MbapFramer::new(1);
        let pdu = ModbusPdu::write_single_register(100, 3510).unwrap();
        framer.build_frame(&pdu);

        let parsed = framer.parse_frame(&response(1, 1, &[0x86, 0x03])).unwrap();
        assert_eq!(parsed.exception_code(), Some(0x03));
    }

    #[test]
    fn test_parse_without_pending_request() {
        let mut framer = MbapFramer::new(1);
        let err = framer
            .parse_frame(&response(1, 1, &[0x03, 0x02, 0x00, 0x00]))
            .unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
    }

    #[test]
    fn test_parse_bad_protocol_id() {
        let mut framer = MbapFramer::new(1);
        let pdu = ModbusPdu::read_holding_registers(100, 1).unwrap();
        framer.build_frame(&pdu);

        let mut frame = response(1, 1, &[0x03, 0x02, 0x00, 0x00]);
        frame[3] = 0x01;
        assert!(framer.parse_frame(&frame).is_err());
    }
}
