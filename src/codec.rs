//! Modbus TCP request/response frames for the two function codes the eM4 needs.
//!
//! Framing itself is delegated to `rmodbus`; this module keeps each request next
//! to the parser state that can validate its response.

use rmodbus::{client::ModbusRequest, ModbusProto};

use crate::error::{ProtocolError, Result};

/// Most registers a single read-holding-registers request may ask for.
pub const MAX_READ_COUNT: u16 = 125;

/// MBAP header (6) + unit id + function code.
const MIN_RESPONSE_LEN: usize = 8;

/// An encoded request plus what is needed to check its response.
pub struct RequestFrame {
    request: ModbusRequest,
    bytes: Vec<u8>,
}

/// Encode a read-holding-registers (0x03) request.
pub fn encode_read(unit_id: u8, start: u16, count: u16) -> Result<RequestFrame> {
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    let mut bytes = Vec::new();
    request.generate_get_holdings(start, count, &mut bytes)?;
    Ok(RequestFrame { request, bytes })
}

/// Encode a write-multiple-registers (0x10) request.
pub fn encode_write(unit_id: u8, start: u16, values: &[u16]) -> Result<RequestFrame> {
    let mut request = ModbusRequest::new(unit_id, ModbusProto::TcpUdp);
    let mut bytes = Vec::new();
    request.generate_set_holdings_bulk(start, values, &mut bytes)?;
    Ok(RequestFrame { request, bytes })
}

impl RequestFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode the register words of a read response.
    ///
    /// Fails on exception responses, frames that do not belong to this request,
    /// and on any register count other than `expected_count`.
    pub fn decode_read_response(&self, response: &[u8], expected_count: u16) -> Result<Vec<u16>> {
        check_length(response)?;
        let mut words: Vec<u16> = Vec::new();
        self.request.parse_u16(response, &mut words)?;
        if words.len() != expected_count as usize {
            return Err(ProtocolError::CountMismatch {
                expected: expected_count,
                received: words.len(),
            }
            .into());
        }
        Ok(words)
    }

    /// Check a write acknowledgement echoes this request.
    pub fn decode_write_response(&self, response: &[u8]) -> Result<()> {
        check_length(response)?;
        self.request.parse_ok(response)?;
        Ok(())
    }
}

fn check_length(response: &[u8]) -> Result<()> {
    if response.len() < MIN_RESPONSE_LEN {
        return Err(ProtocolError::ShortFrame {
            len: response.len(),
        }
        .into());
    }
    Ok(())
}

/// Combine two registers into one 32-bit value, most significant word first.
#[inline]
pub const fn assemble_wide(words: [u16; 2]) -> u32 {
    ((words[0] as u32) << 16) | words[1] as u32
}

/// Split a 32-bit value into registers, most significant word first.
#[inline]
pub const fn split_wide(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}
