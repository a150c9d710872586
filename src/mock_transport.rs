//! We use this mocking module in unit tests to emulate an eM4 on the other end of the socket.

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use crate::{
    codec::split_wide,
    config::ConnectionTarget,
    error::{Error, Result},
    register::{Em4Register, DeviceStatus},
    transport::Transport,
};

/// Function code of read holding registers.
pub const READ_HOLDINGS: u8 = 0x03;
/// Function code of write multiple registers.
pub const WRITE_HOLDINGS: u8 = 0x10;

/// Something going wrong on the next exchange.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Answer normally, used to let earlier exchanges through.
    Pass,
    /// No answer within the timeout.
    Timeout,
    /// Peer resets the connection.
    Reset,
    /// Device answers with this exception code.
    Exception(u8),
    /// Device answers a read with one register too few.
    ShortRead,
}

/// Our mock type used to emulate an eM4.
pub struct SimulatedEm4 {
    /// Register bank, unset registers read as zero.
    registers: BTreeMap<u16, u16>,
    /// Faults to inject, one per exchange, before normal processing.
    faults: VecDeque<Fault>,
    /// Every request frame received, in order.
    requests: Vec<Vec<u8>>,
    /// Targets passed to `open`.
    opened: Vec<ConnectionTarget>,
    open: bool,
    /// Flag to acknowledge writes without storing them
    ignore_writes: bool,
    /// Flag to refuse connection attempts
    refuse_connections: bool,
}

impl SimulatedEm4 {
    /// Create an empty device, not connected.
    pub fn new() -> Self {
        Self {
            registers: BTreeMap::new(),
            faults: VecDeque::new(),
            requests: Vec::new(),
            opened: Vec::new(),
            open: false,
            ignore_writes: false,
            refuse_connections: false,
        }
    }

    /// A device charging on outlet 1 with Idefault 20 A and Irated 32 A.
    pub fn charging() -> Self {
        let mut device = Self::new();
        device.set_product(Em4Register::IRated, 320);
        device.set_product(Em4Register::IDefault, 200);

        let outlet = 0x3000;
        device.set(outlet + Em4Register::Status.offset(), DeviceStatus::Charging.code());
        device.set(outlet + Em4Register::IcMax.offset(), 160);
        device.set(outlet + Em4Register::Ic.offset(), 160);
        device.set_wide(outlet + Em4Register::CurrentL1.offset(), 158);
        device.set_wide(outlet + Em4Register::CurrentL2.offset(), 159);
        device.set_wide(outlet + Em4Register::CurrentL3.offset(), 157);
        device.set_wide(outlet + Em4Register::VoltageL1.offset(), 2301);
        device.set_wide(outlet + Em4Register::VoltageL2.offset(), 2298);
        device.set_wide(outlet + Em4Register::VoltageL3.offset(), 2305);
        device.set_wide(outlet + Em4Register::ActivePower.offset(), 10_950);
        device.set_wide(outlet + Em4Register::Energy.offset(), 123_456);
        device
    }

    pub fn set(&mut self, address: u16, value: u16) {
        self.registers.insert(address, value);
    }

    /// Store a 32-bit value, high word first.
    pub fn set_wide(&mut self, address: u16, value: u32) {
        let [high, low] = split_wide(value);
        self.set(address, high);
        self.set(address + 1, low);
    }

    pub fn set_product(&mut self, register: Em4Register, value: u16) {
        self.set(crate::register::PRODUCT_BASE + register.offset(), value);
    }

    pub fn get(&self, address: u16) -> u16 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    pub fn push_fault(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    pub fn set_ignore_writes(&mut self, ignore: bool) {
        self.ignore_writes = ignore;
    }

    pub fn set_refuse_connections(&mut self, refuse: bool) {
        self.refuse_connections = refuse;
    }

    /// Get every request frame received so far.
    pub fn requests(&self) -> &[Vec<u8>] {
        &self.requests
    }

    /// Number of requests carrying the given function code.
    pub fn count_function(&self, function: u8) -> usize {
        self.requests.iter().filter(|r| r.get(7) == Some(&function)).count()
    }

    pub fn write_count(&self) -> usize {
        self.count_function(WRITE_HOLDINGS)
    }

    pub fn read_count(&self) -> usize {
        self.count_function(READ_HOLDINGS)
    }

    pub fn opened_targets(&self) -> &[ConnectionTarget] {
        &self.opened
    }

    /// Build a frame with the MBAP header of `request` around `pdu`.
    fn respond(request: &[u8], pdu: &[u8]) -> Vec<u8> {
        let len = (pdu.len() + 1) as u16;
        let mut frame = vec![request[0], request[1], 0x00, 0x00];
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(request[6]);
        frame.extend_from_slice(pdu);
        frame
    }

    fn exception(request: &[u8], code: u8) -> Vec<u8> {
        Self::respond(request, &[request[7] | 0x80, code])
    }

    fn process(&mut self, request: &[u8]) -> Vec<u8> {
        if request.len() < 12 {
            return Self::exception(request, 0x03);
        }
        let function = request[7];
        let start = u16::from_be_bytes([request[8], request[9]]);
        let count = u16::from_be_bytes([request[10], request[11]]);

        match function {
            READ_HOLDINGS => {
                let mut pdu = vec![function, (count * 2) as u8];
                for address in start..start + count {
                    pdu.extend_from_slice(&self.get(address).to_be_bytes());
                }
                Self::respond(request, &pdu)
            }
            WRITE_HOLDINGS => {
                if !self.ignore_writes {
                    for (i, chunk) in request[13..].chunks(2).enumerate() {
                        self.set(start + i as u16, u16::from_be_bytes([chunk[0], chunk[1]]));
                    }
                }
                Self::respond(request, &request[7..12])
            }
            // Illegal function.
            _ => Self::exception(request, 0x01),
        }
    }
}

impl Transport for SimulatedEm4 {
    fn open(&mut self, target: &ConnectionTarget) -> Result<()> {
        if self.refuse_connections {
            return Err(Error::Connection {
                context: format!("{target} refused the connection"),
                source: None,
            });
        }
        self.opened.push(target.clone());
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        if !self.open {
            return Err(Error::Connection {
                context: "session is not open".into(),
                source: None,
            });
        }
        self.requests.push(request.to_vec());

        match self.faults.pop_front() {
            Some(Fault::Timeout) => Err(Error::Timeout(Duration::from_millis(10))),
            Some(Fault::Reset) => {
                self.open = false;
                Err(Error::Connection {
                    context: "connection reset by peer".into(),
                    source: None,
                })
            }
            Some(Fault::Exception(code)) => Ok(Self::exception(request, code)),
            Some(Fault::ShortRead) => {
                let mut response = self.process(request);
                // Drop the last register and fix up the lengths.
                response.truncate(response.len() - 2);
                response[5] -= 2;
                response[8] -= 2;
                Ok(response)
            }
            Some(Fault::Pass) | None => Ok(self.process(request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_device() -> SimulatedEm4 {
        let mut device = SimulatedEm4::charging();
        device.open(&ConnectionTarget::new("127.0.0.1")).unwrap();
        device
    }

    #[test]
    fn test_read_request() {
        let mut device = open_device();
        let request = [0x00, 0x07, 0, 0, 0, 6, 0xFF, 0x03, 0x01, 0x23, 0x00, 0x02];
        let response = device.exchange(&request).unwrap();
        assert_eq!(
            response,
            vec![0x00, 0x07, 0, 0, 0, 7, 0xFF, 0x03, 0x04, 0x01, 0x40, 0x00, 0xC8]
        );
        assert_eq!(device.read_count(), 1);
        assert_eq!(device.write_count(), 0);
    }

    #[test]
    fn test_write_request() {
        let mut device = open_device();
        let request = [
            0x00, 0x01, 0, 0, 0, 9, 0xFF, 0x10, 0x30, 0x32, 0x00, 0x01, 0x02, 0x00, 0x64,
        ];
        let response = device.exchange(&request).unwrap();
        assert_eq!(response, vec![0x00, 0x01, 0, 0, 0, 6, 0xFF, 0x10, 0x30, 0x32, 0x00, 0x01]);
        assert_eq!(device.get(0x3032), 100);
        assert_eq!(device.write_count(), 1);
    }

    #[test]
    fn test_ignored_write() {
        let mut device = open_device();
        device.set_ignore_writes(true);
        let request = [
            0x00, 0x01, 0, 0, 0, 9, 0xFF, 0x10, 0x30, 0x32, 0x00, 0x01, 0x02, 0x00, 0x64,
        ];
        device.exchange(&request).unwrap();
        assert_eq!(device.get(0x3032), 160);
    }

    #[test]
    fn test_faults_are_consumed_in_order() {
        let mut device = open_device();
        device.push_fault(Fault::Timeout);
        device.push_fault(Fault::Exception(0x02));
        let request = [0x00, 0x01, 0, 0, 0, 6, 0xFF, 0x03, 0x30, 0x31, 0x00, 0x01];

        assert!(matches!(device.exchange(&request), Err(Error::Timeout(_))));
        let response = device.exchange(&request).unwrap();
        assert_eq!(&response[7..], &[0x83, 0x02]);
        assert!(device.exchange(&request).is_ok());
        assert_eq!(device.requests().len(), 3);
    }

    #[test]
    fn test_reset_closes_the_session() {
        let mut device = open_device();
        device.push_fault(Fault::Reset);
        let request = [0x00, 0x01, 0, 0, 0, 6, 0xFF, 0x03, 0x30, 0x31, 0x00, 0x01];
        assert!(matches!(device.exchange(&request), Err(Error::Connection { .. })));
        assert!(!device.is_open());
        assert!(matches!(device.exchange(&request), Err(Error::Connection { .. })));
    }

    #[test]
    fn test_refused_connection() {
        let mut device = SimulatedEm4::new();
        device.set_refuse_connections(true);
        assert!(device.open(&ConnectionTarget::new("10.0.0.1")).is_err());
        assert!(device.opened_targets().is_empty());
    }
}
