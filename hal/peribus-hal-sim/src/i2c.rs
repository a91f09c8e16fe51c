//! Simulated I2C bus
//!
//! Slaves answer reads from a byte script (idle bus `0xFF` once the
//! script runs dry) and accept every write.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use peribus_hal::i2c::{Frame, I2cConfig, I2cDriver, I2cOp, I2cTransport};
use peribus_hal::{ErrorKind, ErrorType, Transport};

use crate::error::SimError;

/// Value read from a slave with nothing scripted
pub const IDLE_BYTE: u8 = 0xFF;

/// One native call seen by the simulated bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cRecord {
    /// Bytes actually written
    Write { address: u16, frame: Frame, data: Vec<u8> },
    /// Bytes actually read
    Read { address: u16, frame: Frame, len: usize },
    /// Advisory lock taken
    Lock { address: u16 },
    /// Advisory lock released
    Unlock { address: u16 },
    /// Handle closed
    Close { address: u16 },
}

#[derive(Debug, Default)]
struct Slave {
    script: VecDeque<u8>,
    max_transfer: Option<usize>,
}

#[derive(Debug, Default)]
struct BusState {
    slaves: HashMap<u16, Slave>,
    records: Vec<I2cRecord>,
    fail_next: Option<ErrorKind>,
    locked_by_other: bool,
}

/// Simulated I2C bus, usable as an [`I2cDriver`]
#[derive(Debug, Clone, Default)]
pub struct SimI2cBus {
    state: Arc<Mutex<BusState>>,
}

impl SimI2cBus {
    /// Empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes the slave at `address` returns on later reads
    pub fn respond(&self, address: u16, bytes: &[u8]) {
        let mut state = self.state.lock();
        state
            .slaves
            .entry(address)
            .or_default()
            .script
            .extend(bytes.iter().copied());
    }

    /// Cap every transfer with the slave at `address` to `len` bytes
    pub fn limit_transfers(&self, address: u16, len: usize) {
        self.state.lock().slaves.entry(address).or_default().max_transfer = Some(len);
    }

    /// Fail the next transfer with `kind`
    pub fn fail_next(&self, kind: ErrorKind) {
        self.state.lock().fail_next = Some(kind);
    }

    /// Simulate another application holding the advisory lock
    pub fn set_locked_by_other(&self, locked: bool) {
        self.state.lock().locked_by_other = locked;
    }

    /// Native calls seen so far
    pub fn records(&self) -> Vec<I2cRecord> {
        self.state.lock().records.clone()
    }

    /// Forget recorded calls
    pub fn clear_records(&self) {
        self.state.lock().records.clear();
    }
}

impl I2cDriver for SimI2cBus {
    type Transport = SimI2c;

    fn open(&self, config: &I2cConfig) -> Result<SimI2c, SimError> {
        log::debug!("sim i2c: open slave 0x{:02x}", config.address);
        Ok(SimI2c {
            bus: self.clone(),
            address: config.address,
            closed: false,
        })
    }
}

/// Open handle to one simulated slave
#[derive(Debug)]
pub struct SimI2c {
    bus: SimI2cBus,
    address: u16,
    closed: bool,
}

impl ErrorType for SimI2c {
    type Error = SimError;
}

impl Transport for SimI2c {
    fn try_lock(&mut self) -> Result<(), SimError> {
        let mut state = self.bus.state.lock();
        if state.locked_by_other {
            return Err(SimError::Locked);
        }
        state.records.push(I2cRecord::Lock {
            address: self.address,
        });
        Ok(())
    }

    fn unlock(&mut self) {
        self.bus.state.lock().records.push(I2cRecord::Unlock {
            address: self.address,
        });
    }

    fn close(&mut self) {
        self.closed = true;
        self.bus.state.lock().records.push(I2cRecord::Close {
            address: self.address,
        });
    }
}

impl I2cTransport for SimI2c {
    fn transfer(&mut self, frame: Frame, op: I2cOp<'_>) -> Result<usize, SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        let mut state = self.bus.state.lock();
        if let Some(kind) = state.fail_next.take() {
            return Err(SimError::Injected(kind));
        }

        let address = self.address;
        let slave = state.slaves.entry(address).or_default();
        let max = slave.max_transfer.unwrap_or(usize::MAX);

        let record = match op {
            I2cOp::Read(buf) => {
                let len = buf.len().min(max);
                for byte in buf.iter_mut().take(len) {
                    *byte = slave.script.pop_front().unwrap_or(IDLE_BYTE);
                }
                I2cRecord::Read {
                    address,
                    frame,
                    len,
                }
            }
            I2cOp::Write(data) => {
                let len = data.len().min(max);
                I2cRecord::Write {
                    address,
                    frame,
                    data: data[..len].to_vec(),
                }
            }
        };

        let count = match &record {
            I2cRecord::Read { len, .. } => *len,
            I2cRecord::Write { data, .. } => data.len(),
            _ => 0,
        };
        state.records.push(record);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_read() {
        let bus = SimI2cBus::new();
        bus.respond(0x48, &[1, 2]);
        let mut slave = bus.open(&I2cConfig::new(0x48)).unwrap();

        let mut buf = [0u8; 3];
        let n = slave.transfer(Frame::Regular, I2cOp::Read(&mut buf)).unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf, [1, 2, IDLE_BYTE]);
    }

    #[test]
    fn test_limited_transfer() {
        let bus = SimI2cBus::new();
        bus.limit_transfers(0x48, 1);
        let mut slave = bus.open(&I2cConfig::new(0x48)).unwrap();

        let n = slave.transfer(Frame::Start, I2cOp::Write(&[9, 8])).unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            bus.records(),
            vec![I2cRecord::Write {
                address: 0x48,
                frame: Frame::Start,
                data: vec![9]
            }]
        );
    }

    #[test]
    fn test_injected_failure() {
        let bus = SimI2cBus::new();
        bus.fail_next(ErrorKind::Nack);
        let mut slave = bus.open(&I2cConfig::new(0x20)).unwrap();

        let err = slave.transfer(Frame::Regular, I2cOp::Write(&[0])).unwrap_err();
        assert_eq!(err, SimError::Injected(ErrorKind::Nack));
        assert!(slave.transfer(Frame::Regular, I2cOp::Write(&[0])).is_ok());
    }
}
