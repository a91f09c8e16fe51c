//! Simulated SPI bus
//!
//! The slave answers from a MISO script, or loops MOSI back once the
//! script is empty.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use peribus_hal::spi::{SpiConfig, SpiDriver, SpiTransport};
use peribus_hal::{ErrorKind, ErrorType, Transport};

use crate::error::SimError;

/// One native call seen by the simulated bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpiRecord {
    /// Chip select asserted
    Begin,
    /// Chip select released
    End,
    /// Bus pause
    Delay(Duration),
    /// Full-duplex exchange; `captured` is false for transmit-only
    Exchange { tx: Vec<u8>, captured: bool },
    /// Advisory lock taken
    Lock,
    /// Advisory lock released
    Unlock,
    /// Handle closed
    Close,
}

#[derive(Debug)]
struct BusState {
    word_length: u8,
    miso: VecDeque<u8>,
    records: Vec<SpiRecord>,
    fail_next: Option<ErrorKind>,
    fail_end: Option<ErrorKind>,
    locked_by_other: bool,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            word_length: 8,
            miso: VecDeque::new(),
            records: Vec::new(),
            fail_next: None,
            fail_end: None,
            locked_by_other: false,
        }
    }
}

/// Simulated SPI bus, usable as an [`SpiDriver`]
#[derive(Debug, Clone, Default)]
pub struct SimSpiBus {
    state: Arc<Mutex<BusState>>,
}

impl SimSpiBus {
    /// Loopback bus with 8-bit words
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose slaves report `bits` as their word length
    pub fn with_word_length(bits: u8) -> Self {
        let bus = Self::default();
        bus.state.lock().word_length = bits;
        bus
    }

    /// Queue bytes the slave shifts out on later exchanges
    pub fn respond(&self, bytes: &[u8]) {
        self.state.lock().miso.extend(bytes.iter().copied());
    }

    /// Fail the next exchange with `kind`
    pub fn fail_next(&self, kind: ErrorKind) {
        self.state.lock().fail_next = Some(kind);
    }

    /// Fail the next transaction end with `kind`
    pub fn fail_end(&self, kind: ErrorKind) {
        self.state.lock().fail_end = Some(kind);
    }

    /// Simulate another application holding the advisory lock
    pub fn set_locked_by_other(&self, locked: bool) {
        self.state.lock().locked_by_other = locked;
    }

    /// Native calls seen so far
    pub fn records(&self) -> Vec<SpiRecord> {
        self.state.lock().records.clone()
    }

    /// Bytes sent on MOSI, over all exchanges
    pub fn mosi(&self) -> Vec<u8> {
        self.state
            .lock()
            .records
            .iter()
            .filter_map(|r| match r {
                SpiRecord::Exchange { tx, .. } => Some(tx.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Forget recorded calls
    pub fn clear_records(&self) {
        self.state.lock().records.clear();
    }
}

impl SpiDriver for SimSpiBus {
    type Transport = SimSpi;

    fn open(&self, config: &SpiConfig) -> Result<SimSpi, SimError> {
        log::debug!("sim spi: open cs {:?}", config.address);
        let word_length = self.state.lock().word_length;
        Ok(SimSpi {
            bus: self.clone(),
            word_length,
            closed: false,
        })
    }
}

/// Open handle to the simulated slave
#[derive(Debug)]
pub struct SimSpi {
    bus: SimSpiBus,
    word_length: u8,
    closed: bool,
}

impl SimSpi {
    fn record(&self, record: SpiRecord) {
        self.bus.state.lock().records.push(record);
    }
}

impl ErrorType for SimSpi {
    type Error = SimError;
}

impl Transport for SimSpi {
    fn try_lock(&mut self) -> Result<(), SimError> {
        let mut state = self.bus.state.lock();
        if state.locked_by_other {
            return Err(SimError::Locked);
        }
        state.records.push(SpiRecord::Lock);
        Ok(())
    }

    fn unlock(&mut self) {
        self.record(SpiRecord::Unlock);
    }

    fn close(&mut self) {
        self.closed = true;
        self.record(SpiRecord::Close);
    }
}

impl SpiTransport for SimSpi {
    fn word_length(&self) -> u8 {
        self.word_length
    }

    fn begin(&mut self) -> Result<(), SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        self.record(SpiRecord::Begin);
        Ok(())
    }

    fn end(&mut self) -> Result<(), SimError> {
        let mut state = self.bus.state.lock();
        state.records.push(SpiRecord::End);
        match state.fail_end.take() {
            Some(kind) => Err(SimError::Injected(kind)),
            None => Ok(()),
        }
    }

    fn exchange(&mut self, tx: &[u8], rx: Option<&mut [u8]>) -> Result<usize, SimError> {
        if self.closed {
            return Err(SimError::Closed);
        }
        let mut state = self.bus.state.lock();
        if let Some(kind) = state.fail_next.take() {
            return Err(SimError::Injected(kind));
        }

        let captured = rx.is_some();
        match rx {
            Some(rx) => {
                for (out, sent) in rx.iter_mut().zip(tx) {
                    *out = state.miso.pop_front().unwrap_or(*sent);
                }
            }
            None => {
                // Clocked-out slave data is lost
                for _ in 0..tx.len() {
                    state.miso.pop_front();
                }
            }
        }
        state.records.push(SpiRecord::Exchange {
            tx: tx.to_vec(),
            captured,
        });
        Ok(tx.len())
    }

    fn delay(&mut self, duration: Duration) -> Result<(), SimError> {
        self.record(SpiRecord::Delay(duration));
        Ok(())
    }
}
