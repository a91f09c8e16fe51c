//! SPI slave device

use std::sync::Arc;

use peribus_hal::spi::{SpiConfig, SpiTransport};
use portable_atomic::AtomicU32;

use super::{check_word_length, word_bytes, CompositeMessage, SpiShared, SpiState, TransactionId};
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleId, Native};
use crate::power::PowerGate;

/// Open SPI slave
///
/// Clones share the handle; the device closes when the last clone is
/// dropped or on an explicit [`close`](Self::close).
pub struct SpiDevice<T: SpiTransport> {
    pub(crate) shared: Arc<SpiShared<T>>,
}

impl<T: SpiTransport> Clone for SpiDevice<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: SpiTransport> SpiDevice<T> {
    pub(crate) fn new(
        id: HandleId,
        mut transport: T,
        config: SpiConfig,
        transactions: Arc<AtomicU32>,
    ) -> Result<Self> {
        let word_length = transport.word_length();
        if word_length == 0 || word_length > 32 {
            transport.close();
            return Err(Error::InvalidConfig(format!(
                "unsupported SPI word length {word_length}"
            )));
        }
        info!("spi: opened device, {} bit words", word_length);

        Ok(Self {
            shared: Arc::new(SpiShared {
                handle: Handle::new(
                    id,
                    SpiState {
                        native: Native::new(transport, config.access),
                        transaction: None,
                    },
                ),
                config,
                word_length,
                transactions,
            }),
        })
    }

    /// Configuration the device was opened with
    pub fn config(&self) -> &SpiConfig {
        &self.shared.config
    }

    /// Handle identity
    pub fn id(&self) -> HandleId {
        self.shared.handle.id()
    }

    /// Power gate of this device
    pub fn power(&self) -> &Arc<PowerGate> {
        self.shared.handle.power()
    }

    pub fn is_open(&self) -> bool {
        self.shared.handle.is_open()
    }

    /// Close the device; later operations fail with [`Error::Closed`]
    pub fn close(&self) {
        self.shared.close();
    }

    /// Transfer word length in bits, as reported by the driver
    pub fn word_length(&self) -> Result<u8> {
        self.shared.handle.check()?;
        Ok(self.shared.word_length)
    }

    pub(crate) fn word_bytes(&self) -> usize {
        word_bytes(self.shared.word_length)
    }

    /// Read into `dst`, sending dummy data
    pub fn read(&self, dst: &Buffer) -> Result<usize> {
        self.exchange(None, 0, Some(dst))
    }

    /// Read, discarding the first `skip` received bytes
    pub fn read_skip(&self, skip: usize, dst: &Buffer) -> Result<usize> {
        self.exchange(None, skip, Some(dst))
    }

    /// Write `src`, ignoring received data
    pub fn write(&self, src: &Buffer) -> Result<usize> {
        self.exchange(Some(src), 0, None)
    }

    /// Full-duplex exchange
    ///
    /// The shorter side is padded so both buffers are fully consumed.
    /// Returns the number of bytes received.
    pub fn write_and_read(&self, src: &Buffer, dst: &Buffer) -> Result<usize> {
        self.exchange(Some(src), 0, Some(dst))
    }

    /// Full-duplex exchange discarding the first `skip` received bytes
    pub fn write_and_read_skip(&self, src: &Buffer, skip: usize, dst: &Buffer) -> Result<usize> {
        self.exchange(Some(src), skip, Some(dst))
    }

    fn exchange(&self, src: Option<&Buffer>, skip: usize, dst: Option<&Buffer>) -> Result<usize> {
        let word = self.word_bytes();
        for buffer in src.iter().chain(dst.iter()) {
            check_word_length(buffer, word)?;
        }
        let mut state = self.shared.handle.acquire()?;
        state.transfer(&self.shared.transactions, src, skip, dst)
    }

    /// Read one word, most significant byte first
    pub fn read_word(&self) -> Result<u32> {
        let tx = vec![super::DUMMY_BYTE; self.word_bytes()];
        let mut state = self.shared.handle.acquire()?;
        let rx = state.exchange_raw(&tx, true)?;
        Ok(decode_word(&rx))
    }

    /// Write one word, most significant byte first
    pub fn write_word(&self, word: u32) -> Result<()> {
        let tx = self.encode_word(word)?;
        let mut state = self.shared.handle.acquire()?;
        state.exchange_raw(&tx, false)?;
        Ok(())
    }

    /// Exchange one word
    pub fn write_and_read_word(&self, word: u32) -> Result<u32> {
        let tx = self.encode_word(word)?;
        let mut state = self.shared.handle.acquire()?;
        let rx = state.exchange_raw(&tx, true)?;
        Ok(decode_word(&rx))
    }

    fn encode_word(&self, word: u32) -> Result<Vec<u8>> {
        let bits = self.shared.word_length;
        if bits < 32 && word >> bits != 0 {
            return Err(Error::InvalidArgument("word exceeds word length"));
        }
        Ok(word.to_be_bytes()[4 - self.word_bytes()..].to_vec())
    }

    /// Keep chip select asserted across the following transfers
    ///
    /// Takes the inter-application advisory lock for shared devices.
    /// Only one transaction may be open per device.
    pub fn begin_transaction(&self) -> Result<TransactionId> {
        let mut state = self.shared.handle.acquire()?;
        state.begin(&self.shared.transactions)
    }

    /// End the transaction `id` and deliver its received data
    pub fn end_transaction(&self, id: TransactionId) -> Result<()> {
        let mut state = self.shared.handle.acquire()?;
        state.end(id)
    }

    /// Empty composite message for this device
    pub fn create_composite_message(&self) -> CompositeMessage<T> {
        CompositeMessage::new(self.clone())
    }

    /// Run `f` inside a transaction of its own, ending it on every path
    pub(crate) fn with_transaction<R>(
        &self,
        f: impl FnOnce(&mut SpiState<T>, &AtomicU32) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.shared.handle.acquire()?;
        let id = state.begin(&self.shared.transactions)?;
        match f(&mut *state, &self.shared.transactions) {
            Ok(value) => {
                state.end(id)?;
                Ok(value)
            }
            Err(err) => {
                if state.end(id).is_err() {
                    warn!("spi: end after failed step also failed");
                }
                Err(err)
            }
        }
    }
}

fn decode_word(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}
