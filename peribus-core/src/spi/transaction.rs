//! SPI transaction demarcation

use peribus_hal::spi::SpiTransport;
use portable_atomic::{AtomicU32, Ordering};

use super::SpiState;
use crate::buffer::Buffer;
use crate::error::{Error, Result};

/// Token of an open transaction
///
/// Values come from a counter shared by every SPI device of one
/// [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransactionId(pub(crate) u32);

impl TransactionId {
    /// Raw token value
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Receive data waiting for the transaction end
#[derive(Debug)]
struct PendingCopy {
    buffer: Buffer,
    start: usize,
    data: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct OpenTransaction {
    id: TransactionId,
    advisory: bool,
    pending: Vec<PendingCopy>,
}

impl<T: SpiTransport> SpiState<T> {
    /// Take the advisory lock, assert chip select and allocate a token
    pub(crate) fn begin(&mut self, counter: &AtomicU32) -> Result<TransactionId> {
        if self.transaction.is_some() {
            return Err(Error::InvalidState("transaction already open"));
        }

        let advisory = self.native.lock_advisory()?;
        if let Err(err) = self.native.transport().begin() {
            if advisory {
                self.native.unlock_advisory();
            }
            return Err(Error::native(err));
        }

        let id = TransactionId(counter.fetch_add(1, Ordering::Relaxed));
        trace!("spi: begin transaction {}", id.0);
        self.transaction = Some(OpenTransaction {
            id,
            advisory,
            pending: Vec::new(),
        });
        Ok(id)
    }

    /// Release chip select and deliver staged receive data
    ///
    /// A token that does not match the open transaction fails with
    /// [`Error::InvalidState`] and leaves the transaction open.
    pub(crate) fn end(&mut self, id: TransactionId) -> Result<()> {
        let open = match self.transaction.take() {
            Some(open) if open.id == id => open,
            other => {
                self.transaction = other;
                return Err(Error::InvalidState("transaction token mismatch"));
            }
        };

        let result = self.native.transport().end().map_err(Error::native);
        if open.advisory {
            self.native.unlock_advisory();
        }
        trace!("spi: end transaction {}", id.0);

        result?;
        for copy in open.pending {
            copy.buffer.write_at(copy.start, &copy.data);
        }
        Ok(())
    }

    /// Store received data now, or at the end of the open transaction
    ///
    /// The destination position advances immediately either way.
    pub(crate) fn stage(&mut self, buffer: &Buffer, start: usize, data: Vec<u8>) {
        buffer.advance_from(start, data.len());
        match self.transaction.as_mut() {
            Some(open) => open.pending.push(PendingCopy {
                buffer: buffer.clone(),
                start,
                data,
            }),
            None => buffer.write_at(start, &data),
        }
    }
}
