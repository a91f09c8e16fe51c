//! SPI engine
//!
//! Transfers are planned as wire segments. A plain exchange is one
//! segment; a skip or mismatched source/destination lengths need
//! several, and those run inside an implicit transaction so chip select
//! stays asserted across them. Data received inside any transaction is
//! copied into destination buffers only once the native end succeeded.

mod composite;
mod device;
mod transaction;

pub use composite::CompositeMessage;
pub use device::SpiDevice;
pub use transaction::TransactionId;

use std::sync::Arc;

use peribus_hal::spi::{SpiConfig, SpiTransport};
use portable_atomic::AtomicU32;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::handle::{Handle, Native};
use transaction::OpenTransaction;

/// Transmitted while only receiving
pub const DUMMY_BYTE: u8 = 0x00;

pub(crate) struct SpiShared<T: SpiTransport> {
    pub handle: Handle<SpiState<T>>,
    pub config: SpiConfig,
    pub word_length: u8,
    pub transactions: Arc<AtomicU32>,
}

impl<T: SpiTransport> SpiShared<T> {
    fn close(&self) {
        if let Some(mut state) = self.handle.begin_close() {
            if state.transaction.take().is_some() {
                debug!("spi: closing with an open transaction");
                if state.native.transport().end().is_err() {
                    warn!("spi: end on close failed");
                }
            }
            state.native.close();
            info!("spi: closed device");
        }
    }
}

impl<T: SpiTransport> Drop for SpiShared<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// State behind the handle lock
pub(crate) struct SpiState<T: SpiTransport> {
    pub native: Native<T>,
    pub transaction: Option<OpenTransaction>,
}

/// Bytes per word for a word length in bits
pub(crate) fn word_bytes(bits: u8) -> usize {
    (bits.max(1) as usize - 1) / 8 + 1
}

/// Remaining length must be a positive multiple of the word size
pub(crate) fn check_word_length(buffer: &Buffer, word_bytes: usize) -> Result<()> {
    let len = buffer.remaining();
    if len == 0 || len % word_bytes != 0 {
        return Err(Error::InvalidWordLength { len, word_bytes });
    }
    Ok(())
}

/// One native exchange of a planned transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Segment {
    pub offset: usize,
    pub len: usize,
    /// Received bytes are kept
    pub capture: bool,
}

/// Split a transfer into wire segments
///
/// The first `skip` received bytes are discarded, then `rx_len` bytes
/// are captured; the source is padded with dummy bytes when shorter
/// than the wire length.
pub(crate) fn plan(tx_len: usize, skip: usize, rx_len: Option<usize>) -> Vec<Segment> {
    let (wire, capture_at) = match rx_len {
        Some(rx) => (tx_len.max(skip + rx), Some((skip, skip + rx))),
        None => (tx_len, None),
    };

    let mut cuts = vec![0, wire];
    if let Some((from, to)) = capture_at {
        cuts.push(from);
        cuts.push(to);
    }
    if tx_len < wire {
        cuts.push(tx_len);
    }
    cuts.sort_unstable();
    cuts.dedup();

    cuts.windows(2)
        .filter(|w| w[1] > w[0])
        .map(|w| Segment {
            offset: w[0],
            len: w[1] - w[0],
            capture: capture_at.is_some_and(|(from, to)| w[0] >= from && w[0] < to),
        })
        .collect()
}

impl<T: SpiTransport> SpiState<T> {
    /// Transfer one step; the handle lock is held by the caller
    ///
    /// Returns bytes received into `rx` if given, else bytes sent.
    pub(crate) fn transfer(
        &mut self,
        transactions: &AtomicU32,
        tx: Option<&Buffer>,
        skip: usize,
        rx: Option<&Buffer>,
    ) -> Result<usize> {
        let (tx_start, tx_data) = match tx {
            Some(buffer) => buffer.window(),
            None => (0, Vec::new()),
        };
        let rx_cursor = rx.map(Buffer::cursor);
        let rx_len = rx_cursor.map(|(_, len)| len);

        if tx_data.is_empty() && rx_len.unwrap_or(0) == 0 {
            return Ok(0);
        }

        let mismatched = tx.is_some() && rx_len.is_some_and(|len| len != tx_data.len());
        let implicit = self.transaction.is_none() && (skip != 0 || mismatched);
        let id = if implicit {
            Some(self.begin(transactions)?)
        } else {
            None
        };

        let received = match self.exchange_planned(&tx_data, skip, rx_len) {
            Ok(received) => received,
            Err(err) => {
                if let Some(id) = id {
                    if self.end(id).is_err() {
                        warn!("spi: end after failed transfer also failed");
                    }
                }
                return Err(err);
            }
        };

        if let Some(buffer) = tx {
            buffer.advance_from(tx_start, tx_data.len());
        }
        if let (Some(buffer), Some((start, _))) = (rx, rx_cursor) {
            self.stage(buffer, start, received);
        }
        if let Some(id) = id {
            self.end(id)?;
        }

        Ok(rx_len.unwrap_or(tx_data.len()))
    }

    fn exchange_planned(&mut self, tx: &[u8], skip: usize, rx_len: Option<usize>) -> Result<Vec<u8>> {
        let segments = plan(tx.len(), skip, rx_len);
        let wire = segments.last().map_or(0, |s| s.offset + s.len);

        let mut mosi = vec![DUMMY_BYTE; wire];
        mosi[..tx.len()].copy_from_slice(tx);
        let mut miso = vec![0u8; wire];

        for segment in &segments {
            let range = segment.offset..segment.offset + segment.len;
            let capture = if segment.capture {
                Some(&mut miso[range.clone()])
            } else {
                None
            };
            self.native
                .transport()
                .exchange(&mosi[range], capture)
                .map_err(Error::native)?;
        }

        Ok(match rx_len {
            Some(len) => miso[skip..skip + len].to_vec(),
            None => Vec::new(),
        })
    }

    /// Exchange raw bytes outside any buffer bookkeeping
    pub(crate) fn exchange_raw(&mut self, tx: &[u8], capture: bool) -> Result<Vec<u8>> {
        let mut miso = vec![0u8; tx.len()];
        let rx = if capture { Some(miso.as_mut_slice()) } else { None };
        self.native
            .transport()
            .exchange(tx, rx)
            .map_err(Error::native)?;
        Ok(miso)
    }
}
