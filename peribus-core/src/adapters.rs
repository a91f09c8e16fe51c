//! `embedded-hal` and `embedded-io` implementations
//!
//! Lets drivers written against the ecosystem traits run on top of the
//! engine. Slice operations are staged through [`Buffer`]s, so they get
//! the same locking, framing and transaction rules as native calls.

use std::time::Duration;

use embedded_hal::i2c::{self, NoAcknowledgeSource};
use embedded_hal::spi;
use peribus_hal::i2c::I2cTransport;
use peribus_hal::spi::SpiTransport;
use peribus_hal::uart::UartTransport;
use peribus_hal::ErrorKind;

use crate::buffer::Buffer;
use crate::error::{Error, Unavailable};
use crate::i2c::{execute, I2cDevice, Step};
use crate::spi::{check_word_length, SpiDevice};
use crate::uart::Uart;

impl i2c::Error for Error {
    fn kind(&self) -> i2c::ErrorKind {
        match self {
            Error::Io(ErrorKind::Bus) => i2c::ErrorKind::Bus,
            Error::Io(ErrorKind::ArbitrationLost) => i2c::ErrorKind::ArbitrationLoss,
            Error::Io(ErrorKind::Nack) => i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Error::Io(ErrorKind::Overrun) => i2c::ErrorKind::Overrun,
            _ => i2c::ErrorKind::Other,
        }
    }
}

impl spi::Error for Error {
    fn kind(&self) -> spi::ErrorKind {
        match self {
            Error::Io(ErrorKind::Overrun) => spi::ErrorKind::Overrun,
            Error::Unavailable(Unavailable::LockedByOtherApplication) => spi::ErrorKind::ChipSelectFault,
            _ => spi::ErrorKind::Other,
        }
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind as Kind;
        match self {
            Error::InvalidArgument(_) | Error::InvalidWordLength { .. } | Error::BufferReused => {
                Kind::InvalidInput
            }
            Error::Closed => Kind::NotConnected,
            Error::Io(ErrorKind::Timeout) => Kind::TimedOut,
            Error::Io(ErrorKind::Overrun) => Kind::InvalidData,
            Error::PermissionDenied(_) => Kind::PermissionDenied,
            Error::NotFound(_) => Kind::NotFound,
            Error::Unsupported(_) => Kind::Unsupported,
            _ => Kind::Other,
        }
    }
}

impl<T: I2cTransport> i2c::ErrorType for I2cDevice<T> {
    type Error = Error;
}

/// Operations become one sequence framed as a combined message
///
/// Only the device's own 7-bit address is accepted. A short read or
/// write fails, since the trait has no way to report partial transfers.
impl<T: I2cTransport> i2c::I2c for I2cDevice<T> {
    fn transaction(&mut self, address: u8, operations: &mut [i2c::Operation<'_>]) -> Result<(), Error> {
        if u16::from(address) != self.config().address {
            return Err(Error::InvalidArgument("address differs from the opened device"));
        }

        let steps: Vec<(usize, Step)> = operations
            .iter()
            .map(|op| {
                let step = match op {
                    i2c::Operation::Read(buf) => Step::Read {
                        buffer: Buffer::allocate(buf.len()),
                        skip: 0,
                    },
                    i2c::Operation::Write(bytes) => Step::Write {
                        buffer: Buffer::from(*bytes),
                    },
                };
                (0, step)
            })
            .collect();

        let counts = execute(std::slice::from_ref(&self.shared), &steps)?;

        for ((op, (_, step)), n) in operations.iter_mut().zip(&steps).zip(counts) {
            match (op, step) {
                (i2c::Operation::Read(buf), Step::Read { buffer, .. }) => {
                    let len = buf.len();
                    if n < len {
                        return Err(Error::Io(ErrorKind::Other));
                    }
                    buf.copy_from_slice(&buffer.to_vec()[..len]);
                }
                (i2c::Operation::Write(bytes), Step::Write { .. }) => {
                    if n < bytes.len() {
                        return Err(Error::Io(ErrorKind::Nack));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl<T: SpiTransport> spi::ErrorType for SpiDevice<T> {
    type Error = Error;
}

/// Operations run inside one transaction of the device
///
/// Received data lands in the caller's slices once the transaction
/// ended successfully. `DelayNs` pauses the bus between operations.
impl<T: SpiTransport> spi::SpiDevice<u8> for SpiDevice<T> {
    fn transaction(&mut self, operations: &mut [spi::Operation<'_, u8>]) -> Result<(), Error> {
        let word = self.word_bytes();

        // (tx, rx) per operation; None for delays and empty slices
        let mut staged: Vec<(Option<Buffer>, Option<Buffer>)> = Vec::with_capacity(operations.len());
        for op in operations.iter() {
            let pair = match op {
                spi::Operation::Read(buf) => (None, Some(Buffer::allocate(buf.len()))),
                spi::Operation::Write(bytes) => (Some(Buffer::from(*bytes)), None),
                spi::Operation::Transfer(read, write) => {
                    (Some(Buffer::from(*write)), Some(Buffer::allocate(read.len())))
                }
                spi::Operation::TransferInPlace(buf) => {
                    (Some(Buffer::from(&buf[..])), Some(Buffer::allocate(buf.len())))
                }
                spi::Operation::DelayNs(_) => (None, None),
            };
            for buffer in pair.0.iter().chain(pair.1.iter()) {
                if buffer.has_remaining() {
                    check_word_length(buffer, word)?;
                }
            }
            staged.push(pair);
        }

        self.with_transaction(|state, transactions| {
            for (op, (tx, rx)) in operations.iter().zip(&staged) {
                if let spi::Operation::DelayNs(ns) = op {
                    state
                        .native
                        .transport()
                        .delay(Duration::from_nanos(u64::from(*ns)))
                        .map_err(Error::native)?;
                    continue;
                }
                state.transfer(transactions, tx.as_ref(), 0, rx.as_ref())?;
            }
            Ok(())
        })?;

        for (op, (_, rx)) in operations.iter_mut().zip(&staged) {
            let Some(rx) = rx else { continue };
            let data = rx.to_vec();
            match op {
                spi::Operation::Read(buf)
                | spi::Operation::Transfer(buf, _)
                | spi::Operation::TransferInPlace(buf) => {
                    let len = buf.len();
                    buf.copy_from_slice(&data[..len]);
                }
                spi::Operation::Write(_) | spi::Operation::DelayNs(_) => {}
            }
        }
        Ok(())
    }
}

impl<T: UartTransport> embedded_io::ErrorType for Uart<T> {
    type Error = Error;
}

/// Blocking read with the port's receive timeout and trigger level
///
/// Returns `Ok(0)` when the timeout expires before any byte arrived.
impl<T: UartTransport> embedded_io::Read for Uart<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let dst = Buffer::allocate(buf.len());
        let n = Uart::read(self, &dst)?;
        buf[..n].copy_from_slice(&dst.to_vec()[..n]);
        Ok(n)
    }
}

impl<T: UartTransport> embedded_io::Write for Uart<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        Uart::write(self, &Buffer::from(buf))
    }

    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceManager;
    use embedded_hal::i2c::I2c as _;
    use embedded_hal::spi::SpiDevice as _;
    use embedded_io::{Read as _, Write as _};
    use peribus_hal::i2c::{Frame, I2cConfig};
    use peribus_hal::spi::SpiConfig;
    use peribus_hal::uart::UartConfig;
    use peribus_hal_sim::{I2cRecord, SimI2cBus, SimSerial, SimSpiBus, SpiRecord};

    #[test]
    fn test_i2c_write_read() {
        let bus = SimI2cBus::new();
        bus.respond(0x48, &[0x12, 0x34]);
        let manager = DeviceManager::new();
        let mut dev = manager.open_i2c(&bus, I2cConfig::new(0x48)).unwrap();

        let mut out = [0u8; 2];
        dev.write_read(0x48, &[0x00], &mut out).unwrap();
        assert_eq!(out, [0x12, 0x34]);
        assert_eq!(
            bus.records(),
            vec![
                I2cRecord::Write {
                    address: 0x48,
                    frame: Frame::Start,
                    data: vec![0x00]
                },
                I2cRecord::Read {
                    address: 0x48,
                    frame: Frame::End,
                    len: 2
                },
            ]
        );
    }

    #[test]
    fn test_i2c_other_address_rejected() {
        let bus = SimI2cBus::new();
        let manager = DeviceManager::new();
        let mut dev = manager.open_i2c(&bus, I2cConfig::new(0x48)).unwrap();
        assert!(matches!(
            i2c::I2c::write(&mut dev, 0x49, &[1]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(bus.records().is_empty());
    }

    #[test]
    fn test_i2c_short_write_is_nack() {
        let bus = SimI2cBus::new();
        bus.limit_transfers(0x48, 1);
        let manager = DeviceManager::new();
        let mut dev = manager.open_i2c(&bus, I2cConfig::new(0x48)).unwrap();
        let err = i2c::I2c::write(&mut dev, 0x48, &[1, 2, 3]).unwrap_err();
        assert_eq!(
            i2c::Error::kind(&err),
            i2c::ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown)
        );
    }

    #[test]
    fn test_spi_transaction() {
        let bus = SimSpiBus::new();
        bus.respond(&[0xAA, 0xEF, 0x40]);
        let manager = DeviceManager::new();
        let mut dev = manager.open_spi(&bus, SpiConfig::default()).unwrap();

        let mut id = [0u8; 2];
        dev.transaction(&mut [
            spi::Operation::Write(&[0x9F]),
            spi::Operation::DelayNs(1_000),
            spi::Operation::Read(&mut id),
        ])
        .unwrap();

        assert_eq!(id, [0xEF, 0x40]);
        assert_eq!(
            bus.records(),
            vec![
                SpiRecord::Begin,
                SpiRecord::Exchange {
                    tx: vec![0x9F],
                    captured: false
                },
                SpiRecord::Delay(Duration::from_micros(1)),
                SpiRecord::Exchange {
                    tx: vec![0, 0],
                    captured: true
                },
                SpiRecord::End,
            ]
        );
    }

    #[test]
    fn test_spi_transfer_in_place() {
        let bus = SimSpiBus::new();
        let manager = DeviceManager::new();
        let mut dev = manager.open_spi(&bus, SpiConfig::default()).unwrap();

        // Loopback slave echoes what it receives
        let mut data = [1u8, 2, 3];
        dev.transfer_in_place(&mut data).unwrap();
        assert_eq!(data, [1, 2, 3]);
        assert_eq!(bus.mosi(), vec![1, 2, 3]);
    }

    #[test]
    fn test_uart_io() {
        let serial = SimSerial::new();
        let port = serial.add_port("ttyS0");
        let manager = DeviceManager::new().with_comm_ports(["ttyS0"]);
        let mut uart = manager.open_uart(&serial, UartConfig::default()).unwrap();

        uart.write_all(b"AT\r").unwrap();
        assert_eq!(port.written(), b"AT\r".to_vec());

        port.inject(b"OK");
        let mut reply = [0u8; 2];
        uart.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"OK");
    }

    #[test]
    fn test_io_error_kinds() {
        assert_eq!(
            embedded_io::Error::kind(&Error::Closed),
            embedded_io::ErrorKind::NotConnected
        );
        assert_eq!(
            embedded_io::Error::kind(&Error::Io(ErrorKind::Timeout)),
            embedded_io::ErrorKind::TimedOut
        );
    }
}
