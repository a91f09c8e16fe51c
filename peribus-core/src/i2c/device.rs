//! I2C slave device

use std::marker::PhantomData;
use std::sync::Arc;

use peribus_hal::i2c::{I2cConfig, I2cTransport};
use peribus_hal::ErrorKind;

use super::{execute, CombinedMessage, I2cShared, Step};
use crate::buffer::{encode_subaddress, Buffer};
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleId, Native};
use crate::power::PowerGate;

/// Open I2C slave
///
/// Clones share the handle; the device closes when the last clone is
/// dropped or on an explicit [`close`](Self::close).
pub struct I2cDevice<T: I2cTransport> {
    pub(crate) shared: Arc<I2cShared<T>>,
}

impl<T: I2cTransport> Clone for I2cDevice<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: I2cTransport> I2cDevice<T> {
    pub(crate) fn new(id: HandleId, transport: T, config: I2cConfig) -> Self {
        info!(
            "i2c: opened slave {} on controller {}",
            config.address,
            config.controller.unwrap_or(0)
        );
        Self {
            shared: Arc::new(I2cShared {
                handle: Handle::new(id, Native::new(transport, config.access)),
                config,
            }),
        }
    }

    /// Configuration the device was opened with
    pub fn config(&self) -> &I2cConfig {
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

    /// Bus the slave is connected to
    pub fn bus(&self) -> I2cBus<T> {
        I2cBus {
            controller: self.shared.config.controller,
            _transport: PhantomData,
        }
    }

    fn run(&self, steps: &[(usize, Step)]) -> Result<Vec<usize>> {
        execute(std::slice::from_ref(&self.shared), steps)
    }

    /// Read into `dst`, returning the number of bytes stored
    pub fn read(&self, dst: &Buffer) -> Result<usize> {
        self.read_skip(0, dst)
    }

    /// Read, discarding the first `skip` received bytes
    pub fn read_skip(&self, skip: usize, dst: &Buffer) -> Result<usize> {
        let counts = self.run(&[(
            0,
            Step::Read {
                buffer: dst.clone(),
                skip,
            },
        )])?;
        Ok(counts[0])
    }

    /// Read one byte
    pub fn read_byte(&self) -> Result<u8> {
        let buf = Buffer::allocate(1);
        if self.read(&buf)? != 1 {
            return Err(Error::Io(ErrorKind::Other));
        }
        buf.get_at(0)
    }

    /// Write the `size`-byte sub-address, then read into `dst`, as one
    /// combined message
    pub fn read_subaddress(&self, subaddress: u32, size: usize, dst: &Buffer) -> Result<usize> {
        self.read_subaddress_skip(subaddress, size, 0, dst)
    }

    /// Sub-addressed read, discarding the first `skip` payload bytes
    pub fn read_subaddress_skip(
        &self,
        subaddress: u32,
        size: usize,
        skip: usize,
        dst: &Buffer,
    ) -> Result<usize> {
        let prefix = encode_subaddress(subaddress, size)?;
        let counts = self.run(&[
            (
                0,
                Step::Write {
                    buffer: Buffer::from(prefix.as_slice()),
                },
            ),
            (
                0,
                Step::Read {
                    buffer: dst.clone(),
                    skip,
                },
            ),
        ])?;
        Ok(counts[1])
    }

    /// Write from `src`, returning the number of bytes sent
    pub fn write(&self, src: &Buffer) -> Result<usize> {
        let counts = self.run(&[(
            0,
            Step::Write {
                buffer: src.clone(),
            },
        )])?;
        Ok(counts[0])
    }

    /// Write one byte
    pub fn write_byte(&self, value: u8) -> Result<()> {
        if self.write(&Buffer::wrap(vec![value]))? != 1 {
            return Err(Error::Io(ErrorKind::Nack));
        }
        Ok(())
    }

    /// Write the `size`-byte sub-address followed by `src`, as one
    /// combined message
    ///
    /// Returns the number of payload bytes sent.
    pub fn write_subaddress(&self, subaddress: u32, size: usize, src: &Buffer) -> Result<usize> {
        let prefix = encode_subaddress(subaddress, size)?;
        let counts = self.run(&[
            (
                0,
                Step::Write {
                    buffer: Buffer::from(prefix.as_slice()),
                },
            ),
            (
                0,
                Step::Write {
                    buffer: src.clone(),
                },
            ),
        ])?;
        Ok(counts[1])
    }
}

/// I2C bus a slave is connected to
pub struct I2cBus<T: I2cTransport> {
    controller: Option<u32>,
    _transport: PhantomData<fn() -> T>,
}

impl<T: I2cTransport> I2cBus<T> {
    /// Controller number, `None` for the platform default
    pub fn controller(&self) -> Option<u32> {
        self.controller
    }

    /// Empty combined message for slaves on this bus
    pub fn create_combined_message(&self) -> CombinedMessage<T> {
        CombinedMessage::new(self.controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peribus_hal::i2c::{Frame, I2cDriver};
    use peribus_hal_sim::{I2cRecord, SimI2c, SimI2cBus};

    fn open(bus: &SimI2cBus, address: u16) -> I2cDevice<SimI2c> {
        let config = I2cConfig::new(address);
        I2cDevice::new(HandleId(address as u32), bus.open(&config).unwrap(), config)
    }

    #[test]
    fn test_read_advances_position() {
        let bus = SimI2cBus::new();
        bus.respond(0x48, &[1, 2, 3]);
        let dev = open(&bus, 0x48);

        let dst = Buffer::allocate(5);
        dst.set_position(2).unwrap();
        assert_eq!(dev.read(&dst).unwrap(), 3);
        assert_eq!(dst.position(), 5);
        assert_eq!(dst.limit(), 5);
        assert_eq!(dst.to_vec(), vec![0, 0, 1, 2, 3]);
        assert_eq!(
            bus.records(),
            vec![I2cRecord::Read {
                address: 0x48,
                frame: Frame::Regular,
                len: 3
            }]
        );
    }

    #[test]
    fn test_read_skip_discards_leading_bytes() {
        let bus = SimI2cBus::new();
        bus.respond(0x48, &[0xEE, 0xEE, 7, 8]);
        let dev = open(&bus, 0x48);

        let dst = Buffer::allocate(2);
        assert_eq!(dev.read_skip(2, &dst).unwrap(), 2);
        assert_eq!(dst.to_vec(), vec![7, 8]);
    }

    #[test]
    fn test_short_read_within_skip_reports_zero() {
        let bus = SimI2cBus::new();
        bus.limit_transfers(0x48, 2);
        let dev = open(&bus, 0x48);

        let dst = Buffer::allocate(4);
        assert_eq!(dev.read_skip(3, &dst).unwrap(), 0);
        assert_eq!(dst.position(), 0);
    }

    #[test]
    fn test_empty_buffers_skip_the_bus() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 0x40);

        assert_eq!(dev.read_skip(3, &Buffer::allocate(0)).unwrap(), 0);
        assert_eq!(dev.read(&Buffer::allocate(0)).unwrap(), 0);
        assert_eq!(dev.write(&Buffer::allocate(0)).unwrap(), 0);
        assert!(bus.records().is_empty());
    }

    #[test]
    fn test_write_subaddress_is_combined() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 0x50);

        let src = Buffer::wrap(vec![0xCA, 0xFE]);
        assert_eq!(dev.write_subaddress(0x0102, 2, &src).unwrap(), 2);
        assert!(!src.has_remaining());
        assert_eq!(
            bus.records(),
            vec![
                I2cRecord::Write {
                    address: 0x50,
                    frame: Frame::Start,
                    data: vec![0x01, 0x02]
                },
                I2cRecord::Write {
                    address: 0x50,
                    frame: Frame::End,
                    data: vec![0xCA, 0xFE]
                },
            ]
        );
    }

    #[test]
    fn test_subaddress_size_checked_before_bus() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 0x50);

        let dst = Buffer::allocate(1);
        assert!(matches!(
            dev.read_subaddress(1, 5, &dst),
            Err(Error::InvalidArgument(_))
        ));
        assert!(bus.records().is_empty());
    }

    #[test]
    fn test_byte_helpers() {
        let bus = SimI2cBus::new();
        bus.respond(0x20, &[0x5A]);
        let dev = open(&bus, 0x20);

        assert_eq!(dev.read_byte().unwrap(), 0x5A);
        dev.write_byte(0x11).unwrap();
    }

    #[test]
    fn test_native_error_surfaces_as_io() {
        let bus = SimI2cBus::new();
        bus.fail_next(ErrorKind::Nack);
        let dev = open(&bus, 0x20);

        let src = Buffer::wrap(vec![1]);
        assert!(matches!(dev.write(&src), Err(Error::Io(ErrorKind::Nack))));
        assert_eq!(src.position(), 0);
    }

    #[test]
    fn test_closed_device() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 0x20);
        dev.close();
        dev.close();

        assert!(!dev.is_open());
        assert!(matches!(dev.read_byte(), Err(Error::Closed)));
        assert_eq!(bus.records(), vec![I2cRecord::Close { address: 0x20 }]);
    }

    #[test]
    fn test_suspended_device_is_unavailable() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 0x20);
        dev.power().suspend();

        assert!(matches!(dev.read_byte(), Err(Error::Unavailable(_))));
        dev.power().resume();
        assert!(dev.read_byte().is_ok());
    }
}
