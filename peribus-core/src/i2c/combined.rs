//! I2C combined messages

use std::sync::Arc;

use peribus_hal::i2c::I2cTransport;

use super::{execute, I2cDevice, I2cShared, Step};
use crate::buffer::Buffer;
use crate::error::{Error, Result};

/// Ordered read/write steps, possibly for several slaves on one bus,
/// transferred as one uninterrupted bus sequence
///
/// A message is single-use: once [`transfer`](Self::transfer) has been
/// called nothing can be appended and it cannot be transferred again.
pub struct CombinedMessage<T: I2cTransport> {
    controller: Option<u32>,
    targets: Vec<Arc<I2cShared<T>>>,
    steps: Vec<(usize, Step)>,
    used: bool,
}

impl<T: I2cTransport> CombinedMessage<T> {
    pub(crate) fn new(controller: Option<u32>) -> Self {
        Self {
            controller,
            targets: Vec::new(),
            steps: Vec::new(),
            used: false,
        }
    }

    /// Number of appended steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a read from `slave` into `dst`
    pub fn append_read(&mut self, slave: &I2cDevice<T>, dst: &Buffer) -> Result<&mut Self> {
        self.append_read_skip(slave, 0, dst)
    }

    /// Append a read discarding the first `skip` received bytes
    pub fn append_read_skip(
        &mut self,
        slave: &I2cDevice<T>,
        skip: usize,
        dst: &Buffer,
    ) -> Result<&mut Self> {
        self.append(
            slave,
            Step::Read {
                buffer: dst.clone(),
                skip,
            },
        )
    }

    /// Append a write of `src` to `slave`
    pub fn append_write(&mut self, slave: &I2cDevice<T>, src: &Buffer) -> Result<&mut Self> {
        self.append(
            slave,
            Step::Write {
                buffer: src.clone(),
            },
        )
    }

    fn append(&mut self, slave: &I2cDevice<T>, step: Step) -> Result<&mut Self> {
        if self.used {
            return Err(Error::InvalidState("message already transferred"));
        }
        if !slave.is_open() {
            return Err(Error::Closed);
        }
        if slave.config().controller != self.controller {
            return Err(Error::InvalidArgument("slave is on another bus"));
        }
        if self
            .steps
            .iter()
            .any(|(_, s)| Buffer::ptr_eq(s.buffer(), step.buffer()))
        {
            return Err(Error::BufferReused);
        }

        let target = match self
            .targets
            .iter()
            .position(|t| Arc::ptr_eq(t, &slave.shared))
        {
            Some(i) => i,
            None => {
                self.targets.push(slave.shared.clone());
                self.targets.len() - 1
            }
        };
        self.steps.push((target, step));
        Ok(self)
    }

    /// Transfer every step in append order
    ///
    /// Returns one entry per step: bytes stored for reads, `0` for
    /// writes. An empty message returns at once without bus activity.
    pub fn transfer(&mut self) -> Result<Vec<usize>> {
        if self.used {
            return Err(Error::InvalidState("message already transferred"));
        }
        self.used = true;

        let counts = execute(&self.targets, &self.steps)?;
        Ok(counts
            .into_iter()
            .zip(&self.steps)
            .map(|(n, (_, step))| if step.is_read() { n } else { 0 })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleId;
    use peribus_hal::i2c::{Frame, I2cConfig, I2cDriver};
    use peribus_hal::ErrorKind;
    use peribus_hal_sim::{I2cRecord, SimI2c, SimI2cBus};

    fn open(bus: &SimI2cBus, id: u32, config: I2cConfig) -> I2cDevice<SimI2c> {
        I2cDevice::new(HandleId(id), bus.open(&config).unwrap(), config)
    }

    #[test]
    fn test_steps_run_in_append_order() {
        let bus = SimI2cBus::new();
        bus.respond(0x40, &[0x11, 0x22]);
        let dev = open(&bus, 1, I2cConfig::new(0x40));

        let cmd = Buffer::wrap(vec![0xF0]);
        let data = Buffer::allocate(2);
        let mut msg = dev.bus().create_combined_message();
        msg.append_write(&dev, &cmd)
            .unwrap()
            .append_read(&dev, &data)
            .unwrap();

        assert_eq!(msg.transfer().unwrap(), vec![0, 2]);
        assert_eq!(data.to_vec(), vec![0x11, 0x22]);
        assert_eq!(
            bus.records(),
            vec![
                I2cRecord::Write {
                    address: 0x40,
                    frame: Frame::Start,
                    data: vec![0xF0]
                },
                I2cRecord::Read {
                    address: 0x40,
                    frame: Frame::End,
                    len: 2
                },
            ]
        );
    }

    #[test]
    fn test_single_use() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 1, I2cConfig::new(0x40));

        let mut msg = dev.bus().create_combined_message();
        msg.append_write(&dev, &Buffer::wrap(vec![1])).unwrap();
        msg.transfer().unwrap();

        assert!(matches!(
            msg.append_write(&dev, &Buffer::wrap(vec![2])),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(msg.transfer(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_buffer_reuse_rejected() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 1, I2cConfig::new(0x40));

        let buf = Buffer::allocate(2);
        let mut msg = dev.bus().create_combined_message();
        msg.append_write(&dev, &buf).unwrap();
        assert!(matches!(
            msg.append_read(&dev, &buf),
            Err(Error::BufferReused)
        ));
        assert!(matches!(
            msg.append_write(&dev, &buf.clone()),
            Err(Error::BufferReused)
        ));
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn test_empty_message_touches_nothing() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 1, I2cConfig::new(0x40));

        let mut msg = dev.bus().create_combined_message();
        assert!(msg.transfer().unwrap().is_empty());
        assert!(bus.records().is_empty());
    }

    #[test]
    fn test_multiple_slaves_share_the_sequence() {
        let bus = SimI2cBus::new();
        bus.respond(0x41, &[0x99]);
        let a = open(&bus, 2, I2cConfig::new(0x40).shared());
        let b = open(&bus, 1, I2cConfig::new(0x41).shared());

        let out = Buffer::wrap(vec![0x01]);
        let input = Buffer::allocate(1);
        let mut msg = a.bus().create_combined_message();
        msg.append_write(&a, &out)
            .unwrap()
            .append_read(&b, &input)
            .unwrap();
        assert_eq!(msg.transfer().unwrap(), vec![0, 1]);

        // Advisory locks follow handle id order
        let records = bus.records();
        assert_eq!(records[0], I2cRecord::Lock { address: 0x41 });
        assert_eq!(records[1], I2cRecord::Lock { address: 0x40 });
        assert!(records.contains(&I2cRecord::Unlock { address: 0x40 }));
        assert!(records.contains(&I2cRecord::Unlock { address: 0x41 }));
    }

    #[test]
    fn test_slave_on_other_bus_rejected() {
        let bus = SimI2cBus::new();
        let a = open(&bus, 1, I2cConfig::new(0x40));
        let b = open(&bus, 2, I2cConfig::new(0x40).with_controller(3));

        let mut msg = a.bus().create_combined_message();
        assert!(matches!(
            msg.append_write(&b, &Buffer::allocate(1)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_closed_slave_rejected() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 1, I2cConfig::new(0x40));
        let mut msg = dev.bus().create_combined_message();
        dev.close();
        assert!(matches!(
            msg.append_write(&dev, &Buffer::allocate(1)),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_failure_releases_advisory_lock() {
        let bus = SimI2cBus::new();
        let dev = open(&bus, 1, I2cConfig::new(0x40).shared());

        let mut msg = dev.bus().create_combined_message();
        msg.append_write(&dev, &Buffer::allocate(1))
            .unwrap()
            .append_write(&dev, &Buffer::allocate(1))
            .unwrap();
        bus.fail_next(ErrorKind::ArbitrationLost);
        assert!(matches!(
            msg.transfer(),
            Err(Error::Io(ErrorKind::ArbitrationLost))
        ));
        assert_eq!(
            bus.records().last(),
            Some(&I2cRecord::Unlock { address: 0x40 })
        );
    }
}
