//! SPI composite messages

use std::time::Duration;

use peribus_hal::spi::SpiTransport;

use super::{check_word_length, SpiDevice};
use crate::buffer::Buffer;
use crate::error::{Error, Result};

#[derive(Debug)]
struct Step {
    tx: Option<Buffer>,
    skip: usize,
    rx: Option<Buffer>,
    delay: Duration,
}

/// Ordered full-duplex steps transferred in one transaction
///
/// A delay set with [`append_delay`](Self::append_delay) applies to
/// every step appended after it: the bus pauses that long after the
/// step, before the next one. A message is single-use.
pub struct CompositeMessage<T: SpiTransport> {
    device: SpiDevice<T>,
    steps: Vec<Step>,
    delay: Duration,
    used: bool,
}

impl<T: SpiTransport> CompositeMessage<T> {
    pub(crate) fn new(device: SpiDevice<T>) -> Self {
        Self {
            device,
            steps: Vec::new(),
            delay: Duration::ZERO,
            used: false,
        }
    }

    /// Device the message is for
    pub fn device(&self) -> &SpiDevice<T> {
        &self.device
    }

    /// Number of appended steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a read into `dst`
    pub fn append_read(&mut self, dst: &Buffer) -> Result<&mut Self> {
        self.append(None, 0, Some(dst))
    }

    /// Append a read discarding the first `skip` received bytes
    pub fn append_read_skip(&mut self, skip: usize, dst: &Buffer) -> Result<&mut Self> {
        self.append(None, skip, Some(dst))
    }

    /// Append a write of `src`
    pub fn append_write(&mut self, src: &Buffer) -> Result<&mut Self> {
        self.append(Some(src), 0, None)
    }

    /// Append a full-duplex exchange
    pub fn append_write_and_read(&mut self, src: &Buffer, dst: &Buffer) -> Result<&mut Self> {
        self.append(Some(src), 0, Some(dst))
    }

    /// Append a full-duplex exchange discarding the first `skip`
    /// received bytes
    pub fn append_write_and_read_skip(
        &mut self,
        src: &Buffer,
        skip: usize,
        dst: &Buffer,
    ) -> Result<&mut Self> {
        self.append(Some(src), skip, Some(dst))
    }

    /// Pause after every step appended from now on
    pub fn append_delay(&mut self, delay: Duration) -> Result<&mut Self> {
        self.check_status()?;
        self.delay = delay;
        Ok(self)
    }

    fn check_status(&self) -> Result<()> {
        if self.used {
            return Err(Error::InvalidState("message already transferred"));
        }
        if !self.device.is_open() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn append(&mut self, tx: Option<&Buffer>, skip: usize, rx: Option<&Buffer>) -> Result<&mut Self> {
        self.check_status()?;

        if let (Some(tx), Some(rx)) = (tx, rx) {
            if Buffer::ptr_eq(tx, rx) {
                return Err(Error::BufferReused);
            }
        }
        let word = self.device.word_bytes();
        for buffer in tx.iter().chain(rx.iter()) {
            let seen = self.steps.iter().any(|step| {
                step.tx
                    .iter()
                    .chain(step.rx.iter())
                    .any(|used| Buffer::ptr_eq(used, buffer))
            });
            if seen {
                return Err(Error::BufferReused);
            }
            check_word_length(buffer, word)?;
        }

        self.steps.push(Step {
            tx: tx.cloned(),
            skip,
            rx: rx.cloned(),
            delay: self.delay,
        });
        Ok(self)
    }

    /// Transfer every step inside one transaction
    ///
    /// Returns one entry per step: bytes received for steps with a
    /// destination, `0` otherwise. The transaction is ended even when a
    /// step fails.
    pub fn transfer(&mut self) -> Result<Vec<usize>> {
        if self.used {
            return Err(Error::InvalidState("message already transferred"));
        }
        self.used = true;
        if self.steps.is_empty() {
            return Ok(Vec::new());
        }

        let word = self.device.word_bytes();
        for step in &self.steps {
            for buffer in step.tx.iter().chain(step.rx.iter()) {
                check_word_length(buffer, word)?;
            }
        }

        let steps = &self.steps;
        self.device.with_transaction(|state, transactions| {
            let mut counts = Vec::with_capacity(steps.len());
            for (index, step) in steps.iter().enumerate() {
                let n = state.transfer(transactions, step.tx.as_ref(), step.skip, step.rx.as_ref())?;
                counts.push(if step.rx.is_some() { n } else { 0 });

                if !step.delay.is_zero() && index + 1 < steps.len() {
                    state
                        .native
                        .transport()
                        .delay(step.delay)
                        .map_err(Error::native)?;
                }
            }
            Ok(counts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleId;
    use peribus_hal::spi::{SpiConfig, SpiDriver};
    use peribus_hal::ErrorKind;
    use peribus_hal_sim::{SimSpi, SimSpiBus, SpiRecord};
    use portable_atomic::AtomicU32;
    use std::sync::Arc;

    fn open(bus: &SimSpiBus) -> SpiDevice<SimSpi> {
        let config = SpiConfig::default();
        SpiDevice::new(
            HandleId(1),
            bus.open(&config).unwrap(),
            config,
            Arc::new(AtomicU32::new(0)),
        )
        .unwrap()
    }

    #[test]
    fn test_steps_share_one_transaction() {
        let bus = SimSpiBus::new();
        bus.respond(&[0, 0x42, 0x43]);
        let dev = open(&bus);

        let cmd = Buffer::wrap(vec![0x9F]);
        let id = Buffer::allocate(2);
        let mut msg = dev.create_composite_message();
        msg.append_write(&cmd).unwrap().append_read(&id).unwrap();

        assert_eq!(msg.transfer().unwrap(), vec![0, 2]);
        assert_eq!(id.to_vec(), vec![0x42, 0x43]);
        assert_eq!(
            bus.records(),
            vec![
                SpiRecord::Begin,
                SpiRecord::Exchange {
                    tx: vec![0x9F],
                    captured: false
                },
                SpiRecord::Exchange {
                    tx: vec![0, 0],
                    captured: true
                },
                SpiRecord::End,
            ]
        );
    }

    #[test]
    fn test_delay_is_sticky() {
        let bus = SimSpiBus::new();
        let dev = open(&bus);

        let pause = Duration::from_micros(50);
        let mut msg = dev.create_composite_message();
        msg.append_write(&Buffer::wrap(vec![1]))
            .unwrap()
            .append_delay(pause)
            .unwrap()
            .append_write(&Buffer::wrap(vec![2]))
            .unwrap()
            .append_write(&Buffer::wrap(vec![3]))
            .unwrap()
            .append_write(&Buffer::wrap(vec![4]))
            .unwrap();
        msg.transfer().unwrap();

        // No pause after the first step nor after the last one
        let delays = bus
            .records()
            .iter()
            .filter(|r| matches!(r, SpiRecord::Delay(_)))
            .count();
        assert_eq!(delays, 2);
        assert_eq!(
            bus.records()[3],
            SpiRecord::Delay(pause),
            "pause follows the second step"
        );
    }

    #[test]
    fn test_single_use() {
        let bus = SimSpiBus::new();
        let dev = open(&bus);

        let mut msg = dev.create_composite_message();
        msg.append_write(&Buffer::wrap(vec![1])).unwrap();
        msg.transfer().unwrap();
        assert!(matches!(
            msg.append_read(&Buffer::allocate(1)),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            msg.append_delay(Duration::from_millis(1)),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(msg.transfer(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_buffer_reuse_rejected() {
        let bus = SimSpiBus::new();
        let dev = open(&bus);
        let buf = Buffer::allocate(2);

        let mut msg = dev.create_composite_message();
        assert!(matches!(
            msg.append_write_and_read(&buf, &buf),
            Err(Error::BufferReused)
        ));
        msg.append_read(&buf).unwrap();
        assert!(matches!(msg.append_write(&buf), Err(Error::BufferReused)));
        assert_eq!(msg.len(), 1);
    }

    #[test]
    fn test_word_length_checked_on_append() {
        let bus = SimSpiBus::with_word_length(16);
        let dev = open(&bus);

        let mut msg = dev.create_composite_message();
        assert!(matches!(
            msg.append_write(&Buffer::allocate(3)),
            Err(Error::InvalidWordLength { .. })
        ));
        assert!(msg.is_empty());
    }

    #[test]
    fn test_failing_step_ends_transaction() {
        let bus = SimSpiBus::new();
        let dev = open(&bus);

        let dst = Buffer::allocate(1);
        let mut msg = dev.create_composite_message();
        msg.append_read(&dst).unwrap();
        bus.fail_next(ErrorKind::Timeout);

        assert!(matches!(msg.transfer(), Err(Error::Io(ErrorKind::Timeout))));
        assert_eq!(bus.records(), vec![SpiRecord::Begin, SpiRecord::End]);
        // The device is usable again
        let id = dev.begin_transaction().unwrap();
        dev.end_transaction(id).unwrap();
    }

    #[test]
    fn test_failed_end_discards_received_data() {
        let bus = SimSpiBus::new();
        bus.respond(&[0x55]);
        let dev = open(&bus);

        let dst = Buffer::allocate(1);
        let mut msg = dev.create_composite_message();
        msg.append_read(&dst).unwrap();
        bus.fail_end(ErrorKind::Bus);

        assert!(matches!(msg.transfer(), Err(Error::Io(ErrorKind::Bus))));
        assert_eq!(dst.to_vec(), vec![0]);
    }

    #[test]
    fn test_open_transaction_blocks_composite() {
        let bus = SimSpiBus::new();
        let dev = open(&bus);
        let id = dev.begin_transaction().unwrap();

        let mut msg = dev.create_composite_message();
        msg.append_write(&Buffer::allocate(1)).unwrap();
        assert!(matches!(msg.transfer(), Err(Error::InvalidState(_))));
        dev.end_transaction(id).unwrap();
    }
}
